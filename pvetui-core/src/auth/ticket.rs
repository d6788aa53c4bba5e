use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use super::AuthManager;
use crate::error::PveError;

/// PVE tickets are valid for two hours; refresh once within five
/// minutes of expiry so a long-running request never races a ticket
/// that dies mid-flight.
const TICKET_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

struct TicketState {
    ticket: String,
    csrf_token: String,
    obtained_at: Instant,
}

impl TicketState {
    fn needs_refresh(&self) -> bool {
        self.obtained_at.elapsed() >= TICKET_LIFETIME.saturating_sub(REFRESH_MARGIN)
    }
}

#[derive(Deserialize)]
struct TicketEnvelope {
    data: TicketData,
}

#[derive(Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_prevention_token: String,
}

/// Ticket-based authentication with single-flight refresh: the mutex
/// that guards `state` is held across the login round trip, so
/// concurrent callers queue behind the first refresh instead of each
/// issuing their own login request.
pub struct TicketAuth {
    http: Arc<reqwest::Client>,
    login_url: Url,
    user: String,
    realm: String,
    password: String,
    state: Mutex<Option<TicketState>>,
}

impl TicketAuth {
    pub fn new(
        http: Arc<reqwest::Client>,
        addr: String,
        api_path: String,
        user: String,
        realm: String,
        password: String,
    ) -> Result<Self, PveError> {
        let base = format!("{}{}", addr.trim_end_matches('/'), api_path);
        let base_url = Url::parse(&base)
            .map_err(|e| PveError::ConfigInvalid(format!("invalid PVE address: {e}")))?;
        let login_url = base_url
            .join("access/ticket")
            .map_err(|e| PveError::ConfigInvalid(format!("invalid PVE address: {e}")))?;
        Ok(Self { http, login_url, user, realm, password, state: Mutex::new(None) })
    }

    async fn login(&self) -> Result<TicketState, PveError> {
        let userid = format!("{}@{}", self.user, self.realm);
        let response = self
            .http
            .post(self.login_url.clone())
            .form(&[("username", userid.as_str()), ("password", self.password.as_str())])
            .send()
            .await
            .map_err(|e| PveError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 {
            return Err(PveError::AuthRejected(body));
        }
        if !status.is_success() {
            return Err(PveError::from_status(status.as_u16(), body));
        }

        let envelope: TicketEnvelope =
            serde_json::from_str(&body).map_err(|e| PveError::Decode(e.to_string()))?;
        Ok(TicketState {
            ticket: envelope.data.ticket,
            csrf_token: envelope.data.csrf_prevention_token,
            obtained_at: Instant::now(),
        })
    }
}

#[async_trait]
impl AuthManager for TicketAuth {
    async fn ensure_authenticated(&self) -> Result<(), PveError> {
        let mut guard = self.state.lock().await;
        if let Some(existing) = guard.as_ref()
            && !existing.needs_refresh()
        {
            return Ok(());
        }
        let fresh = self.login().await?;
        *guard = Some(fresh);
        Ok(())
    }

    async fn apply(&self, method: &Method, request: RequestBuilder) -> Result<RequestBuilder, PveError> {
        let guard = self.state.lock().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| PveError::Internal("apply called before ensure_authenticated".into()))?;
        let mut request = request.header("Cookie", format!("PVEAuthCookie={}", state.ticket));
        if method != Method::GET {
            request = request.header("CSRFPreventionToken", state.csrf_token.clone());
        }
        Ok(request)
    }

    fn invalidate(&self) {
        if let Ok(mut guard) = self.state.try_lock() {
            *guard = None;
        } else {
            // A refresh is already in flight; let it finish rather than
            // blocking the caller, it will produce a fresh ticket anyway.
        }
    }
}
