//! Single reqwest client shared across every PVE call, wrapping retry,
//! timeout, 401-reauthentication, and envelope-unwrapping concerns so
//! the typed client never touches `reqwest` directly.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::auth::AuthManager;
use crate::error::{BackoffStrategy, PveError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Every PVE read/write goes through here so retries, timeouts, and
/// re-authentication are applied exactly once, centrally.
#[derive(Clone)]
pub struct HttpEngagement {
    client: reqwest::Client,
    auth: Arc<dyn AuthManager>,
    base_url: url::Url,
}

impl HttpEngagement {
    pub fn new(
        client: reqwest::Client,
        auth: Arc<dyn AuthManager>,
        base_url: url::Url,
    ) -> Self {
        Self { client, auth, base_url }
    }

    pub fn raw_client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    /// GET `path` under the configured base URL, decoding the `{"data": ...}`
    /// envelope into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PveError> {
        self.call_json(Method::GET, path, None).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, PveError> {
        self.call_json(Method::POST, path, Some(form)).await
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PveError> {
        self.call_json(Method::DELETE, path, None).await
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(&str, &str)]>,
    ) -> Result<T, PveError> {
        let body = self.call_with_retry(method, path, form, false).await?;
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| PveError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }

    async fn call_with_retry(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(&str, &str)]>,
        reauth_attempted: bool,
    ) -> Result<String, PveError> {
        self.auth.ensure_authenticated().await?;

        let mut attempt: u32 = 0;
        let mut reauthed = reauth_attempted;
        loop {
            attempt += 1;
            match self.call_once(method.clone(), path, form).await {
                Ok(body) => return Ok(body),
                Err(PveError::HttpStatus { code: 401, body }) if !reauthed => {
                    self.auth.invalidate();
                    self.auth.ensure_authenticated().await?;
                    reauthed = true;
                    let _ = body;
                    continue;
                }
                Err(err) if attempt < DEFAULT_MAX_ATTEMPTS && is_retryable(&err) => {
                    tokio::time::sleep(backoff_for(&err, attempt)).await;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(&str, &str)]>,
    ) -> Result<String, PveError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| PveError::Internal(format!("invalid request path {path}: {e}")))?;

        let mut builder = self.client.request(method.clone(), url);
        if let Some(fields) = form {
            builder = builder.form(fields);
        }
        builder = self.auth.apply(&method, builder).await?;

        let response = tokio::time::timeout(DEFAULT_TIMEOUT, builder.send())
            .await
            .map_err(|_| PveError::Timeout(DEFAULT_TIMEOUT))?
            .map_err(|e| PveError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PveError::Transport(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(PveError::from_status(status.as_u16(), body))
        }
    }
}

fn is_retryable(err: &PveError) -> bool {
    err.category() == crate::error::ErrorCategory::Retryable
}

fn backoff_for(err: &PveError, attempt: u32) -> Duration {
    match err.retryability() {
        crate::error::Retryability::Retryable {
            backoff: BackoffStrategy::Exponential { base_ms, max_ms },
            ..
        } => {
            let scaled = base_ms.saturating_mul(1_u64 << attempt.saturating_sub(1).min(16));
            Duration::from_millis(scaled.min(max_ms))
        }
        _ => Duration::from_millis(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuth;
    use std::sync::Arc;

    fn engagement(server_url: &str) -> HttpEngagement {
        let auth: Arc<dyn AuthManager> =
            Arc::new(TokenAuth::new("u".into(), "pam".into(), "t".into(), "s".into()));
        HttpEngagement::new(
            reqwest::Client::new(),
            auth,
            url::Url::parse(&format!("{server_url}/api2/json/")).unwrap(),
        )
    }

    #[tokio::test]
    async fn get_json_unwraps_data_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api2/json/version")
            .with_status(200)
            .with_body(r#"{"data":{"version":"8.2"}}"#)
            .create_async()
            .await;

        #[derive(serde::Deserialize)]
        struct Version {
            version: String,
        }
        let http = engagement(&server.url());
        let version: Version = http.get_json("version").await.unwrap();
        assert_eq!(version.version, "8.2");
    }

    #[tokio::test]
    async fn server_error_is_retried_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api2/json/version")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/api2/json/version")
            .with_status(200)
            .with_body(r#"{"data":{"version":"8.2"}}"#)
            .create_async()
            .await;

        #[derive(serde::Deserialize)]
        struct Version {
            version: String,
        }
        let http = engagement(&server.url());
        let version: Version = http.get_json("version").await.unwrap();
        assert_eq!(version.version, "8.2");
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api2/json/nodes/missing")
            .with_status(404)
            .with_body("not found")
            .expect(1)
            .create_async()
            .await;

        #[derive(serde::Deserialize)]
        struct Unused;
        let http = engagement(&server.url());
        let result: Result<Unused, PveError> = http.get_json("nodes/missing").await;
        assert!(matches!(result, Err(PveError::HttpStatus { code: 404, .. })));
        mock.assert_async().await;
    }
}
