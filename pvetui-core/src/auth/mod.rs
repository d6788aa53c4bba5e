//! Authentication against a PVE API endpoint.
//!
//! Two mutually exclusive strategies selected from `Credentials` at
//! construction: a ticket/CSRF pair that must be refreshed before its
//! ~2 hour lifetime runs out, or a static API token that never expires
//! and needs no network round trip to "authenticate".

mod ticket;
mod token;

pub use ticket::TicketAuth;
pub use token::TokenAuth;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};

use crate::config::{ConnectionConfig, Credentials};
use crate::error::PveError;

/// Attaches whatever the active strategy needs to an outgoing request
/// and knows when that state must be refreshed first.
#[async_trait]
pub trait AuthManager: Send + Sync {
    async fn ensure_authenticated(&self) -> Result<(), PveError>;

    /// `method` gates strategy-specific per-method headers — e.g. the
    /// CSRF token ticket auth attaches only on mutating methods, never
    /// on `GET` (PVE rejects neither, but the spec's request shape only
    /// calls for it on writes).
    async fn apply(&self, method: &Method, request: RequestBuilder) -> Result<RequestBuilder, PveError>;

    /// Drop any cached credential state so the next `ensure_authenticated`
    /// call performs a full login. Called after a 401 to force recovery.
    fn invalidate(&self);
}

/// Builds the `AuthManager` matching `conn.credentials`.
pub fn build_auth_manager(
    conn: &ConnectionConfig,
    http_client: Arc<reqwest::Client>,
) -> Result<Arc<dyn AuthManager>, PveError> {
    match &conn.credentials {
        Credentials::Password(password) => Ok(Arc::new(TicketAuth::new(
            http_client,
            conn.addr.clone(),
            conn.api_path.clone(),
            conn.user.clone(),
            conn.realm.clone(),
            password.clone(),
        )?)),
        Credentials::ApiToken { token_id, token_secret } => Ok(Arc::new(TokenAuth::new(
            conn.user.clone(),
            conn.realm.clone(),
            token_id.clone(),
            token_secret.clone(),
        ))),
    }
}
