use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};

use super::AuthManager;
use crate::error::PveError;

/// API-token authentication: stateless beyond the id/secret pair,
/// nothing to refresh or invalidate.
pub struct TokenAuth {
    header_value: String,
}

impl TokenAuth {
    pub fn new(user: String, realm: String, token_id: String, token_secret: String) -> Self {
        let header_value =
            format!("PVEAPIToken={user}@{realm}!{token_id}={token_secret}");
        Self { header_value }
    }
}

#[async_trait]
impl AuthManager for TokenAuth {
    async fn ensure_authenticated(&self) -> Result<(), PveError> {
        Ok(())
    }

    async fn apply(&self, _method: &Method, request: RequestBuilder) -> Result<RequestBuilder, PveError> {
        Ok(request.header("Authorization", self.header_value.clone()))
    }

    fn invalidate(&self) {}
}
