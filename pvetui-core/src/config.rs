//! Configuration surface consumed (not parsed) by the core.
//!
//! CLI flags, environment variables, config files, and XDG path
//! resolution are an external collaborator's job; this module only
//! defines the shapes that collaborator populates and the validation
//! that must run before any network call.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PveError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credentials {
    Password(String),
    ApiToken { token_id: String, token_secret: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub addr: String,
    pub user: String,
    pub realm: String,
    pub credentials: Credentials,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_api_path")]
    pub api_path: String,
}

fn default_api_path() -> String {
    "/api2/json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpHostConfig {
    pub host: String,
    pub user: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default)]
    pub jump_host: Option<JumpHostConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverride {
    pub user: Option<String>,
    pub realm: Option<String>,
    pub credentials: Option<Credentials>,
    pub ssh_user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverride>,
    #[serde(default)]
    pub active_profile: Option<String>,
}

impl Config {
    /// Resolve `connection` with the active profile's overrides applied,
    /// without mutating the stored config.
    pub fn effective_connection(&self) -> ConnectionConfig {
        let mut conn = self.connection.clone();
        let Some(profile_name) = &self.active_profile else {
            return conn;
        };
        let Some(profile) = self.profiles.get(profile_name) else {
            return conn;
        };
        if let Some(user) = &profile.user {
            conn.user = user.clone();
        }
        if let Some(realm) = &profile.realm {
            conn.realm = realm.clone();
        }
        if let Some(credentials) = &profile.credentials {
            conn.credentials = credentials.clone();
        }
        conn
    }

    /// Validate before any network call is attempted.
    pub fn validate(&self) -> Result<(), PveError> {
        if self.connection.addr.trim().is_empty() {
            return Err(PveError::ConfigInvalid("addr must not be empty".into()));
        }
        if self.connection.user.trim().is_empty() {
            return Err(PveError::ConfigInvalid("user must not be empty".into()));
        }
        if self.connection.realm.trim().is_empty() {
            return Err(PveError::ConfigInvalid("realm must not be empty".into()));
        }
        match &self.connection.credentials {
            Credentials::Password(p) if p.is_empty() => {
                return Err(PveError::ConfigInvalid("password must not be empty".into()));
            }
            Credentials::ApiToken { token_id, token_secret }
                if token_id.is_empty() || token_secret.is_empty() =>
            {
                return Err(PveError::ConfigInvalid(
                    "token_id and token_secret must not be empty".into(),
                ));
            }
            _ => {}
        }
        if let Some(active) = &self.active_profile
            && !self.profiles.contains_key(active)
        {
            return Err(PveError::ConfigInvalid(format!(
                "active_profile '{active}' has no matching entry in profiles"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            connection: ConnectionConfig {
                addr: "https://pve.example:8006".into(),
                user: "root".into(),
                realm: "pam".into(),
                credentials: Credentials::Password("hunter2".into()),
                insecure: false,
                api_path: default_api_path(),
            },
            runtime: RuntimeConfig::default(),
            profiles: HashMap::new(),
            active_profile: None,
        }
    }

    #[test]
    fn rejects_empty_addr() {
        let mut cfg = base_config();
        cfg.connection.addr.clear();
        assert!(matches!(cfg.validate(), Err(PveError::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_dangling_active_profile() {
        let mut cfg = base_config();
        cfg.active_profile = Some("missing".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn profile_override_replaces_user_and_credentials() {
        let mut cfg = base_config();
        cfg.profiles.insert(
            "lab".into(),
            ProfileOverride {
                user: Some("svc".into()),
                realm: None,
                credentials: Some(Credentials::ApiToken {
                    token_id: "svc!token".into(),
                    token_secret: "secret".into(),
                }),
                ssh_user: None,
            },
        );
        cfg.active_profile = Some("lab".into());
        let effective = cfg.effective_connection();
        assert_eq!(effective.user, "svc");
        assert_eq!(effective.realm, "pam");
        assert!(matches!(effective.credentials, Credentials::ApiToken { .. }));
    }
}
