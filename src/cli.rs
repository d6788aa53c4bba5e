//! Argument parsing only. XDG resolution and config-file loading are
//! an external collaborator's job per the core's scope; this binary
//! only needs enough to reach a validated `Config`.

use clap::Parser;
use pvetui_core::config::{Config, ConnectionConfig, Credentials, RuntimeConfig};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "pvetui", about = "Terminal control plane for a Proxmox VE cluster")]
pub struct Cli {
    /// Cluster endpoint, e.g. https://pve.example.com:8006
    #[arg(long, env = "PVETUI_ADDR")]
    pub addr: String,

    #[arg(long, env = "PVETUI_USER", default_value = "root")]
    pub user: String,

    #[arg(long, env = "PVETUI_REALM", default_value = "pam")]
    pub realm: String,

    /// PVE API token in `tokenid=secret` form. Falls back to an
    /// interactive password prompt when absent.
    #[arg(long, env = "PVETUI_API_TOKEN")]
    pub api_token: Option<String>,

    #[arg(long, env = "PVETUI_INSECURE", default_value_t = false)]
    pub insecure: bool,

    /// Directory for the on-disk cache and PID lock. Defaults to an
    /// in-memory-only cache with no cross-restart PID guard.
    #[arg(long, env = "PVETUI_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, env = "PVETUI_MAX_CONCURRENT_TASKS", default_value_t = 4)]
    pub max_concurrent_tasks: usize,

    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn into_config(self, password: Option<String>) -> Config {
        let credentials = match (self.api_token, password) {
            (Some(token), _) => {
                let (token_id, token_secret) =
                    token.split_once('=').map(|(a, b)| (a.to_string(), b.to_string())).unwrap_or((
                        token.clone(),
                        String::new(),
                    ));
                Credentials::ApiToken { token_id, token_secret }
            }
            (None, Some(password)) => Credentials::Password(password),
            (None, None) => Credentials::Password(String::new()),
        };

        Config {
            connection: ConnectionConfig {
                addr: self.addr,
                user: self.user,
                realm: self.realm,
                credentials,
                insecure: self.insecure,
                api_path: "/api2/json".to_string(),
            },
            runtime: RuntimeConfig {
                debug: self.debug,
                cache_dir: self.cache_dir,
                ssh_user: None,
                jump_host: None,
            },
            profiles: HashMap::new(),
            active_profile: None,
        }
    }
}
