//! Client configuration loading.

use std::path::{Path, PathBuf};
use std::{env, fs, io::ErrorKind};

use serde::Deserialize;
use tracing::{info, warn};
use trivia_core::protocol::TeamId;

use crate::supervisor::{Backoff, DEFAULT_RECONNECT_DELAYS_MS};

/// Default location on disk of the JSON configuration.
pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "TRIVIA_CONFIG_PATH";

/// Everything the client needs to reach and follow a game.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Push channel endpoint.
    pub ws_url: String,
    /// Game service base URL.
    pub api_url: String,
    pub access_token: Option<String>,
    pub team_id: TeamId,
    /// Where the session snapshot is kept.
    pub state_path: PathBuf,
    pub reconnect_delays_ms: Vec<u64>,
    /// Give up after this many failed attempts; retry forever when unset.
    pub max_reconnect_attempts: Option<u32>,
    /// Guess question kinds from numbering when the authority omits them.
    pub legacy_kind_inference: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:5000/hubs/game".to_string(),
            api_url: "http://127.0.0.1:5000".to_string(),
            access_token: None,
            team_id: 0,
            state_path: PathBuf::from("trivia-session.json"),
            reconnect_delays_ms: DEFAULT_RECONNECT_DELAYS_MS.to_vec(),
            max_reconnect_attempts: None,
            legacy_kind_inference: false,
        }
    }
}

impl ClientConfig {
    /// Load from the path named by [`CONFIG_PATH_ENV`], or
    /// [`DEFAULT_CONFIG_PATH`], falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load from `path`. A missing or unreadable file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), team_id = config.team_id, "loaded client config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "config file not found; using built-in defaults");
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(&self.reconnect_delays_ms, self.max_reconnect_attempts)
    }
}

/// Resolve the configuration path taking the environment override into account.
pub fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scratch(name: &str) -> PathBuf {
        env::temp_dir().join(format!("trivia-config-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = scratch("partial");
        fs::write(
            &path,
            r#"{"team_id": 12, "max_reconnect_attempts": 4, "reconnect_delays_ms": [0, 500]}"#,
        )
        .unwrap();
        let config = ClientConfig::load_from(&path);
        let _ = fs::remove_file(&path);

        assert_eq!(config.team_id, 12);
        assert_eq!(config.ws_url, ClientConfig::default().ws_url);
        assert!(!config.legacy_kind_inference);
        let backoff = config.backoff();
        assert_eq!(backoff.delay(9), Duration::from_millis(500));
        assert!(backoff.exhausted(4));
    }

    #[test]
    fn missing_or_broken_file_yields_defaults() {
        assert_eq!(
            ClientConfig::load_from(&scratch("absent")),
            ClientConfig::default()
        );

        let path = scratch("broken");
        fs::write(&path, "{ not json").unwrap();
        let config = ClientConfig::load_from(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(config, ClientConfig::default());
    }
}
