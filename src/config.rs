//! `PolarisConfig`: an optional, `serde`-driven convenience for loading the
//! `Supervisor`'s options from TOML/JSON/env instead of calling setters by
//! hand: one field per option, each with a `#[serde(default = "...")]`
//! function. This is additive — it carries no behavior beyond
//! `Supervisor::from_config` and is not part of the core state machine.

use std::time::Duration;

use serde::Deserialize;

use crate::auth::DEFAULT_AUTH_URL;
use crate::supervisor::{DEFAULT_ENDPOINT_HOST, DEFAULT_ENDPOINT_PORT};

/// Credentials configuration: either an API key pair or a pre-supplied
/// token. Either both `api_key` and `unique_id` are present, or neither is
/// and `auth_token` carries a token obtained out of band.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialsConfig {
    pub api_key: Option<String>,
    pub unique_id: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct PolarisConfig {
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Overrides the default corrections-stream endpoint host.
    #[serde(default = "PolarisConfig::endpoint_host")]
    pub endpoint_host: String,

    /// Overrides the default corrections-stream endpoint port.
    #[serde(default = "PolarisConfig::endpoint_port")]
    pub endpoint_port: u16,

    /// Overrides the default authentication endpoint URL.
    #[serde(default = "PolarisConfig::auth_url")]
    pub auth_url: String,

    /// Consecutive connection failures before the token is cleared and
    /// re-authentication is forced. `<= 0` means unlimited.
    #[serde(default = "PolarisConfig::max_reconnect_attempts")]
    pub max_reconnect_attempts: i32,

    /// Per-read deadline passed to `Session::run`, in seconds.
    #[serde(default = "PolarisConfig::read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl PolarisConfig {
    fn endpoint_host() -> String {
        DEFAULT_ENDPOINT_HOST.to_string()
    }

    fn endpoint_port() -> u16 {
        DEFAULT_ENDPOINT_PORT
    }

    fn auth_url() -> String {
        DEFAULT_AUTH_URL.to_string()
    }

    fn max_reconnect_attempts() -> i32 {
        0
    }

    fn read_timeout_secs() -> u64 {
        15
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Parses a TOML document into a `PolarisConfig`.
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }
}

impl Default for PolarisConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialsConfig::default(),
            endpoint_host: Self::endpoint_host(),
            endpoint_port: Self::endpoint_port(),
            auth_url: Self::auth_url(),
            max_reconnect_attempts: Self::max_reconnect_attempts(),
            read_timeout_secs: Self::read_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_defaults() {
        let config = PolarisConfig::from_toml_str("").unwrap();
        assert_eq!(config.endpoint_host, DEFAULT_ENDPOINT_HOST);
        assert_eq!(config.endpoint_port, DEFAULT_ENDPOINT_PORT);
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.read_timeout_secs, 15);
    }

    #[test]
    fn parses_credentials_and_overrides() {
        let toml = r#"
            endpoint-port = 9000
            max-reconnect-attempts = 5

            [credentials]
            api-key = "K"
            unique-id = "U"
        "#;

        let config = PolarisConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.endpoint_port, 9000);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.credentials.api_key.as_deref(), Some("K"));
        assert_eq!(config.credentials.unique_id.as_deref(), Some("U"));
    }
}
