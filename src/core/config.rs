use crate::core::errors::LiveApiError;
use secrecy::{ExposeSecret, Secret};
use serde::{Serialize, Serializer};
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "wss://ws.binaryws.com/websockets/v3";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Callback invoked when the transport reports a fatal error
pub type FatalHandler = Arc<dyn Fn(&LiveApiError) + Send + Sync>;

/// What the session does when the transport reports an error
#[derive(Clone, Default)]
pub enum FatalPolicy {
    /// Log the error and terminate the process so a supervisor can respawn it
    #[default]
    Terminate,
    /// Hand the error to a caller-supplied handler
    Callback(FatalHandler),
    /// Log the error and keep running
    LogOnly,
}

impl fmt::Debug for FatalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminate => write!(f, "Terminate"),
            Self::Callback(_) => write!(f, "Callback(..)"),
            Self::LogOnly => write!(f, "LogOnly"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveApiConfig {
    pub endpoint: String,
    pub language: String,
    pub app_id: Option<String>,
    pub api_token: Option<Secret<String>>,
    pub request_timeout: Option<Duration>,
    pub fatal_policy: FatalPolicy,
}

// Never expose the token in serialization
impl Serialize for LiveApiConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("LiveApiConfig", 5)?;
        state.serialize_field("endpoint", &self.endpoint)?;
        state.serialize_field("language", &self.language)?;
        state.serialize_field("app_id", &self.app_id)?;
        state.serialize_field(
            "api_token",
            &self.api_token.as_ref().map(|_| "[REDACTED]"),
        )?;
        state.serialize_field(
            "request_timeout_secs",
            &self.request_timeout.map(|t| t.as_secs()),
        )?;
        state.end()
    }
}

impl Default for LiveApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            app_id: None,
            api_token: None,
            request_timeout: None,
            fatal_policy: FatalPolicy::default(),
        }
    }
}

impl LiveApiConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Every variable is optional:
    /// - `{PREFIX}_ENDPOINT`
    /// - `{PREFIX}_LANGUAGE`
    /// - `{PREFIX}_APP_ID`
    /// - `{PREFIX}_API_TOKEN`
    /// - `{PREFIX}_REQUEST_TIMEOUT_SECS`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let var = |name: &str| {
            env::var(format!("{}_{}", prefix, name))
                .ok()
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(endpoint) = var("ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(language) = var("LANGUAGE") {
            config.language = language;
        }
        config.app_id = var("APP_ID");
        config.api_token = var("API_TOKEN").map(Secret::new);

        if let Some(raw) = var("REQUEST_TIMEOUT_SECS") {
            let secs = raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidConfiguration(format!(
                    "{}_REQUEST_TIMEOUT_SECS must be a whole number of seconds: {}",
                    prefix, e
                ))
            })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Create configuration from .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // no file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    #[must_use]
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(Secret::new(token.into()));
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.fatal_policy = policy;
        self
    }

    /// Get the API token (use carefully - exposes secret)
    pub fn api_token(&self) -> Option<&str> {
        self.api_token
            .as_ref()
            .map(|token| token.expose_secret().as_str())
    }

    /// URL the transport connects to for a given language
    pub fn connection_url(&self, language: &str) -> String {
        match &self.app_id {
            Some(app_id) => format!("{}?l={}&app_id={}", self.endpoint, language, app_id),
            None => format!("{}?l={}", self.endpoint, language),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LiveApiConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.language, "en");
        assert!(config.request_timeout.is_none());
        assert!(matches!(config.fatal_policy, FatalPolicy::Terminate));
    }

    #[test]
    fn test_connection_url() {
        let config = LiveApiConfig::new().with_endpoint("wss://example.test/ws");
        assert_eq!(config.connection_url("de"), "wss://example.test/ws?l=de");

        let config = config.with_app_id("1089");
        assert_eq!(
            config.connection_url("en"),
            "wss://example.test/ws?l=en&app_id=1089"
        );
    }

    #[test]
    fn test_token_redacted_in_serialization() {
        let config = LiveApiConfig::new().with_api_token("super-secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(json.contains("[REDACTED]"));
        assert_eq!(config.api_token(), Some("super-secret"));
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn test_from_env() {
        env::set_var("LIVEX_CFG_TEST_LANGUAGE", "fr");
        env::set_var("LIVEX_CFG_TEST_REQUEST_TIMEOUT_SECS", "15");
        let config = LiveApiConfig::from_env("livex_cfg_test").unwrap();
        assert_eq!(config.language, "fr");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(15)));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_from_env_rejects_bad_timeout() {
        env::set_var("LIVEX_CFG_BAD_REQUEST_TIMEOUT_SECS", "soon");
        let result = LiveApiConfig::from_env("livex_cfg_bad");
        assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
    }
}
