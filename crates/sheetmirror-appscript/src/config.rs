use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that overrides the configured script URL
pub const SCRIPT_URL_ENV: &str = "SHEETMIRROR_SCRIPT_URL";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppsScriptConfigError {
    #[error("script_url is not set (configure it or set {SCRIPT_URL_ENV})")]
    MissingUrl,

    #[error("script_url must be an http(s) URL, got {0:?}")]
    InvalidUrl(String),

    #[error("request_timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("could not build the HTTP client: {0}")]
    Client(String),
}

/// Where the deployed script lives and how long one read may take.
///
/// Writes are never timed out at the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsScriptConfig {
    pub script_url: String,
    pub request_timeout_ms: u64,
}

impl Default for AppsScriptConfig {
    fn default() -> Self {
        Self {
            script_url: String::new(),
            request_timeout_ms: 60_000,
        }
    }
}

impl AppsScriptConfig {
    pub fn new(script_url: impl Into<String>) -> Self {
        Self {
            script_url: script_url.into(),
            ..Self::default()
        }
    }

    /// Apply `SHEETMIRROR_SCRIPT_URL` if it is set and non-empty
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(SCRIPT_URL_ENV) {
            if !url.trim().is_empty() {
                self.script_url = url.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), AppsScriptConfigError> {
        let url = self.script_url.trim();
        if url.is_empty() {
            return Err(AppsScriptConfigError::MissingUrl);
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppsScriptConfigError::InvalidUrl(url.to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(AppsScriptConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn empty_url_is_rejected() {
        assert_eq!(
            AppsScriptConfig::default().validate(),
            Err(AppsScriptConfigError::MissingUrl)
        );
        assert!(matches!(
            AppsScriptConfig::new("script.google.com/macros/s/x/exec").validate(),
            Err(AppsScriptConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn partial_yaml_keeps_default_timeout() {
        let config: AppsScriptConfig =
            serde_json::from_str(r#"{"script_url": "https://example.test/exec"}"#).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn env_overrides_configured_url() {
        std::env::set_var(SCRIPT_URL_ENV, " https://override.test/exec ");
        let config = AppsScriptConfig::new("https://file.test/exec").with_env_overrides();
        std::env::remove_var(SCRIPT_URL_ENV);

        assert_eq!(config.script_url, "https://override.test/exec");
    }

    #[test]
    #[serial]
    fn blank_env_is_ignored() {
        std::env::set_var(SCRIPT_URL_ENV, "  ");
        let config = AppsScriptConfig::new("https://file.test/exec").with_env_overrides();
        std::env::remove_var(SCRIPT_URL_ENV);

        assert_eq!(config.script_url, "https://file.test/exec");
    }
}
