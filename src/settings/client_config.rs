use super::retry_budget::{parse_and_clamp, RetryBudget};
use crate::error::{MailError, Result};
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Chunk size used for upload-session PUTs.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 4 * 1024 * 1024;

const ENV_TENANT_ID: &str = "GRAPH_TENANT_ID";
const ENV_CLIENT_ID: &str = "GRAPH_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "GRAPH_CLIENT_SECRET";
const ENV_SCOPE: &str = "GRAPH_SCOPE";
const ENV_MAX_RETRIES: &str = "GRAPH_MAX_RETRIES";
const ENV_RETRY_DELAY: &str = "GRAPH_RETRY_DELAY_SECS";
const ENV_IMMUTABLE_IDS: &str = "GRAPH_USE_IMMUTABLE_IDS";

/// Invoked with the throttle percentage when it reaches the warning threshold.
pub type ThrottleCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Client-credentials identity of the application.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

impl Credentials {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: DEFAULT_SCOPE.to_string(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", &self.scope),
        ] {
            if value.trim().is_empty() {
                return Err(MailError::validation(format!("{name} is required")));
            }
        }
        Ok(())
    }
}

// The secret never ends up in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Constructor-level configuration of a [`crate::MailClient`].
#[derive(Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    pub base_url: String,
    pub authority: String,
    pub use_immutable_ids: bool,
    pub retry: RetryBudget,
    pub timeout: Duration,
    pub upload_chunk_size: usize,
    pub throttle_callback: Option<ThrottleCallback>,
}

impl ClientConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            base_url: DEFAULT_GRAPH_BASE.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
            use_immutable_ids: true,
            retry: RetryBudget::default(),
            timeout: DEFAULT_TIMEOUT,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            throttle_callback: None,
        }
    }

    /// Reads credentials and optional tuning values from `GRAPH_*` variables.
    pub fn from_env() -> Result<Self> {
        let tenant_id = required_env(ENV_TENANT_ID)?;
        let client_id = required_env(ENV_CLIENT_ID)?;
        let client_secret = required_env(ENV_CLIENT_SECRET)?;
        let mut credentials = Credentials::new(tenant_id, client_id, client_secret);
        if let Some(scope) = optional_env(ENV_SCOPE) {
            credentials = credentials.with_scope(scope);
        }

        let mut config = ClientConfig::new(credentials);
        config.retry = parse_and_clamp(
            optional_env(ENV_MAX_RETRIES).as_deref(),
            optional_env(ENV_RETRY_DELAY).as_deref(),
        )?;
        if let Some(raw) = optional_env(ENV_IMMUTABLE_IDS) {
            config.use_immutable_ids = parse_flag(&raw)?;
        }
        Ok(config)
    }

    pub fn with_immutable_ids(mut self, enabled: bool) -> Self {
        self.use_immutable_ids = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryBudget) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_upload_chunk_size(mut self, bytes: usize) -> Self {
        self.upload_chunk_size = bytes;
        self
    }

    pub fn with_throttle_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.throttle_callback = Some(Arc::new(callback));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.credentials.validate()?;
        if self.base_url.trim().is_empty() {
            return Err(MailError::validation("base url is required"));
        }
        if self.upload_chunk_size == 0 {
            return Err(MailError::validation("upload chunk size must be positive"));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub(crate) fn normalized_base(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("credentials", &self.credentials)
            .field("base_url", &self.base_url)
            .field("authority", &self.authority)
            .field("use_immutable_ids", &self.use_immutable_ids)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("upload_chunk_size", &self.upload_chunk_size)
            .field("throttle_callback", &self.throttle_callback.is_some())
            .finish()
    }
}

fn required_env(key: &str) -> Result<String> {
    optional_env(key).ok_or_else(|| MailError::validation(format!("environment variable {key} is not set")))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MailError::validation(format!("invalid boolean value: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_applies_documented_defaults() {
        let config = ClientConfig::new(Credentials::new("tenant", "client", "secret"));
        assert!(config.use_immutable_ids);
        assert_eq!(config.retry, RetryBudget::default());
        assert_eq!(config.credentials.scope, DEFAULT_SCOPE);
        assert_eq!(config.base_url, DEFAULT_GRAPH_BASE);
        assert_eq!(config.upload_chunk_size, 4 * 1024 * 1024);
        assert!(config.throttle_callback.is_none());
    }

    #[test]
    fn validate_rejects_blank_credentials() {
        let config = ClientConfig::new(Credentials::new("tenant", " ", "secret"));
        assert!(matches!(config.validate(), Err(MailError::Validation(_))));
    }

    #[test]
    fn validate_rejects_zero_chunk_size() {
        let config =
            ClientConfig::new(Credentials::new("t", "c", "s")).with_upload_chunk_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let creds = Credentials::new("tenant", "client", "super-secret");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn normalized_base_trims_trailing_slash() {
        let config = ClientConfig::new(Credentials::new("t", "c", "s"))
            .with_base_url("http://localhost:8080/v1.0/");
        assert_eq!(config.normalized_base(), "http://localhost:8080/v1.0");
    }

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(!parse_flag("off").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
