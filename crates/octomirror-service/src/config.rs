//! Service configuration: file-based defaults with the documented
//! environment variables layered on top.

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Full service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub github: GitHubSettings,
    pub queue: QueueSettings,
    pub sync: SyncSettings,
    pub logging: LoggingConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// GitHub app credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: String,
    pub app_id: Option<String>,
    pub app_private_key: Option<String>,
    pub app_slug: Option<String>,
    /// Public base URL of this deployment
    pub base_url: String,
    /// Permit webhook registration against loopback/private base URLs
    pub allow_local_webhook_registration: bool,
    /// GitHub API origin, overridable for tests and GitHub Enterprise
    pub api_url: String,
    /// GitHub web origin for the OAuth flow
    pub web_url: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_secret: String::new(),
            app_id: None,
            app_private_key: None,
            app_slug: None,
            base_url: "http://localhost:8080".to_string(),
            allow_local_webhook_registration: false,
            api_url: "https://api.github.com".to_string(),
            web_url: "https://github.com".to_string(),
        }
    }
}

/// Webhook queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub lease_horizon_secs: i64,
    pub processed_retention_hours: i64,
    pub dead_letter_retention_days: i64,
    pub cleanup_batch_limit: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            batch_size: 10,
            poll_interval_ms: 500,
            base_delay_ms: 2_000,
            max_delay_ms: 300_000,
            lease_horizon_secs: 300,
            processed_retention_hours: 24,
            dead_letter_retention_days: 7,
            cleanup_batch_limit: 500,
            cleanup_interval_secs: 600,
        }
    }
}

/// Pull-sync tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Bounded parallelism for per-repo work
    pub parallelism: usize,
    /// Stale-`syncing` recovery threshold in seconds
    pub stale_threshold_secs: i64,
    /// Local user the single mirrored account maps to
    pub primary_user: String,
    /// Operator token guarding the webhook management endpoints
    pub ops_token: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            parallelism: 4,
            stale_threshold_secs: 300,
            primary_user: "primary".to_string(),
            ops_token: String::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration: `octomirror.toml` (optional) under defaults,
    /// then the documented environment variables on top
    pub fn load() -> Result<Self, config::ConfigError> {
        let file = config::Config::builder()
            .add_source(config::File::with_name("octomirror").required(false))
            .build()?;
        let mut settings: ServiceConfig = file.try_deserialize()?;
        settings.apply_env();
        Ok(settings)
    }

    /// Overlay the environment variables GitHub integrations conventionally
    /// use
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("GITHUB_CLIENT_ID") {
            self.github.client_id = value;
        }
        if let Ok(value) = std::env::var("GITHUB_CLIENT_SECRET") {
            self.github.client_secret = value;
        }
        if let Ok(value) = std::env::var("GITHUB_WEBHOOK_SECRET") {
            self.github.webhook_secret = value;
        }
        if let Ok(value) = std::env::var("GITHUB_APP_ID") {
            self.github.app_id = Some(value);
        }
        if let Ok(value) = std::env::var("GITHUB_APP_PRIVATE_KEY") {
            self.github.app_private_key = Some(value);
        }
        if let Ok(value) = std::env::var("GITHUB_APP_SLUG") {
            self.github.app_slug = Some(value);
        }
        if let Ok(value) = std::env::var("BASE_URL") {
            self.github.base_url = value;
        }
        if let Ok(value) = std::env::var("ALLOW_LOCAL_WEBHOOK_REGISTRATION") {
            self.github.allow_local_webhook_registration =
                matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var("WEBHOOK_OPS_TOKEN") {
            self.sync.ops_token = value;
        }
    }
}
