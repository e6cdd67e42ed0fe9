//! Configuration management for Chatgate.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `CHATGATE__<SECTION>__<FIELD>` environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{ChatGateError, Result};

/// Main configuration for the Chatgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatGateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Opening hours of the chat
    #[serde(default)]
    pub access_hours: AccessHoursConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Role-protected paths
    #[serde(default)]
    pub roles: RoleConfig,

    /// Request audit log
    #[serde(default)]
    pub request_log: RequestLogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// How often expired rate limit windows are swept, in seconds (0 disables)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Build the request identity from `x-user*` headers. Only safe behind a
    /// proxy that authenticates users and strips these headers from clients.
    #[serde(default)]
    pub trust_identity_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            sweep_interval_secs: default_sweep_interval(),
            trust_identity_headers: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_sweep_interval() -> u64 {
    60
}

/// Half-open range of local hours during which the chat is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessHoursConfig {
    /// First open hour (inclusive)
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,

    /// First closed hour (exclusive)
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
}

impl Default for AccessHoursConfig {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
        }
    }
}

fn default_start_hour() -> u32 {
    6
}

fn default_end_hour() -> u32 {
    21
}

/// Longest accepted rate limit window: one week.
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// What the rate limiter does when its store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request
    #[default]
    Open,
    /// Reject the request
    Closed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Length of a fixed window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests admitted per client per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Only paths under this prefix are rate limited
    #[serde(default = "default_rate_limited_prefix")]
    pub path_prefix: String,

    /// Only these HTTP methods are rate limited
    #[serde(default = "default_rate_limited_methods")]
    pub methods: Vec<String>,

    /// Decision taken when the store fails
    #[serde(default)]
    pub on_store_error: FailurePolicy,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            path_prefix: default_rate_limited_prefix(),
            methods: default_rate_limited_methods(),
            on_store_error: FailurePolicy::default(),
        }
    }
}

impl RateLimitingConfig {
    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u64 {
    5
}

fn default_rate_limited_prefix() -> String {
    "/chats".to_string()
}

fn default_rate_limited_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

/// Role-based authorization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Path prefixes that require a privileged user
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,

    /// Group names that grant access to protected paths
    #[serde(default = "default_privileged_groups")]
    pub privileged_groups: Vec<String>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            protected_prefixes: default_protected_prefixes(),
            privileged_groups: default_privileged_groups(),
        }
    }
}

fn default_protected_prefixes() -> Vec<String> {
    vec!["/chats/admin".to_string(), "/chats/moderate".to_string()]
}

fn default_privileged_groups() -> Vec<String> {
    vec!["admin".to_string(), "moderator".to_string()]
}

/// Request audit log configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestLogConfig {
    /// Append audit lines to this file in addition to the console
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl ChatGateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ChatGateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ChatGateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then the optional file, then `CHATGATE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let name = path
                .to_str()
                .ok_or_else(|| ChatGateError::Config(format!("Non UTF-8 path: {}", path.display())))?;
            info!(path = %name, "Loading configuration file");
            builder = builder.add_source(config::File::new(name, config::FileFormat::Yaml));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CHATGATE")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rate_limiting.methods")
                .with_list_parse_key("roles.protected_prefixes")
                .with_list_parse_key("roles.privileged_groups"),
        );

        let config: ChatGateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gates cannot work with.
    pub fn validate(&self) -> Result<()> {
        let hours = &self.access_hours;
        if hours.end_hour > 24 {
            return Err(ChatGateError::Config(format!(
                "access_hours.end_hour must be at most 24, got {}",
                hours.end_hour
            )));
        }
        if hours.start_hour >= hours.end_hour {
            return Err(ChatGateError::Config(format!(
                "access_hours.start_hour ({}) must be before end_hour ({})",
                hours.start_hour, hours.end_hour
            )));
        }

        let limits = &self.rate_limiting;
        if limits.window_secs == 0 {
            return Err(ChatGateError::Config(
                "rate_limiting.window_secs must be positive".to_string(),
            ));
        }
        if limits.window_secs > MAX_WINDOW_SECS {
            return Err(ChatGateError::Config(format!(
                "rate_limiting.window_secs must be at most {}, got {}",
                MAX_WINDOW_SECS, limits.window_secs
            )));
        }
        if limits.max_requests == 0 {
            return Err(ChatGateError::Config(
                "rate_limiting.max_requests must be positive".to_string(),
            ));
        }
        if limits.methods.is_empty() {
            return Err(ChatGateError::Config(
                "rate_limiting.methods must name at least one method".to_string(),
            ));
        }

        Ok(())
    }
}
