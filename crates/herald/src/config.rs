use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::delivery::RetryPolicy;
use crate::session::{DriverConfig, ManagerConfig};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "herald.yaml";

/// Environment name that hides internal error detail from HTTP responses.
pub const PRODUCTION: &str = "production";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("environment variable '{name}' has invalid value '{value}'")]
    InvalidEnvVar { name: String, value: String },

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    /// Load the config file (missing file means defaults), then apply
    /// environment overrides.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => Some(c),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::from_sources(contents.as_deref(), |name| std::env::var(name).ok())
    }

    /// Build a config from optional YAML text and an environment lookup.
    pub fn from_sources<F>(yaml: Option<&str>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match yaml {
            Some(contents) => {
                let expanded = expand_env_vars(contents, &lookup)?;
                serde_saphyr::from_str(&expanded)?
            }
            None => Self::default(),
        };
        config.apply_env(&lookup)?;
        Ok(config)
    }

    /// Override individual fields from well-known environment variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = parse_env(&get, env::PORT)? {
            self.server.port = port;
        }
        if let Some(environment) = get(env::ENVIRONMENT) {
            self.server.environment = environment;
        }
        if let Some(url) = get(env::SESSION_STORE_URL) {
            self.session.store_url = Some(url);
        }
        if let Some(seconds) = parse_env(&get, env::SESSION_LIFETIME_SECONDS)? {
            self.session.lifetime_seconds = seconds;
        }
        if let Some(recipient) = get(env::ADMIN_RECIPIENT) {
            self.notify.admin_recipient = Some(recipient);
        }
        if let Some(url) = get(env::WEBHOOK_URL) {
            self.notify.webhook_url = Some(url);
        }
        if let Some(ms) = parse_env(&get, env::MESSAGE_DELAY_MS)? {
            self.delivery.message_delay_ms = ms;
        }
        if let Some(retries) = parse_env(&get, env::MAX_RETRIES)? {
            self.delivery.max_retries = retries;
        }
        if let Some(ms) = parse_env(&get, env::RETRY_DELAY_MS)? {
            self.delivery.retry_delay_ms = ms;
        }
        if let Some(concurrency) = parse_env(&get, env::QUEUE_CONCURRENCY)? {
            self.delivery.concurrency = concurrency;
        }
        Ok(())
    }
}

/// Environment variables that override config file values.
pub mod env {
    pub const PORT: &str = "PORT";
    pub const ENVIRONMENT: &str = "HERALD_ENV";
    pub const SESSION_STORE_URL: &str = "HERALD_SESSION_STORE_URL";
    pub const ADMIN_RECIPIENT: &str = "HERALD_ADMIN_RECIPIENT";
    pub const WEBHOOK_URL: &str = "HERALD_WEBHOOK_URL";
    pub const SESSION_LIFETIME_SECONDS: &str = "HERALD_SESSION_LIFETIME_SECONDS";
    pub const MESSAGE_DELAY_MS: &str = "HERALD_MESSAGE_DELAY_MS";
    pub const MAX_RETRIES: &str = "HERALD_MAX_RETRIES";
    pub const RETRY_DELAY_MS: &str = "HERALD_RETRY_DELAY_MS";
    pub const QUEUE_CONCURRENCY: &str = "HERALD_QUEUE_CONCURRENCY";
}

fn parse_env<T, F>(get: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = get(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnvVar {
            name: name.to_string(),
            value,
        })
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_request_timeout() -> u64 {
    180
}

fn default_send_wait() -> u64 {
    30
}

fn default_driver_command() -> String {
    "herald-driver".to_string()
}

fn default_init_timeout() -> u64 {
    120
}

fn default_send_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_message_delay() -> u64 {
    1000
}

fn default_concurrency() -> usize {
    1
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$` (only needed before `{` to prevent expansion)
///
/// No nested expansion: `${VAR:-${DEFAULT}}` is not supported.
///
/// ```yaml
/// session:
///   store_url: ${MONGODB_URI}
/// notify:
///   admin_recipient: ${ADMIN_PHONE:-}
/// ```
fn expand_env_vars<F>(input: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                let expanded = parse_var_reference(&mut chars, lookup)?;
                result.push_str(&expanded);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
fn parse_var_reference<F>(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    lookup: &F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;

    loop {
        match chars.next() {
            None => return Err(ConfigError::UnclosedVarReference),
            Some('}') => break,
            Some(':') if default_value.is_none() && chars.peek() == Some(&'-') => {
                chars.next();
                default_value = Some(String::new());
            }
            Some(c) => match default_value.as_mut() {
                Some(default) => default.push(c),
                None => var_name.push(c),
            },
        }
    }

    match (lookup(&var_name), default_value) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deployment environment. `production` hides error detail.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// How long `POST /messages` waits for the outcome before answering
    /// `queued`.
    #[serde(default = "default_send_wait")]
    pub send_wait_seconds: u64,
    /// Optional admin API token. If set, admin endpoints require this token.
    /// If not set, admin endpoints only accept requests from localhost.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            request_timeout_seconds: default_request_timeout(),
            send_wait_seconds: default_send_wait(),
            admin_token: None,
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case(PRODUCTION)
    }

    pub fn send_wait(&self) -> Duration {
        Duration::from_secs(self.send_wait_seconds)
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub driver: DriverSection,
    /// Connection string of the persistent session store, handed to the driver.
    #[serde(default)]
    pub store_url: Option<String>,
    /// Destroy the session this long after it becomes ready. 0 disables.
    #[serde(default)]
    pub lifetime_seconds: u64,
    #[serde(default = "default_init_timeout")]
    pub init_timeout_seconds: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: DriverSection::default(),
            store_url: None,
            lifetime_seconds: 0,
            init_timeout_seconds: default_init_timeout(),
            send_timeout_seconds: default_send_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            init_timeout: Duration::from_secs(self.init_timeout_seconds),
            lifetime: Duration::from_secs(self.lifetime_seconds),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_seconds)
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            command: self.driver.command.clone(),
            args: self.driver.args.clone(),
            env: self.driver.env.clone(),
            store_url: self.store_url.clone(),
        }
    }
}

/// The session driver process.
#[derive(Debug, Deserialize)]
pub struct DriverSection {
    #[serde(default = "default_driver_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            command: default_driver_command(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

// ============================================================================
// DeliveryConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Pause between batches.
    #[serde(default = "default_message_delay")]
    pub message_delay_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            message_delay_ms: default_message_delay(),
            concurrency: default_concurrency(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            inter_batch_delay: Duration::from_millis(self.message_delay_ms),
            concurrency: self.concurrency,
        }
    }
}

// ============================================================================
// NotifyConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct NotifyConfig {
    /// Default recipient of `POST /messages` when `to` is omitted.
    #[serde(default)]
    pub admin_recipient: Option<String>,
    /// Lifecycle events are POSTed here when set.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
