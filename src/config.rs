//! Worker configuration.
//!
//! Static configuration comes from a TOML file with `${ENV_VAR}` substitution;
//! deployment-level knobs (topic names, the kill switch) come straight from
//! the process environment and are read once at startup.
//!
//! # Example
//!
//! ```toml
//! [redis]
//! url = "${REDIS_URL}"
//!
//! [database]
//! url = "${DATABASE_URL}"
//!
//! [search]
//! provider = "meilisearch"
//! url = "http://localhost:7700"
//! api_key = "${MEILISEARCH_API_KEY}"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,

    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "postgres://localhost:5432/dinner_done_better".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            consumer_group: default_consumer_group(),
        }
    }
}

fn default_consumer_group() -> String {
    "ddb_workers".to_string()
}

/// Search backend configuration. Provider "none" disables indexing while the
/// index worker keeps draining its topic.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_provider_none")]
    pub provider: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub api_key: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_none(),
            url: String::new(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default = "default_provider_none")]
    pub provider: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_from_address")]
    pub from_address: String,

    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_none(),
            api_key: String::new(),
            from_address: default_from_address(),
            from_name: default_from_name(),
        }
    }
}

fn default_from_address() -> String {
    "noreply@dinnerdonebetter.dev".to_string()
}

fn default_from_name() -> String {
    "Dinner Done Better".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_provider_none")]
    pub provider: String,

    #[serde(default = "default_posthog_host")]
    pub host: String,

    #[serde(default)]
    pub api_key: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_none(),
            host: default_posthog_host(),
            api_key: String::new(),
        }
    }
}

fn default_posthog_host() -> String {
    "https://app.posthog.com".to_string()
}

fn default_provider_none() -> String {
    "none".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Base URL of the public frontend, used in email links.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            public_url: default_public_url(),
        }
    }
}

fn default_public_url() -> String {
    "https://www.dinnerdonebetter.dev".to_string()
}

impl ServiceConfig {
    /// Load configuration from the default path or DDB_WORKERS_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("DDB_WORKERS_CONFIG").unwrap_or_else(|_| "config/workers.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        let config: ServiceConfig = toml::from_str(&content)?;

        config.validate()?;

        info!(
            search_provider = %config.search.provider,
            email_provider = %config.email.provider,
            analytics_provider = %config.analytics.provider,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.search.provider.as_str() {
            "none" => {}
            "meilisearch" => {
                if !self.search.url.starts_with("http://")
                    && !self.search.url.starts_with("https://")
                {
                    return Err(ConfigError::ValidationError(
                        "search.url must start with http:// or https://".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "search.provider must be 'meilisearch' or 'none', got '{other}'"
                )));
            }
        }

        match self.email.provider.as_str() {
            "none" => {}
            "sendgrid" => {
                if self.email.api_key.is_empty() || self.email.api_key.contains("${") {
                    return Err(ConfigError::ValidationError(
                        "email.api_key is required when email.provider is 'sendgrid'".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "email.provider must be 'sendgrid' or 'none', got '{other}'"
                )));
            }
        }

        match self.analytics.provider.as_str() {
            "none" => {}
            "posthog" => {
                if self.analytics.api_key.is_empty() || self.analytics.api_key.contains("${") {
                    return Err(ConfigError::ValidationError(
                        "analytics.api_key is required when analytics.provider is 'posthog'"
                            .to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "analytics.provider must be 'posthog' or 'none', got '{other}'"
                )));
            }
        }

        if !self.app.public_url.starts_with("http://")
            && !self.app.public_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(
                "app.public_url must start with http:// or https://".to_string(),
            ));
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

/// Deployment knobs read from the process environment at startup.
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    /// When true the workers refuse to handle anything. Kill switch for
    /// incident response; flipped without a redeploy.
    pub cease_operation: bool,

    pub data_changes_topic: String,
    pub outbound_emails_topic: String,
    pub search_indexing_topic: String,
    pub webhook_execution_topic: String,
    pub user_aggregator_topic: String,
}

impl RuntimeEnv {
    pub fn from_env() -> Self {
        Self {
            cease_operation: env::var("CEASE_OPERATION")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            data_changes_topic: env_or("DATA_CHANGES_TOPIC_NAME", "data_changes"),
            outbound_emails_topic: env_or("OUTBOUND_EMAILS_TOPIC_NAME", "outbound_emails"),
            search_indexing_topic: env_or("SEARCH_INDEXING_TOPIC_NAME", "search_index_requests"),
            webhook_execution_topic: env_or(
                "WEBHOOK_EXECUTION_REQUESTS_TOPIC_NAME",
                "webhook_execution_requests",
            ),
            user_aggregator_topic: env_or("USER_AGGREGATOR_TOPIC_NAME", "user_data_aggregator"),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_WORKERS_VAR", "substituted_value");
        let input = "url = \"${TEST_WORKERS_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("TEST_WORKERS_VAR");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.worker.consumer_group, "ddb_workers");
        assert_eq!(config.search.provider, "none");
        assert_eq!(config.email.provider, "none");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_search_section() {
        let toml = r#"
            [search]
            provider = "meilisearch"
            url = "http://localhost:7700"
            api_key = "masterKey"
        "#;

        let config: ServiceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.search.provider, "meilisearch");
        assert_eq!(config.search.url, "http://localhost:7700");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_unknown_search_provider() {
        let toml = r#"
            [search]
            provider = "elasticsearch"
        "#;

        let config: ServiceConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_sendgrid_requires_api_key() {
        let toml = r#"
            [email]
            provider = "sendgrid"
        "#;

        let config: ServiceConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runtime_env_defaults() {
        // relies on these vars being unset in the test environment
        let env = RuntimeEnv::from_env();
        assert_eq!(env.data_changes_topic, "data_changes");
        assert_eq!(env.webhook_execution_topic, "webhook_execution_requests");
        assert!(!env.cease_operation);
    }
}
