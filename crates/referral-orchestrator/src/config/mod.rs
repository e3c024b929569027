use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::referral::{
    ActionableQuery, BackoffPolicy, DecisionConfig, RetryableReasons, UnknownValue, VendorOption,
};

/// Delays configured for idempotent executor lookups: one per retry.
const LOOKUP_RETRY_COUNT: usize = 2;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = match env::var("APP_LOG_FORMAT") {
            Ok(value) => LogFormat::parse(&value)?,
            Err(_) => LogFormat::Compact,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                format: log_format,
            },
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidLogFormat(value.to_string())),
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Tunables for the lifecycle passes and the decision engine.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub decision: DecisionConfig,
    pub retryable: RetryableReasons,
    pub completed_mode: ActionableQuery,
    pub lookup_backoff: BackoffPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decision: DecisionConfig::default(),
            retryable: RetryableReasons::default(),
            completed_mode: ActionableQuery::Initial,
            lookup_backoff: BackoffPolicy::default(),
        }
    }
}

impl PipelineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = non_empty_var("PIPELINE_VENDORS") {
            config.decision.vendors = raw
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| entry.parse::<VendorOption>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(ConfigError::InvalidVendor)?;
        }

        if let Some(raw) = non_empty_var("PIPELINE_RETRYABLE_REASONS") {
            config.retryable = RetryableReasons::new(raw.split(','));
        }

        if let Some(raw) = non_empty_var("PIPELINE_REQUIRE_NEW_QUESTIONNAIRE") {
            config.completed_mode = if parse_flag("PIPELINE_REQUIRE_NEW_QUESTIONNAIRE", &raw)? {
                ActionableQuery::NewQuestionnaire
            } else {
                ActionableQuery::Initial
            };
        }

        if let Some(raw) = non_empty_var("PIPELINE_LOOKUP_BACKOFF_MS") {
            let delays = raw
                .split(',')
                .map(|value| value.trim().parse::<u64>().map(Duration::from_millis))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| ConfigError::InvalidBackoff(raw.clone()))?;
            if delays.len() != LOOKUP_RETRY_COUNT {
                return Err(ConfigError::InvalidBackoff(raw));
            }
            config.lookup_backoff = BackoffPolicy::new(delays);
        }

        if let Some(raw) = non_empty_var("PIPELINE_MAX_BENEFITS") {
            config.decision.max_authorized_benefits = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidMaxBenefits(raw.clone()))?;
        }

        Ok(config)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            key,
            value: value.to_string(),
        }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidLogFormat(String),
    InvalidVendor(UnknownValue),
    InvalidBackoff(String),
    InvalidMaxBenefits(String),
    InvalidFlag { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidLogFormat(value) => {
                write!(f, "APP_LOG_FORMAT must be 'compact' or 'json', got '{value}'")
            }
            ConfigError::InvalidVendor(err) => {
                write!(f, "PIPELINE_VENDORS entries must be name:benefit|benefit ({err})")
            }
            ConfigError::InvalidBackoff(value) => write!(
                f,
                "PIPELINE_LOOKUP_BACKOFF_MS must be {LOOKUP_RETRY_COUNT} comma-separated millisecond delays, got '{value}'"
            ),
            ConfigError::InvalidMaxBenefits(value) => {
                write!(f, "PIPELINE_MAX_BENEFITS must be a valid u32, got '{value}'")
            }
            ConfigError::InvalidFlag { key, value } => {
                write!(f, "{key} must be true or false, got '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidVendor(err) => Some(err),
            ConfigError::InvalidPort
            | ConfigError::InvalidLogFormat(_)
            | ConfigError::InvalidBackoff(_)
            | ConfigError::InvalidMaxBenefits(_)
            | ConfigError::InvalidFlag { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::referral::FoodBenefit;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "APP_LOG_FORMAT",
            "PIPELINE_VENDORS",
            "PIPELINE_RETRYABLE_REASONS",
            "PIPELINE_REQUIRE_NEW_QUESTIONNAIRE",
            "PIPELINE_LOOKUP_BACKOFF_MS",
            "PIPELINE_MAX_BENEFITS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.telemetry.format, LogFormat::Compact);
        assert_eq!(config.pipeline.completed_mode, ActionableQuery::Initial);
        assert_eq!(config.pipeline.decision.max_authorized_benefits, 2);
        assert!(config.pipeline.retryable.contains("executor_timeout"));
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn reads_pipeline_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PIPELINE_VENDORS", "green_crate:grocery_box, meal_co:mtm");
        env::set_var("PIPELINE_RETRYABLE_REASONS", "executor_timeout");
        env::set_var("PIPELINE_REQUIRE_NEW_QUESTIONNAIRE", "true");
        env::set_var("PIPELINE_LOOKUP_BACKOFF_MS", "0,5");
        env::set_var("PIPELINE_MAX_BENEFITS", "3");
        env::set_var("APP_LOG_FORMAT", "json");

        let config = AppConfig::load().expect("config loads");
        reset_env();

        let pipeline = config.pipeline;
        assert_eq!(pipeline.decision.vendors.len(), 2);
        assert!(pipeline.decision.vendors[0].supports(FoodBenefit::GroceryBox));
        assert!(pipeline.decision.is_configured_vendor("meal_co"));
        assert!(!pipeline.retryable.contains("missing_questionnaire"));
        assert_eq!(pipeline.completed_mode, ActionableQuery::NewQuestionnaire);
        assert_eq!(
            pipeline.lookup_backoff.delays(),
            &[Duration::from_millis(0), Duration::from_millis(5)]
        );
        assert_eq!(pipeline.decision.max_authorized_benefits, 3);
        assert_eq!(config.telemetry.format, LogFormat::Json);
    }

    #[test]
    fn rejects_malformed_pipeline_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PIPELINE_VENDORS", "meal_co:soup");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidVendor(_))
        ));

        reset_env();
        env::set_var("PIPELINE_REQUIRE_NEW_QUESTIONNAIRE", "sometimes");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidFlag { .. })
        ));

        reset_env();
        env::set_var("PIPELINE_LOOKUP_BACKOFF_MS", "fast");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidBackoff(_))
        ));

        for raw in ["0,5,9", "250"] {
            reset_env();
            env::set_var("PIPELINE_LOOKUP_BACKOFF_MS", raw);
            match AppConfig::load() {
                Err(ConfigError::InvalidBackoff(value)) => assert_eq!(value, raw),
                other => panic!("expected backoff rejection for {raw}, got {other:?}"),
            }
        }
        reset_env();
    }
}
