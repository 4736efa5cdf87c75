use std::{env, fmt, net::SocketAddr, path::PathBuf, time::Duration};

use chrono_tz::Tz;

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://iskolar.db";
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    /// Deadline for a single store operation.
    pub store_timeout: Duration,
    /// Replaces the built-in requirement catalog when set.
    pub requirement_catalog_path: Option<PathBuf>,
    /// Zone in which application-window dates are interpreted.
    pub eligibility_timezone: Tz,
    pub seed_demo: bool,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_url = non_empty_var("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let store_timeout = match non_empty_var("STORE_TIMEOUT_MS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(millis) if millis > 0 => Duration::from_millis(millis),
                _ => return Err(ConfigError::InvalidTimeout(raw)),
            },
            None => Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        };

        let requirement_catalog_path = non_empty_var("REQUIREMENT_CATALOG_PATH").map(PathBuf::from);

        let eligibility_timezone = match non_empty_var("ELIGIBILITY_TIMEZONE") {
            Some(raw) => raw
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone(raw))?,
            None => Tz::UTC,
        };

        let seed_demo = match non_empty_var("APP_SEED_DEMO") {
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                name: "APP_SEED_DEMO",
                value: raw,
            })?,
            None => false,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            store_timeout,
            requirement_catalog_path,
            eligibility_timezone,
            seed_demo,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidTimeout(String),
    InvalidTimezone(String),
    InvalidFlag { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidTimeout(value) => write!(
                f,
                "STORE_TIMEOUT_MS must be a positive number of milliseconds (got {value})"
            ),
            Self::InvalidTimezone(value) => {
                write!(f, "ELIGIBILITY_TIMEZONE is not a known IANA time zone (got {value})")
            }
            Self::InvalidFlag { name, value } => {
                write!(f, "{name} must be true or false (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
