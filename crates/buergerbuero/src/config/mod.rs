use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::permits::{DispatchConfig, EventSettings, RetryPolicy};

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
    pub events: EventConfig,
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            events: EventConfig::from_env()?,
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Event envelope identity and dispatcher tuning.
#[derive(Debug, Clone)]
pub struct EventConfig {
    pub service_name: String,
    pub minimum_event_id: u32,
    pub queue_capacity: usize,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub dead_letter_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        let settings = EventSettings::default();
        let dispatch = DispatchConfig::default();
        Self {
            service_name: settings.service_name,
            minimum_event_id: settings.minimum_event_id,
            queue_capacity: dispatch.queue_capacity,
            max_retries: dispatch.retry.max_retries,
            retry_base_delay: dispatch.retry.initial_delay,
            dead_letter_capacity: dispatch.dead_letter_capacity,
        }
    }
}

impl EventConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let service_name = match env::var("EVENT_SERVICE_NAME") {
            Ok(name) if name.trim().is_empty() => return Err(ConfigError::EmptyServiceName),
            Ok(name) => name.trim().to_string(),
            Err(_) => defaults.service_name,
        };
        let queue_capacity = parse_positive("EVENT_QUEUE_CAPACITY", defaults.queue_capacity)?;
        let dead_letter_capacity = parse_positive(
            "EVENT_DEAD_LETTER_CAPACITY",
            defaults.dead_letter_capacity,
        )?;
        let retry_base_ms = parse_var(
            "EVENT_RETRY_BASE_MS",
            defaults.retry_base_delay.as_millis() as u64,
        )?;

        Ok(Self {
            service_name,
            minimum_event_id: parse_var("EVENT_MINIMUM_ID", defaults.minimum_event_id)?,
            queue_capacity,
            max_retries: parse_var("EVENT_MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay: Duration::from_millis(retry_base_ms),
            dead_letter_capacity,
        })
    }

    pub fn settings(&self) -> EventSettings {
        EventSettings {
            service_name: self.service_name.clone(),
            minimum_event_id: self.minimum_event_id,
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            queue_capacity: self.queue_capacity,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                initial_delay: self.retry_base_delay,
                ..RetryPolicy::default()
            },
            dead_letter_capacity: self.dead_letter_capacity,
        }
    }
}

fn parse_var<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(default),
    }
}

fn parse_positive(variable: &'static str, default: usize) -> Result<usize, ConfigError> {
    match parse_var(variable, default)? {
        0 => Err(ConfigError::InvalidNumber { variable }),
        value => Ok(value),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
    EmptyServiceName,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a positive integer")
            }
            ConfigError::EmptyServiceName => write!(f, "EVENT_SERVICE_NAME must not be blank"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::EmptyServiceName => None,
        }
    }
}
