use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

const DEFAULT_SEQUENCE_RETRY_LIMIT: u32 = 5;
const MAX_SEQUENCE_RETRY_LIMIT: u32 = 50;
const DEFAULT_INSTITUTE_NAME: &str = "Institute Admissions Office";

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
    pub ledger: LedgerConfig,
    pub notifications: NotificationConfig,
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

        let sequence_retry_limit = match env::var("APP_SEQUENCE_RETRY_LIMIT") {
            Ok(raw) => parse_retry_limit(&raw)?,
            Err(_) => DEFAULT_SEQUENCE_RETRY_LIMIT,
        };

        let institute_name = env::var("APP_INSTITUTE_NAME")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_INSTITUTE_NAME.to_string());

        let bcc_address = match env::var("APP_NOTIFY_BCC") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_mailbox(&raw)?),
            _ => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            ledger: LedgerConfig {
                sequence_retry_limit,
            },
            notifications: NotificationConfig {
                institute_name,
                bcc_address,
            },
        })
    }
}

fn parse_retry_limit(raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(limit) if (1..=MAX_SEQUENCE_RETRY_LIMIT).contains(&limit) => Ok(limit),
        _ => Err(ConfigError::InvalidRetryLimit),
    }
}

fn parse_mailbox(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(trimmed.to_string())
        }
        _ => Err(ConfigError::InvalidMailbox {
            value: trimmed.to_string(),
        }),
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

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for identifier issuance.
#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    pub sequence_retry_limit: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sequence_retry_limit: DEFAULT_SEQUENCE_RETRY_LIMIT,
        }
    }
}

/// Outbound email presentation settings.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub institute_name: String,
    pub bcc_address: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            institute_name: DEFAULT_INSTITUTE_NAME.to_string(),
            bcc_address: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidRetryLimit,
    InvalidMailbox { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidRetryLimit => write!(
                f,
                "APP_SEQUENCE_RETRY_LIMIT must be between 1 and {MAX_SEQUENCE_RETRY_LIMIT}"
            ),
            ConfigError::InvalidMailbox { value } => {
                write!(f, "APP_NOTIFY_BCC '{value}' is not an email address")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidRetryLimit
            | ConfigError::InvalidMailbox { .. } => None,
        }
    }
}

/// Serialises tests that read or write process environment variables.
#[cfg(test)]
pub(crate) fn env_guard() -> &'static std::sync::Mutex<()> {
    static GUARD: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    GUARD.get_or_init(|| std::sync::Mutex::new(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("APP_SEQUENCE_RETRY_LIMIT");
        env::remove_var("APP_INSTITUTE_NAME");
        env::remove_var("APP_NOTIFY_BCC");
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
        assert_eq!(config.ledger.sequence_retry_limit, 5);
        assert_eq!(config.notifications.institute_name, DEFAULT_INSTITUTE_NAME);
        assert!(config.notifications.bcc_address.is_none());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn rejects_out_of_range_retry_limit() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_SEQUENCE_RETRY_LIMIT", "0");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidRetryLimit)
        ));
        env::set_var("APP_SEQUENCE_RETRY_LIMIT", "12");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.ledger.sequence_retry_limit, 12);
        reset_env();
    }

    #[test]
    fn validates_bcc_mailbox() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_NOTIFY_BCC", "front-desk");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidMailbox { .. })
        ));
        env::set_var("APP_NOTIFY_BCC", " office@institute.example ");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(
            config.notifications.bcc_address.as_deref(),
            Some("office@institute.example")
        );
        reset_env();
    }
}
