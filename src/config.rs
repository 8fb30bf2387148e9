/*
 * Responsibility
 * - Environment value lookup (trim, fail loudly when missing or blank)
 * - Service configuration loaded at startup (origins, telemetry credentials, etc.)
 * - Deployment environment tag (AppEnv)
 */
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Source of named configuration values.
///
/// The process environment is the production source; tests inject a map so they
/// never touch process-wide state.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from the real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvSource for HashMap<&str, &str> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(String),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "Config value {} is not specified", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Look up `name` in the process environment.
///
/// Returns the value with surrounding whitespace removed. A missing value, or one
/// that is empty after trimming, is an error.
pub fn get_from_env(name: &str) -> Result<String, ConfigError> {
    get_from(&ProcessEnv, name)
}

/// Same as [`get_from_env`], against an arbitrary source.
pub fn get_from<S: EnvSource + ?Sized>(source: &S, name: &str) -> Result<String, ConfigError> {
    let value = source
        .var(name)
        .ok_or_else(|| ConfigError::Missing(name.to_string()))?;

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Missing(name.to_string()));
    }

    Ok(trimmed.to_string())
}

fn get_optional<S: EnvSource + ?Sized>(source: &S, name: &str) -> Option<String> {
    get_from(source, name).ok()
}

fn get_flag<S: EnvSource + ?Sized>(
    source: &S,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get_optional(source, name) {
        None => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(name)),
        },
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Local,
    Test,
    Staging,
    Production,
}

impl AppEnv {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" | "development" | "dev" => Some(Self::Local),
            "test" => Some(Self::Test),
            "staging" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn from_source<S: EnvSource + ?Sized>(source: &S) -> Result<Self, ConfigError> {
        match get_optional(source, "APP_ENV") {
            None => Ok(Self::Local),
            Some(raw) => Self::parse(&raw).ok_or(ConfigError::Invalid("APP_ENV")),
        }
    }

    /// Staging and production run behind the load balancer; everything else is a
    /// developer machine or a test harness.
    pub fn is_on_server(&self) -> bool {
        matches!(self, Self::Staging | Self::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for remote log shipping and error reporting.
#[derive(Clone)]
pub struct RemoteTelemetryConfig {
    pub loggly_token: String,
    pub loggly_subdomain: String,
    pub rollbar_token: String,
}

impl fmt::Debug for RemoteTelemetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTelemetryConfig")
            .field("loggly_token", &"<redacted>")
            .field("loggly_subdomain", &self.loggly_subdomain)
            .field("rollbar_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub service_name: String,

    pub allowed_origins: Vec<String>,
    pub parse_json_body: bool,
    pub https_exception_paths: Vec<String>,

    pub logging_disabled: bool,
    // Only present when running on a server.
    pub remote_telemetry: Option<RemoteTelemetryConfig>,

    pub api_gateway_host: Option<String>,

    pub migration_tool: String,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source<S: EnvSource + ?Sized>(source: &S) -> Result<Self, ConfigError> {
        let port: u16 = match get_optional(source, "PORT") {
            None => 3000,
            Some(p) => p.parse().map_err(|_| ConfigError::Invalid("PORT"))?,
        };

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::from_source(source)?;
        let service_name = get_from(source, "SERVICE_NAME")?;

        let allowed_origins = get_optional(source, "ORIGINS")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let parse_json_body = get_flag(source, "PARSE_JSON_BODY", true)?;

        let https_exception_paths = get_optional(source, "HTTPS_EXCEPTION_PATHS")
            .map(|v| split_list(&v))
            .unwrap_or_else(|| vec!["/check".to_string()]);

        let logging_disabled = get_flag(source, "LOGGING_DISABLED", false)?;

        let remote_telemetry = if app_env.is_on_server() {
            Some(RemoteTelemetryConfig {
                loggly_token: get_from(source, "LOGGLY_TOKEN")?,
                loggly_subdomain: get_from(source, "LOGGLY_SUBDOMAIN")?,
                rollbar_token: get_from(source, "ROLLBAR_TOKEN")?,
            })
        } else {
            None
        };

        let api_gateway_host = get_optional(source, "API_GATEWAY_HOST");

        let migration_tool = get_optional(source, "MIGRATION_TOOL")
            .unwrap_or_else(|| crate::services::migrations::DEFAULT_MIGRATION_TOOL.to_string());
        let run_migrations = get_flag(source, "RUN_MIGRATIONS", false)?;

        Ok(Self {
            addr,
            app_env,
            service_name,
            allowed_origins,
            parse_json_body,
            https_exception_paths,
            logging_disabled,
            remote_telemetry,
            api_gateway_host,
            migration_tool,
            run_migrations,
        })
    }
}
