use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{split::validate_fee_rate, DEFAULT_FEE_RATE_BPS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Postgres => f.write_str("postgres"),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub fee_rate_bps: i32,
    pub store_timeout: Duration,
    /// Zero disables caching.
    pub cache_ttl: Duration,
    /// When set, collaborator writes must be signed with it.
    pub collaborator_webhook_secret: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            store_backend: StoreBackend::Postgres,
            database_url: None,
            database_max_connections: 10,
            fee_rate_bps: DEFAULT_FEE_RATE_BPS,
            store_timeout: Duration::from_millis(5_000),
            cache_ttl: Duration::from_secs(30),
            collaborator_webhook_secret: None,
            cors_allowed_origins: Vec::new(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Every problem is reported at once.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let mut errors = Vec::new();

        let read = |key: &str| -> Option<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let server_port = parse_or(
            &mut errors,
            "SERVER_PORT",
            read("SERVER_PORT"),
            defaults.server_port,
        );
        let store_backend = parse_or(
            &mut errors,
            "STORE_BACKEND",
            read("STORE_BACKEND"),
            defaults.store_backend,
        );
        let database_max_connections = parse_or(
            &mut errors,
            "DATABASE_MAX_CONNECTIONS",
            read("DATABASE_MAX_CONNECTIONS"),
            defaults.database_max_connections,
        );
        let fee_rate_bps = parse_or(
            &mut errors,
            "FEE_RATE_BPS",
            read("FEE_RATE_BPS"),
            defaults.fee_rate_bps,
        );
        let store_timeout_ms: u64 = parse_or(
            &mut errors,
            "STORE_TIMEOUT_MS",
            read("STORE_TIMEOUT_MS"),
            defaults.store_timeout.as_millis() as u64,
        );
        let cache_ttl_secs: u64 = parse_or(
            &mut errors,
            "CACHE_TTL_SECS",
            read("CACHE_TTL_SECS"),
            defaults.cache_ttl.as_secs(),
        );
        let log_format = parse_or(
            &mut errors,
            "LOG_FORMAT",
            read("LOG_FORMAT"),
            defaults.log_format,
        );

        let config = Config {
            server_port,
            store_backend,
            database_url: read("DATABASE_URL"),
            database_max_connections,
            fee_rate_bps,
            store_timeout: Duration::from_millis(store_timeout_ms),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            collaborator_webhook_secret: read("COLLABORATOR_WEBHOOK_SECRET"),
            cors_allowed_origins: read("CORS_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            log_format,
        };

        errors.extend(config.problems());
        if !errors.is_empty() {
            anyhow::bail!("invalid configuration:\n  {}", errors.join("\n  "));
        }

        Ok(config)
    }

    /// Cross-field checks; empty when the configuration is usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.store_backend == StoreBackend::Postgres && self.database_url.is_none() {
            problems.push("DATABASE_URL is required when STORE_BACKEND=postgres".to_string());
        }
        if let Err(e) = validate_fee_rate(self.fee_rate_bps) {
            problems.push(format!("FEE_RATE_BPS: {}", e));
        }
        if self.store_timeout.is_zero() {
            problems.push("STORE_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.database_max_connections == 0 {
            problems.push("DATABASE_MAX_CONNECTIONS must be greater than zero".to_string());
        }

        problems
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let problems = self.problems();
        if !problems.is_empty() {
            anyhow::bail!("invalid configuration:\n  {}", problems.join("\n  "));
        }
        Ok(())
    }

    pub fn masked_database_url(&self) -> Option<String> {
        self.database_url.as_deref().map(mask_password)
    }
}

fn parse_or<T>(errors: &mut Vec<String>, key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            errors.push(format!("{}: cannot parse '{}': {}", key, raw, e));
            default
        }),
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
