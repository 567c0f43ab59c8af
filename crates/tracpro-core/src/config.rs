//! Application configuration loaded from environment variables.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for env var {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub rapidpro_base_url: String,
    pub rapidpro_api_token: String,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub client_timeout_secs: u64,
    pub client_max_retries: u32,
    pub client_retry_backoff_base_ms: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[redacted]")
            .field("rapidpro_base_url", &self.rapidpro_base_url)
            .field("rapidpro_api_token", &"[redacted]")
            .field("log_level", &self.log_level)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("client_timeout_secs", &self.client_timeout_secs)
            .field("client_max_retries", &self.client_max_retries)
            .field(
                "client_retry_backoff_base_ms",
                &self.client_retry_backoff_base_ms,
            )
            .finish()
    }
}

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// The parsing/validation logic is decoupled from the actual environment so
/// it can be tested with a pure `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default =
        |var: &str, default: &str| -> String { lookup(var).unwrap_or_else(|_| default.to_string()) };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    Ok(AppConfig {
        database_url: require("DATABASE_URL")?,
        rapidpro_base_url: or_default("RAPIDPRO_BASE_URL", "https://app.rapidpro.io/api/v1"),
        rapidpro_api_token: require("RAPIDPRO_API_TOKEN")?,
        log_level: or_default("TRACPRO_LOG_LEVEL", "info"),
        db_max_connections: parse_u32("TRACPRO_DB_MAX_CONNECTIONS", "10")?,
        db_min_connections: parse_u32("TRACPRO_DB_MIN_CONNECTIONS", "1")?,
        db_acquire_timeout_secs: parse_u64("TRACPRO_DB_ACQUIRE_TIMEOUT_SECS", "10")?,
        client_timeout_secs: parse_u64("TRACPRO_CLIENT_TIMEOUT_SECS", "30")?,
        client_max_retries: parse_u32("TRACPRO_CLIENT_MAX_RETRIES", "3")?,
        client_retry_backoff_base_ms: parse_u64("TRACPRO_CLIENT_RETRY_BACKOFF_BASE_MS", "1000")?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::env::VarError;

    use super::*;

    fn lookup<'a>(
        vars: &'a HashMap<&'a str, &'a str>,
    ) -> impl Fn(&str) -> Result<String, VarError> + 'a {
        move |key| vars.get(key).map(|v| (*v).to_string()).ok_or(VarError::NotPresent)
    }

    fn minimal_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/tracpro"),
            ("RAPIDPRO_API_TOKEN", "token-123"),
        ])
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let config = build_app_config(lookup(&minimal_env())).expect("valid config");
        assert_eq!(config.rapidpro_base_url, "https://app.rapidpro.io/api/v1");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.client_max_retries, 3);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let mut vars = minimal_env();
        vars.remove("DATABASE_URL");
        let err = build_app_config(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(var) if var == "DATABASE_URL"));
    }

    #[test]
    fn invalid_numeric_value_is_an_error() {
        let mut vars = minimal_env();
        vars.insert("TRACPRO_DB_MAX_CONNECTIONS", "lots");
        let err = build_app_config(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { var, .. }
            if var == "TRACPRO_DB_MAX_CONNECTIONS"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = build_app_config(lookup(&minimal_env())).expect("valid config");
        let debug = format!("{config:?}");
        assert!(!debug.contains("token-123"));
        assert!(!debug.contains("postgres://"));
    }
}
