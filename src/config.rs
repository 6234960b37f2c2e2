use serde::Deserialize;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::error::{ApiError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Sessions last at most a year.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3333,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Local file path, or a `libsql://` / `https://` URL for a remote database.
    pub url: String,
    pub auth_token: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "data/cohort.db".to_string(),
            auth_token: None,
        }
    }
}

impl DatabaseConfig {
    pub fn is_remote(&self) -> bool {
        ["libsql://", "https://", "http://", "wss://", "ws://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_ttl_hours: i64,
    pub password_min_length: usize,
    pub bootstrap_email: Option<String>,
    pub bootstrap_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: 24,
            password_min_length: 8,
            bootstrap_email: None,
            bootstrap_password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub file_name: String,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_name: "cohort_api.log".to_string(),
            level: "cohort_api=info,tower_http=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Port for the Prometheus exporter. Disabled when unset.
    pub port: Option<u16>,
}

impl Config {
    /// Load `config.toml` (if present) and apply `COHORT_*` environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                ApiError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_toml(&content)?
        } else {
            info!("{} not found, using defaults", path.display());
            Config::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ttl = self.auth.token_ttl_hours;
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&ttl) {
            return Err(ApiError::Config(format!(
                "auth.token_ttl_hours must be between 1 and {MAX_TOKEN_TTL_HOURS}, got {ttl}"
            )));
        }
        Ok(())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(host) = var("COHORT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var("COHORT_PORT")? {
            self.server.port = port;
        }
        if let Some(url) = var("COHORT_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(token) = var("COHORT_DATABASE_AUTH_TOKEN") {
            self.database.auth_token = Some(token);
        }
        if let Some(ttl) = parse_var("COHORT_TOKEN_TTL_HOURS")? {
            self.auth.token_ttl_hours = ttl;
        }
        if let Some(email) = var("COHORT_ADMIN_EMAIL") {
            self.auth.bootstrap_email = Some(email);
        }
        if let Some(password) = var("COHORT_ADMIN_PASSWORD") {
            self.auth.bootstrap_password = Some(password);
        }
        if let Some(dir) = var("COHORT_LOG_DIR") {
            self.logging.directory = dir;
        }
        if let Some(port) = parse_var("COHORT_METRICS_PORT")? {
            self.metrics.port = Some(port);
        }
        Ok(())
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: Display,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| ApiError::Config(format!("Invalid {key} value '{raw}': {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 3333);
        assert_eq!(config.database.url, "data/cohort.db");
        assert_eq!(config.auth.token_ttl_hours, 24);
        assert!(config.metrics.port.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [database]
            url = "libsql://cohort.turso.io"
            auth_token = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.database.is_remote());
        assert_eq!(config.database.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn local_paths_are_not_remote() {
        let config = DatabaseConfig {
            url: "/tmp/cohort.db".into(),
            auth_token: None,
        };
        assert!(!config.is_remote());
    }

    #[test]
    fn token_ttl_must_be_in_range() {
        assert!(Config::from_toml("").unwrap().validate().is_ok());
        for ttl in [0, -5, MAX_TOKEN_TTL_HOURS + 1, i64::MAX] {
            let config = Config::from_toml(&format!("[auth]\ntoken_ttl_hours = {ttl}")).unwrap();
            assert!(
                matches!(config.validate(), Err(ApiError::Config(_))),
                "ttl {ttl} accepted"
            );
        }
    }

    #[test]
    fn load_rejects_out_of_range_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[auth]\ntoken_ttl_hours = 9223372036854775807\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ApiError::Config(_))));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[server\nport = ").is_err());
    }
}
