//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Poll engine tuning.
    #[serde(default)]
    pub polls: PollConfig,
    /// Voter identity resolution.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Poll engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Decimal places kept when rounding result percentages.
    #[serde(default = "default_percentage_decimals")]
    pub percentage_decimals: u32,
    /// Page size used by poll listings when the caller gives none.
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    /// Upper bound on the page size a caller may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            percentage_decimals: default_percentage_decimals(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Voter identity configuration.
///
/// Sessions are handled upstream; the resolved user id arrives in a header.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the authenticated user id.
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

const fn default_percentage_decimals() -> u32 {
    1
}

const fn default_page_size() -> u64 {
    10
}

const fn default_max_page_size() -> u64 {
    100
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `POLLY_ENV`)
    /// 3. Environment variables with `POLLY_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("POLLY_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("POLLY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("POLLY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
