//! Node configuration.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use walletd_ledger::EngineConfig;

/// Database connection and pool configuration.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual parts.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    /// Maximum open connections.
    pub max_connections: u32,
    /// Connections kept open when idle.
    pub min_connections: u32,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "user".to_string(),
            password: "password".to_string(),
            name: "walletdb".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 25,
            min_connections: 10,
            max_lifetime: Duration::from_secs(5 * 60),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("name", &self.name)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("max_lifetime", &self.max_lifetime)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl DatabaseConfig {
    /// Connection options for the pool.
    pub fn connect_options(&self) -> Result<PgConnectOptions, String> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url).map_err(|e| format!("Invalid DATABASE_URL: {}", e));
        }

        let ssl_mode = PgSslMode::from_str(&self.ssl_mode)
            .map_err(|e| format!("Invalid DB_SSLMODE {:?}: {}", self.ssl_mode, e))?;

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
            .ssl_mode(ssl_mode))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Main node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Listen port.
    pub listen_port: u16,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    /// Upper bound on a whole HTTP request.
    pub request_timeout: Duration,
    /// Apply schema migrations at startup.
    pub run_migrations: bool,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
            request_timeout: Duration::from_secs(30),
            run_migrations: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, String>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("Invalid {} {:?}: {}", key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("Invalid {} {:?}: expected a boolean", key, value)),
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(addr) = get("WALLETD_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(port) = get("WALLETD_LISTEN_PORT") {
            config.listen_port = parse("WALLETD_LISTEN_PORT", &port)?;
        } else if let Some(port) = get("SERVER_PORT") {
            config.listen_port = parse("SERVER_PORT", &port)?;
        }

        let db = &mut config.database;
        db.url = get("DATABASE_URL");
        if let Some(host) = get("DB_HOST") {
            db.host = host;
        }
        if let Some(port) = get("DB_PORT") {
            db.port = parse("DB_PORT", &port)?;
        }
        if let Some(user) = get("DB_USER") {
            db.user = user;
        }
        if let Some(password) = get("DB_PASSWORD") {
            db.password = password;
        }
        if let Some(name) = get("DB_NAME") {
            db.name = name;
        }
        if let Some(ssl_mode) = get("DB_SSLMODE") {
            db.ssl_mode = ssl_mode;
        }
        if let Some(max) = get("WALLETD_DB_MAX_CONNECTIONS") {
            db.max_connections = parse("WALLETD_DB_MAX_CONNECTIONS", &max)?;
        }
        if let Some(min) = get("WALLETD_DB_MIN_CONNECTIONS") {
            db.min_connections = parse("WALLETD_DB_MIN_CONNECTIONS", &min)?;
        }

        if let Some(size) = get("WALLETD_DEFAULT_PAGE_SIZE") {
            config.engine.default_page_size = parse("WALLETD_DEFAULT_PAGE_SIZE", &size)?;
        }
        if let Some(size) = get("WALLETD_MAX_PAGE_SIZE") {
            config.engine.max_page_size = parse("WALLETD_MAX_PAGE_SIZE", &size)?;
        }
        if let Some(ms) = get("WALLETD_OPERATION_TIMEOUT_MS") {
            let ms: u64 = parse("WALLETD_OPERATION_TIMEOUT_MS", &ms)?;
            config.engine.operation_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(secs) = get("WALLETD_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse("WALLETD_REQUEST_TIMEOUT_SECS", &secs)?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(run) = get("WALLETD_RUN_MIGRATIONS") {
            config.run_migrations = parse_bool("WALLETD_RUN_MIGRATIONS", &run)?;
        }

        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = get("WALLETD_LOG_FORMAT") {
            config.log_format = match format.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => return Err(format!("Invalid WALLETD_LOG_FORMAT {:?}", format)),
            };
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_port == 0 {
            return Err("Listen port cannot be 0".to_string());
        }

        self.socket_addr()?;
        self.database.connect_options()?;

        if self.database.max_connections == 0 {
            return Err("Max connections cannot be 0".to_string());
        }

        if self.database.min_connections > self.database.max_connections {
            return Err("Min connections cannot exceed max connections".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout cannot be 0".to_string());
        }

        self.engine.validate()
    }

    /// Address to bind the HTTP listener to.
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.listen_addr, self.listen_port)
            .parse()
            .map_err(|e| format!("Invalid listen address {}: {}", self.listen_addr, e))
    }
}
