//! Connection configuration.
//!
//! ```toml
//! [database]
//! host = "127.0.0.1"
//! database = "geneweaver"
//! user = "odeadmin"
//! password = "secret"
//! port = 5432
//!
//! [database.pool]
//! max_size = 10
//! acquire_timeout_ms = 30000
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{params::is_identifier, Error};

pub const DEFAULT_PORT: u16 = 5432;

const SAMPLE_CONFIG: &str = r#"## gwdb configuration

[database]
host = "127.0.0.1"
database = "dbname"
user = "dbuser"
password = "dbpass"
port = 5432

[database.pool]
## Upper bound on simultaneously open connections
max_size = 10
## How long an acquire may wait for a free connection
acquire_timeout_ms = 30000
"#;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Loads a TOML configuration file.
    ///
    /// A missing file is replaced by a sample one and reported as a configuration error,
    /// so the user has something to fill in.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            fs::write(path, SAMPLE_CONFIG).map_err(|e| {
                Error::Configuration(format!(
                    "could not find a config file and failed to create one at {}: {}",
                    path.display(),
                    e
                ))
            })?;
            tracing::warn!(path = %path.display(), "wrote sample configuration file");
            return Err(Error::Configuration(format!(
                "could not find a config file so one was created for you at {}",
                path.display()
            )));
        }

        let text = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("could not read {}: {}", path.display(), e))
        })?;
        text.parse()
    }

    pub fn sample() -> &'static str {
        SAMPLE_CONFIG
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| Error::Configuration(e.to_string()))
    }
}

/// The `[database]` section. Every credential is optional here and checked by
/// [`DatabaseConfig::credentials`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl DatabaseConfig {
    pub fn credentials(&self) -> Result<Credentials, Error> {
        fn required(value: &Option<String>, option: &str) -> Result<String, Error> {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => Ok(v.to_string()),
                _ => Err(Error::Configuration(format!(
                    "database section is missing the {} option",
                    option
                ))),
            }
        }

        Ok(Credentials {
            host: required(&self.host, "host")?,
            database: required(&self.database, "database")?,
            user: required(&self.user, "user")?,
            password: required(&self.password, "password")?,
            port: self.port.unwrap_or(DEFAULT_PORT),
        })
    }
}

/// Validated connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        port: u16,
    ) -> Result<Self, Error> {
        DatabaseConfig {
            host: Some(host.into()),
            database: Some(database.into()),
            user: Some(user.into()),
            password: Some(password.into()),
            port: Some(port),
            pool: PoolConfig::default(),
        }
        .credentials()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Label attached to every log event of the pool; defaults to the database name.
    pub name: Option<String>,
    pub max_size: u32,
    pub min_idle: u32,
    pub acquire_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub idle_timeout_secs: Option<u64>,
    pub test_on_checkout: bool,
    pub search_path: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_size: 10,
            min_idle: 0,
            acquire_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            idle_timeout_secs: Some(600),
            test_on_checkout: false,
            search_path: ["curation", "extsrc", "odestatic", "production"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_size == 0 {
            return Err(Error::Configuration("pool max_size must be at least 1".into()));
        }
        if self.min_idle > self.max_size {
            return Err(Error::Configuration(format!(
                "pool min_idle ({}) exceeds max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(Error::Configuration(
                "pool acquire_timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(schema) = self.search_path.iter().find(|s| !is_identifier(s)) {
            return Err(Error::Configuration(format!(
                "search_path entry {:?} is not a plain identifier",
                schema
            )));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// `SET search_path` statement run once on every new connection.
    pub fn search_path_statement(&self) -> Option<String> {
        if self.search_path.is_empty() {
            None
        } else {
            Some(format!("SET search_path = {}", self.search_path.join(", ")))
        }
    }
}
