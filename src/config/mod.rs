//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{CliArgs, Command, StartupArgs, StartupOverrides};

use std::{fmt, num::NonZeroU32, path::PathBuf};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::util::redact;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "ignition";
const DEFAULT_DB_TYPE: &str = "sqlite";
const DEFAULT_SQLITE_PATH: &str = "ignition.db";
const DEFAULT_MYSQL_HOST: &str = "127.0.0.1";
const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
const DEFAULT_REDIS_ADDR: &str = "127.0.0.1:6379";

/// Fully-resolved startup settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    pub directory: Option<PathBuf>,
    /// Print passwords in connection diagnostics instead of masking them.
    pub reveal_credentials: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Unrecognized or missing values fall back to `info`.
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            Some("debug") => Self::Debug,
            Some("info") => Self::Info,
            Some("warn") => Self::Warn,
            Some("error") => Self::Error,
            _ => Self::Info,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// Only `json` selects JSON output; everything else is text.
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            Some("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub backend: DatabaseBackend,
    pub log_mode: DbLogMode,
    pub auto_migrate: bool,
    pub max_connections: NonZeroU32,
    pub migrations_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    MySql,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::MySql => "mysql",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sqlite(SqliteSettings),
    MySql(MySqlSettings),
}

impl DatabaseBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            DatabaseBackend::Sqlite(_) => BackendKind::Sqlite,
            DatabaseBackend::MySql(_) => BackendKind::MySql,
        }
    }

    /// Connection string for diagnostics. The password is masked unless `reveal` is set.
    pub fn connection_string(&self, reveal: bool) -> String {
        match self {
            DatabaseBackend::Sqlite(sqlite) => format!("sqlite://{}", sqlite.path.display()),
            DatabaseBackend::MySql(mysql) => mysql.connection_string(reveal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteSettings {
    pub path: PathBuf,
}

#[derive(Clone, PartialEq, Eq)]
pub struct MySqlSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub dbname: String,
}

impl MySqlSettings {
    fn connection_string(&self, reveal: bool) -> String {
        let password = self
            .password
            .as_deref()
            .map(|password| redact::secret(password, reveal));

        match self.connection_url(password) {
            Some(url) => url.to_string(),
            None => match password {
                Some(password) => format!(
                    "mysql://{}:{}@{}:{}/{}",
                    self.username, password, self.host, self.port, self.dbname
                ),
                None => format!(
                    "mysql://{}@{}:{}/{}",
                    self.username, self.host, self.port, self.dbname
                ),
            },
        }
    }

    /// `None` when the host cannot carry userinfo, so credentials are never silently dropped.
    fn connection_url(&self, password: Option<&str>) -> Option<Url> {
        let base = format!("mysql://{}:{}/{}", self.host, self.port, self.dbname);
        let mut url = Url::parse(&base).ok()?;
        url.set_username(&self.username).ok()?;
        url.set_password(password).ok()?;
        Some(url)
    }
}

impl fmt::Debug for MySqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| redact::REDACTED))
            .field("dbname", &self.dbname)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbLogMode {
    Silent,
    Info,
    Warn,
    Error,
}

impl DbLogMode {
    /// Unrecognized or missing values fall back to `error`.
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            Some("silent") => Self::Silent,
            Some("info") => Self::Info,
            Some("warn") => Self::Warn,
            _ => Self::Error,
        }
    }
}

#[derive(Clone)]
pub struct RedisSettings {
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
}

impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSettings")
            .field("addr", &self.addr)
            .field("password", &self.password.as_ref().map(|_| redact::REDACTED))
            .field("db", &self.db)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("IGNITION").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Check(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Migrate(args)) => {
            raw.apply_overrides(&args.overrides);
            raw.server.db_auto_migrate = Some(true);
        }
        None => raw.apply_overrides(&StartupOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    log: RawLogSettings,
    server: RawServerSettings,
    sqlite: RawSqliteSettings,
    mysql: RawMySqlSettings,
    redis: RawRedisSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &StartupOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.log.level = Some(level.clone());
        }
        if let Some(format) = overrides.log_format.as_ref() {
            self.log.format = Some(format.clone());
        }
        if let Some(directory) = overrides.log_directory.as_ref() {
            self.log.directory = Some(directory.clone());
        }
        if let Some(db_type) = overrides.db_type.as_ref() {
            self.server.db_type = Some(db_type.clone());
        }
        if let Some(mode) = overrides.db_log_mode.as_ref() {
            self.server.db_log_mode = Some(mode.clone());
        }
        if let Some(auto_migrate) = overrides.db_auto_migrate {
            self.server.db_auto_migrate = Some(auto_migrate);
        }
        if let Some(path) = overrides.sqlite_path.as_ref() {
            self.sqlite.path = Some(path.clone());
        }
        if let Some(addr) = overrides.redis_addr.as_ref() {
            self.redis.addr = Some(addr.clone());
        }
        if let Some(db) = overrides.redis_db {
            self.redis.db = Some(db);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            log,
            server,
            sqlite,
            mysql,
            redis,
        } = raw;

        let logging = build_logging_settings(log);
        let database = build_database_settings(server, sqlite, mysql)?;
        let redis = build_redis_settings(redis)?;

        Ok(Self {
            logging,
            database,
            redis,
        })
    }
}

fn build_logging_settings(log: RawLogSettings) -> LoggingSettings {
    let directory = log
        .directory
        .filter(|directory| !directory.as_os_str().is_empty());

    LoggingSettings {
        level: LogLevel::from_config(log.level.as_deref()),
        format: LogFormat::from_config(log.format.as_deref()),
        directory,
        reveal_credentials: log.reveal_credentials.unwrap_or(false),
    }
}

fn build_database_settings(
    server: RawServerSettings,
    sqlite: RawSqliteSettings,
    mysql: RawMySqlSettings,
) -> Result<DatabaseSettings, LoadError> {
    let db_type = server
        .db_type
        .unwrap_or_else(|| DEFAULT_DB_TYPE.to_string());

    let backend = match db_type.trim() {
        "sqlite" => DatabaseBackend::Sqlite(build_sqlite_settings(sqlite)?),
        "mysql" => DatabaseBackend::MySql(build_mysql_settings(mysql)?),
        other => {
            return Err(LoadError::invalid(
                "server.db_type",
                format!("unsupported database type `{other}` (expected sqlite or mysql)"),
            ));
        }
    };

    let max_connections = server
        .db_max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections).ok_or_else(|| {
        LoadError::invalid("server.db_max_connections", "must be greater than zero")
    })?;

    let migrations_dir = server
        .migrations_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_DIR));
    if migrations_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "server.migrations_dir",
            "path must not be empty",
        ));
    }

    Ok(DatabaseSettings {
        backend,
        log_mode: DbLogMode::from_config(server.db_log_mode.as_deref()),
        auto_migrate: server.db_auto_migrate.unwrap_or(false),
        max_connections,
        migrations_dir,
    })
}

fn build_sqlite_settings(sqlite: RawSqliteSettings) -> Result<SqliteSettings, LoadError> {
    let path = sqlite
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid("sqlite.path", "path must not be empty"));
    }

    Ok(SqliteSettings { path })
}

fn build_mysql_settings(mysql: RawMySqlSettings) -> Result<MySqlSettings, LoadError> {
    let host = non_empty(mysql.host).unwrap_or_else(|| DEFAULT_MYSQL_HOST.to_string());

    let port = mysql.port.unwrap_or(DEFAULT_MYSQL_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "mysql.port",
            "port must be greater than zero",
        ));
    }

    let username = non_empty(mysql.username)
        .ok_or_else(|| LoadError::invalid("mysql.username", "must be set for mysql"))?;
    let dbname = non_empty(mysql.dbname)
        .ok_or_else(|| LoadError::invalid("mysql.dbname", "must be set for mysql"))?;

    Ok(MySqlSettings {
        host,
        port,
        username,
        password: mysql.password.filter(|password| !password.is_empty()),
        dbname,
    })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let addr = non_empty(redis.addr).unwrap_or_else(|| DEFAULT_REDIS_ADDR.to_string());
    validate_addr(&addr).map_err(|reason| LoadError::invalid("redis.addr", reason))?;

    let db = redis.db.unwrap_or(0);
    if db < 0 {
        return Err(LoadError::invalid("redis.db", "must not be negative"));
    }

    Ok(RedisSettings {
        addr,
        password: redis.password.filter(|password| !password.is_empty()),
        db,
    })
}

fn validate_addr(addr: &str) -> Result<(), String> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got `{addr}`"))?;
    if host.is_empty() {
        return Err(format!("missing host in `{addr}`"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port in `{addr}`")),
        Ok(_) => Ok(()),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLogSettings {
    level: Option<String>,
    format: Option<String>,
    directory: Option<PathBuf>,
    reveal_credentials: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    db_type: Option<String>,
    db_log_mode: Option<String>,
    db_auto_migrate: Option<bool>,
    db_max_connections: Option<u32>,
    migrations_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSqliteSettings {
    path: Option<PathBuf>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawMySqlSettings {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    dbname: Option<String>,
}

impl fmt::Debug for RawMySqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMySqlSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| redact::REDACTED))
            .field("dbname", &self.dbname)
            .finish()
    }
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    addr: Option<String>,
    password: Option<String>,
    db: Option<i64>,
}

impl fmt::Debug for RawRedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRedisSettings")
            .field("addr", &self.addr)
            .field("password", &self.password.as_ref().map(|_| redact::REDACTED))
            .field("db", &self.db)
            .finish()
    }
}
