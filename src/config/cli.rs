use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the ignition binary.
#[derive(Debug, Parser)]
#[command(
    name = "ignition",
    version,
    about = "Bring up logging, database and cache for a server process"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "IGNITION_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Initialize every startup resource and report readiness.
    Check(Box<StartupArgs>),
    /// Initialize every startup resource with schema migration forced on.
    Migrate(Box<StartupArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct StartupArgs {
    #[command(flatten)]
    pub overrides: StartupOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StartupOverrides {
    /// Override the minimum log level (debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Override the log encoding (text|json).
    #[arg(long = "log-format", value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// Write logs to a dated file inside this directory.
    #[arg(long = "log-directory", value_name = "PATH")]
    pub log_directory: Option<PathBuf>,

    /// Override the database backend (sqlite|mysql).
    #[arg(long = "db-type", value_name = "KIND")]
    pub db_type: Option<String>,

    /// Override the driver statement log mode (silent|info|warn|error).
    #[arg(long = "db-log-mode", value_name = "MODE")]
    pub db_log_mode: Option<String>,

    /// Toggle schema migration at startup.
    #[arg(
        long = "db-auto-migrate",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub db_auto_migrate: Option<bool>,

    /// Override the SQLite database file.
    #[arg(long = "sqlite-path", value_name = "PATH")]
    pub sqlite_path: Option<PathBuf>,

    /// Override the cache endpoint (host:port).
    #[arg(long = "redis-addr", value_name = "ADDR")]
    pub redis_addr: Option<String>,

    /// Override the cache logical database index.
    #[arg(long = "redis-db", value_name = "INDEX")]
    pub redis_db: Option<i64>,
}
