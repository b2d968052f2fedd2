//! Relational database handle over SQLite or MySQL.

mod migrate;
mod policy;

pub use migrate::{DirectoryMigrator, SchemaMigrator};
pub use policy::DriverPolicy;

use std::time::Duration;

use sqlx::{
    ConnectOptions, Connection, Executor,
    migrate::Migrator,
    mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions},
    query,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};
use tracing::info;

use crate::config::{
    BackendKind, DatabaseBackend, DatabaseSettings, DbLogMode, MySqlSettings, SqliteSettings,
};

use super::error::InfraError;

const SLOW_STATEMENT_THRESHOLD: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub enum DatabasePool {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
}

/// Connected database bound to one backend for its whole lifetime.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DatabasePool,
    policy: DriverPolicy,
}

impl Database {
    /// Open the backend described by `settings`. The first connection is made eagerly so
    /// that unreachable servers and unwritable files surface here, without retries.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, sqlx::Error> {
        let policy = DriverPolicy::STARTUP;
        let logging = StatementLogging::for_mode(settings.log_mode);
        let max_connections = settings.max_connections.get();

        let pool = match &settings.backend {
            DatabaseBackend::Sqlite(sqlite) => DatabasePool::Sqlite(
                connect_sqlite(sqlite, &policy, logging, max_connections).await?,
            ),
            DatabaseBackend::MySql(mysql) => DatabasePool::MySql(
                connect_mysql(mysql, &policy, logging, max_connections).await?,
            ),
        };

        Ok(Self { pool, policy })
    }

    pub fn kind(&self) -> BackendKind {
        match self.pool {
            DatabasePool::Sqlite(_) => BackendKind::Sqlite,
            DatabasePool::MySql(_) => BackendKind::MySql,
        }
    }

    pub fn policy(&self) -> &DriverPolicy {
        &self.policy
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn sqlite(&self) -> Option<&SqlitePool> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => Some(pool),
            DatabasePool::MySql(_) => None,
        }
    }

    pub fn mysql(&self) -> Option<&MySqlPool> {
        match &self.pool {
            DatabasePool::MySql(pool) => Some(pool),
            DatabasePool::Sqlite(_) => None,
        }
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => query("SELECT 1").execute(pool).await.map(|_| ()),
            DatabasePool::MySql(pool) => query("SELECT 1").execute(pool).await.map(|_| ()),
        }
    }

    pub async fn run_migrations(&self, migrator: &Migrator) -> Result<(), InfraError> {
        let result = match &self.pool {
            DatabasePool::Sqlite(pool) => migrator.run(pool).await,
            DatabasePool::MySql(pool) => migrator.run(pool).await,
        };
        result.map_err(|err| InfraError::migration(err.to_string()))
    }
}

/// Connect to the configured backend and, when requested, bring the schema up to date.
pub async fn init(
    settings: &DatabaseSettings,
    reveal_credentials: bool,
    migrator: &dyn SchemaMigrator,
) -> Result<Database, InfraError> {
    let kind = settings.backend.kind();
    let dsn = settings.backend.connection_string(reveal_credentials);

    let database = Database::connect(settings).await.map_err(|err| {
        InfraError::database(format!("failed to connect to {kind} database `{dsn}`: {err}"))
    })?;
    info!(kind = %kind, dsn = %dsn, "database connection established");

    if settings.auto_migrate {
        migrator.migrate(&database).await?;
        info!(kind = %kind, "database migration completed");
    }

    Ok(database)
}

/// sqlx emits every executed statement at the chosen level, so it is only turned on for
/// `info`. `warn` reports statements slower than [`SLOW_STATEMENT_THRESHOLD`]; failed
/// statements surface as the returned errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatementLogging {
    statements: log::LevelFilter,
    slow_statements: log::LevelFilter,
}

impl StatementLogging {
    fn for_mode(mode: DbLogMode) -> Self {
        let (statements, slow_statements) = match mode {
            DbLogMode::Silent | DbLogMode::Error => (log::LevelFilter::Off, log::LevelFilter::Off),
            DbLogMode::Warn => (log::LevelFilter::Off, log::LevelFilter::Warn),
            DbLogMode::Info => (log::LevelFilter::Info, log::LevelFilter::Warn),
        };
        Self {
            statements,
            slow_statements,
        }
    }

    fn apply<O: ConnectOptions>(self, options: O) -> O {
        options
            .log_statements(self.statements)
            .log_slow_statements(self.slow_statements, SLOW_STATEMENT_THRESHOLD)
    }
}

async fn connect_sqlite(
    settings: &SqliteSettings,
    policy: &DriverPolicy,
    logging: StatementLogging,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let options = logging.apply(
        SqliteConnectOptions::new()
            .filename(&settings.path)
            .create_if_missing(true)
            .foreign_keys(policy.enforce_foreign_keys),
    );

    options.connect().await?.close().await?;

    Ok(SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_lazy_with(options))
}

async fn connect_mysql(
    settings: &MySqlSettings,
    policy: &DriverPolicy,
    logging: StatementLogging,
    max_connections: u32,
) -> Result<MySqlPool, sqlx::Error> {
    let mut options = logging.apply(
        MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.username)
            .database(&settings.dbname),
    );
    if let Some(password) = settings.password.as_deref() {
        options = options.password(password);
    }

    let foreign_key_checks = if policy.enforce_foreign_keys {
        "SET FOREIGN_KEY_CHECKS = 1"
    } else {
        "SET FOREIGN_KEY_CHECKS = 0"
    };

    let mut probe = options.connect().await?;
    probe.execute(foreign_key_checks).await?;
    probe.close().await?;

    Ok(MySqlPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute(foreign_key_checks).await?;
                Ok(())
            })
        })
        .connect_lazy_with(options))
}

#[cfg(test)]
mod tests {
    use std::{
        num::NonZeroU32,
        path::{Path, PathBuf},
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use tracing::dispatcher;

    use super::*;
    use crate::config::{LogFormat, LogLevel, LoggingSettings};
    use crate::infra::telemetry::LogSink;

    #[derive(Default)]
    struct RecordingMigrator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SchemaMigrator for RecordingMigrator {
        async fn migrate(&self, _database: &Database) -> Result<(), InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(InfraError::migration("column `slug` already exists"))
            } else {
                Ok(())
            }
        }
    }

    fn sqlite_settings(path: PathBuf, auto_migrate: bool) -> DatabaseSettings {
        DatabaseSettings {
            backend: DatabaseBackend::Sqlite(SqliteSettings { path }),
            log_mode: DbLogMode::Error,
            auto_migrate,
            max_connections: NonZeroU32::new(2).expect("non-zero"),
            migrations_dir: PathBuf::from("migrations"),
        }
    }

    fn file_sink(directory: &Path) -> LogSink {
        LogSink::open(&LoggingSettings {
            level: LogLevel::Info,
            format: LogFormat::Text,
            directory: Some(directory.to_path_buf()),
            reveal_credentials: false,
        })
    }

    #[test]
    fn only_info_mode_logs_every_statement() {
        let off = log::LevelFilter::Off;

        let silent = StatementLogging::for_mode(DbLogMode::Silent);
        assert_eq!((silent.statements, silent.slow_statements), (off, off));

        let error = StatementLogging::for_mode(DbLogMode::Error);
        assert_eq!(error, silent);

        let warn = StatementLogging::for_mode(DbLogMode::Warn);
        assert_eq!(warn.statements, off);
        assert_eq!(warn.slow_statements, log::LevelFilter::Warn);

        let info = StatementLogging::for_mode(DbLogMode::Info);
        assert_eq!(info.statements, log::LevelFilter::Info);
        assert_eq!(info.slow_statements, log::LevelFilter::Warn);
    }

    #[tokio::test]
    async fn sqlite_handle_applies_startup_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blog.db");
        let migrator = RecordingMigrator::default();

        let database = init(&sqlite_settings(path.clone(), false), false, &migrator)
            .await
            .expect("sqlite connects");

        assert!(path.is_file());
        assert_eq!(database.kind(), BackendKind::Sqlite);
        assert_eq!(database.policy(), &DriverPolicy::STARTUP);
        assert_eq!(database.policy().table_name("UserAuth"), "user_auth");
        assert_eq!(migrator.calls.load(Ordering::SeqCst), 0);
        assert!(database.mysql().is_none());

        let pool = database.sqlite().expect("sqlite pool");
        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(pool)
            .await
            .expect("pragma");
        assert_eq!(foreign_keys, 0);
        database.health_check().await.expect("healthy");
    }

    #[tokio::test]
    async fn orphan_rows_are_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let database = init(
            &sqlite_settings(dir.path().join("blog.db"), false),
            false,
            &RecordingMigrator::default(),
        )
        .await
        .expect("sqlite connects");
        let pool = database.sqlite().expect("sqlite pool");

        sqlx::query("CREATE TABLE category (id INTEGER PRIMARY KEY)")
            .execute(pool)
            .await
            .expect("create category");
        sqlx::query(
            "CREATE TABLE article (id INTEGER PRIMARY KEY, category_id INTEGER REFERENCES category(id))",
        )
        .execute(pool)
        .await
        .expect("create article");

        sqlx::query("INSERT INTO article (id, category_id) VALUES (1, 42)")
            .execute(pool)
            .await
            .expect("foreign keys are not enforced");
    }

    #[tokio::test]
    async fn migration_runs_when_requested() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = file_sink(dir.path());
        let _guard = dispatcher::set_default(&sink.dispatch());
        let migrator = RecordingMigrator::default();

        init(&sqlite_settings(dir.path().join("blog.db"), true), false, &migrator)
            .await
            .expect("migration succeeds");

        assert_eq!(migrator.calls.load(Ordering::SeqCst), 1);
        let logs = std::fs::read_to_string(sink.file_path().expect("file sink")).expect("logs");
        assert!(logs.contains("database connection established"));
        assert!(logs.contains("database migration completed"));
    }

    #[tokio::test]
    async fn failed_migration_is_reported_without_success_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = file_sink(dir.path());
        let _guard = dispatcher::set_default(&sink.dispatch());
        let migrator = RecordingMigrator {
            fail: true,
            ..Default::default()
        };

        let err = init(&sqlite_settings(dir.path().join("blog.db"), true), false, &migrator)
            .await
            .expect_err("migration fails");

        assert!(matches!(err, InfraError::Migration { .. }));
        let logs = std::fs::read_to_string(sink.file_path().expect("file sink")).expect("logs");
        assert!(logs.contains("database connection established"));
        assert!(!logs.contains("database migration completed"));
    }

    #[tokio::test]
    async fn unwritable_sqlite_path_is_a_database_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, b"file").expect("write blocker");

        let err = init(
            &sqlite_settings(blocker.join("blog.db"), false),
            false,
            &RecordingMigrator::default(),
        )
        .await
        .expect_err("cannot create database under a file");

        assert!(matches!(err, InfraError::Database { .. }));
    }

    #[tokio::test]
    async fn refused_mysql_connection_is_a_database_error_with_masked_password() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let settings = DatabaseSettings {
            backend: DatabaseBackend::MySql(MySqlSettings {
                host: "127.0.0.1".to_string(),
                port,
                username: "blog".to_string(),
                password: Some("hunter2".to_string()),
                dbname: "blog".to_string(),
            }),
            log_mode: DbLogMode::Silent,
            auto_migrate: true,
            max_connections: NonZeroU32::new(1).expect("non-zero"),
            migrations_dir: PathBuf::from("migrations"),
        };
        let migrator = RecordingMigrator::default();

        let err = init(&settings, false, &migrator)
            .await
            .expect_err("nothing listens on the port");

        assert!(matches!(err, InfraError::Database { .. }));
        let message = err.to_string();
        assert!(message.contains("mysql"));
        assert!(!message.contains("hunter2"));
        assert_eq!(migrator.calls.load(Ordering::SeqCst), 0);
    }
}
