use tracing::info;

use crate::{
    config::Settings,
    infra::{
        cache::{self, CacheClient},
        db::{self, Database, SchemaMigrator},
        telemetry::{self, LogSink},
    },
};

use super::error::AppError;

/// Everything the rest of the process needs once startup has succeeded.
#[derive(Debug, Clone)]
pub struct Resources {
    pub log: LogSink,
    pub database: Database,
    pub cache: CacheClient,
}

/// Bring up logging, then the database, then the cache. Stops at the first failure.
pub async fn init_resources(
    settings: &Settings,
    migrator: &dyn SchemaMigrator,
) -> Result<Resources, AppError> {
    let log = telemetry::init(&settings.logging)?;
    connect_backends(log, settings, migrator).await
}

/// Database and cache initialization once a log sink is in place.
pub async fn connect_backends(
    log: LogSink,
    settings: &Settings,
    migrator: &dyn SchemaMigrator,
) -> Result<Resources, AppError> {
    let reveal_credentials = settings.logging.reveal_credentials;

    let database = db::init(&settings.database, reveal_credentials, migrator).await?;
    let cache = cache::init(&settings.redis, reveal_credentials).await?;

    info!(
        database = %database.kind(),
        cache_db = cache.db(),
        "startup resources ready"
    );

    Ok(Resources {
        log,
        database,
        cache,
    })
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroU32, path::PathBuf};

    use tracing::dispatcher;

    use super::*;
    use crate::{
        config::{
            DatabaseBackend, DatabaseSettings, DbLogMode, LogFormat, LogLevel, LoggingSettings,
            RedisSettings, SqliteSettings,
        },
        infra::db::DirectoryMigrator,
    };

    #[tokio::test]
    async fn cache_failure_stops_startup_after_database_is_up() {
        let dir = tempfile::tempdir().expect("tempdir");

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let redis_addr = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let settings = Settings {
            logging: LoggingSettings {
                level: LogLevel::Info,
                format: LogFormat::Text,
                directory: Some(dir.path().join("logs")),
                reveal_credentials: false,
            },
            database: DatabaseSettings {
                backend: DatabaseBackend::Sqlite(SqliteSettings {
                    path: dir.path().join("blog.db"),
                }),
                log_mode: DbLogMode::Silent,
                auto_migrate: false,
                max_connections: NonZeroU32::new(1).expect("non-zero"),
                migrations_dir: PathBuf::from("migrations"),
            },
            redis: RedisSettings {
                addr: redis_addr,
                password: None,
                db: 0,
            },
        };

        let sink = LogSink::open(&settings.logging);
        let _guard = dispatcher::set_default(&sink.dispatch());
        let migrator = DirectoryMigrator::new(&settings.database.migrations_dir);

        let err = connect_backends(sink.clone(), &settings, &migrator)
            .await
            .expect_err("cache is unreachable");

        assert_eq!(err.stage(), "cache");
        let logs = std::fs::read_to_string(sink.file_path().expect("file sink")).expect("logs");
        assert!(logs.contains("database connection established"));
        assert!(!logs.contains("cache connection established"));
        assert!(!logs.contains("startup resources ready"));
    }
}
