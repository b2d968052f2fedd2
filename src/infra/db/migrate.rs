use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::migrate::Migrator;

use crate::config::BackendKind;
use crate::infra::error::InfraError;

use super::Database;

/// Brings the schema of a freshly connected database up to date.
#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    async fn migrate(&self, database: &Database) -> Result<(), InfraError>;
}

#[async_trait]
impl SchemaMigrator for Migrator {
    async fn migrate(&self, database: &Database) -> Result<(), InfraError> {
        database.run_migrations(self).await
    }
}

/// Loads plain SQL migrations from `<root>/<backend>` when invoked, e.g. `migrations/sqlite`.
#[derive(Debug, Clone)]
pub struct DirectoryMigrator {
    root: PathBuf,
}

impl DirectoryMigrator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self, kind: BackendKind) -> PathBuf {
        self.root.join(kind.as_str())
    }
}

#[async_trait]
impl SchemaMigrator for DirectoryMigrator {
    async fn migrate(&self, database: &Database) -> Result<(), InfraError> {
        let source = self.source_dir(database.kind());
        let migrator = Migrator::new(source.as_path()).await.map_err(|err| {
            InfraError::migration(format!(
                "failed to load migrations from {}: {err}",
                source.display()
            ))
        })?;
        migrator.migrate(database).await
    }
}
