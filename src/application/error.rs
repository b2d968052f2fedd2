use thiserror::Error;

use crate::{config::LoadError, infra::error::InfraError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AppError {
    /// Short label naming the stage that failed, used as a structured log field.
    pub fn stage(&self) -> &'static str {
        match self {
            AppError::Config(_) => "configuration",
            AppError::Infra(InfraError::Telemetry(_)) => "logging",
            AppError::Infra(InfraError::Database { .. }) => "database",
            AppError::Infra(InfraError::Migration { .. }) => "migration",
            AppError::Infra(InfraError::Cache { .. }) => "cache",
        }
    }
}
