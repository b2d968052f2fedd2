use std::process;

use ignition::{
    application::{error::AppError, startup},
    config::{self, Command},
    infra::db::DirectoryMigrator,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(stage = error.stage(), error = %error, "startup failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(stage = error.stage(), error = %error, "startup failed");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let migrator = DirectoryMigrator::new(&settings.database.migrations_dir);
    let resources = startup::init_resources(&settings, &migrator).await?;

    let command = match cli_args.command {
        Some(Command::Migrate(_)) => "migrate",
        Some(Command::Check(_)) | None => "check",
    };
    info!(
        command,
        database = %resources.database.kind(),
        cache = resources.cache.addr(),
        cache_db = resources.cache.db(),
        "ignition completed"
    );

    Ok(())
}
