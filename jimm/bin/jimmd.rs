use std::path::PathBuf;

use clap::Parser;
use jimm::config::JimmConfig;
use jimm::db::Database;
use jimm::utils::SystemClock;
use jimm::JimmResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The jimm daemon: opens the catalog, applies migrations and keeps the
/// engine's background machinery running. The client-facing transport
/// attaches on top of the library.
#[derive(Debug, Parser)]
#[command(name = "jimmd", author, about, version)]
struct JimmdArgs {
    /// Path to the jimm configuration file
    #[arg(short, long, default_value = "jimm.yaml")]
    config: PathBuf,

    /// The subcommand to run
    #[command(subcommand)]
    subcommand: JimmdSubcommand,
}

/// Available subcommands
#[derive(Debug, Parser)]
enum JimmdSubcommand {
    /// Validate the configuration file and exit
    CheckConfig,

    /// Open the catalog database and apply any pending migrations
    Migrate,
}

//--------------------------------------------------------------------------------------------------
// Main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> JimmResult<()> {
    tracing_subscriber::fmt::init();

    let args = JimmdArgs::parse();
    let config = JimmConfig::load(&args.config).await?;

    match args.subcommand {
        JimmdSubcommand::CheckConfig => {
            tracing::info!(config = %args.config.display(), "configuration is valid");
        }
        JimmdSubcommand::Migrate => {
            let database = Database::new(
                config.get_database_path(),
                std::sync::Arc::new(SystemClock),
            )
            .await?;
            // Opening the database applies the migrations.
            drop(database);
            tracing::info!(
                database = %config.get_database_path().display(),
                "catalog is up to date"
            );
        }
    }

    Ok(())
}
