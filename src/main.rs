//! Campfire - offline conversational agent runtime
//!
//! Main entry point. Exit codes: 0 success, 2 configuration error,
//! 3 migration failure, 1 other fatal error.

use anyhow::Result;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use campfire::cli::{Cli, Commands};
use campfire::config::Config;
use campfire::error::CampfireError;
use campfire::{server, store};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {:#}", err);
            return ExitCode::from(2);
        }
    };
    if let Err(err) = config.validate() {
        eprintln!("configuration error: {:#}", err);
        return ExitCode::from(2);
    }

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            tracing::info!("Starting server on {}", config.bind_addr);
            server::serve(config).await
        }
        Commands::Migrate => migrate(&config),
        Commands::Health => health(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            match err.downcast_ref::<CampfireError>() {
                Some(CampfireError::Migration(_)) => ExitCode::from(3),
                Some(CampfireError::Config(_)) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn migrate(config: &Config) -> Result<()> {
    let store = store::Store::open(config.db_path.clone())?;
    let extra_dir = config.data_root.join("migrations");
    store.migrate(Some(&extra_dir))?;
    tracing::info!("Migrations applied");
    println!("ok");
    Ok(())
}

async fn health(config: &Config) -> Result<()> {
    let state = server::build_state(config.clone())?;
    let provider_up = state.models.is_reachable().await;
    let report = serde_json::json!({
        "db": true,
        "provider": provider_up,
        "model": state.models.current_model()?,
        "data_root": config.data_root,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default = if verbose { "campfire=debug" } else { "campfire=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
