use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use garaged::Config;
use garaged::Engine;
use garaged::config::LoggingConfig;
use garaged::format_diagnostics;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "garaged", version, about = "Smart garage door controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller until interrupted
    Run {
        /// Configuration files, merged in order (first wins)
        #[arg(short, long = "config", required = true)]
        config: Vec<PathBuf>,
    },
    /// Load and validate the configuration, then exit
    Check {
        /// Configuration files, merged in order (first wins)
        #[arg(short, long = "config", required = true)]
        config: Vec<PathBuf>,
    },
}

/// Load the configuration, printing any diagnostics to stderr.
fn load_config(paths: &[PathBuf]) -> Option<Config> {
    match Config::from_files(paths) {
        Ok((config, warnings)) => {
            if !warnings.is_empty() {
                eprint!("{}", format_diagnostics(&warnings));
            }
            Some(config)
        }
        Err(e) => {
            eprintln!("{}", e);
            None
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = Targets::new()
        .with_default(LevelFilter::from(logging.level))
        .with_targets(
            logging
                .overrides
                .iter()
                .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
        );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("garaged starting with {} garage(s)", config.garages.len());

    let mut engine = Engine::from_config(&config);
    engine.register_integrations_from_config(&config);
    let handle = engine.handle();

    let (api_shutdown_tx, api_shutdown_rx) = tokio::sync::oneshot::channel();
    let api = tokio::spawn(garaged::api::serve(
        config.api.listen.clone(),
        config.api.port,
        handle.clone(),
        api_shutdown_rx,
    ));
    let engine_task = tokio::spawn(engine.run());

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    // The API may already have exited (e.g. failed to bind)
    let _ = api_shutdown_tx.send(());
    if let Err(e) = handle.shutdown() {
        tracing::warn!("Engine already stopped: {}", e);
    }

    engine_task.await?;
    api.await??;

    tracing::info!("garaged shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => match load_config(&config) {
            Some(config) => {
                println!(
                    "Configuration OK: {} garage(s): {}",
                    config.garages.len(),
                    config
                        .garage_ids()
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                ExitCode::SUCCESS
            }
            None => ExitCode::FAILURE,
        },
        Commands::Run { config } => {
            let Some(config) = load_config(&config) else {
                return ExitCode::FAILURE;
            };
            init_tracing(&config.logging);

            if let Err(e) = run(config).await {
                tracing::error!("garaged failed: {:#}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
    }
}
