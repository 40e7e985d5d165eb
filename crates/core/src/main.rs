use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pegasus::bootstrap;
use pegasus::cli::{self, Cli, Command, ConfigAction};
use pg_domain::config::{Config, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to run when no subcommand is given.
        None | Some(Command::Run) => {
            let (config, _path) = cli::load_config(cli.config)?;
            init_tracing(&config);
            run(Arc::new(config)).await
        }
        Some(Command::Chat) => {
            let (config, _path) = cli::load_config(cli.config)?;
            init_tracing(&config);
            cli::chat::chat(Arc::new(config)).await
        }
        Some(Command::Config(config_cmd)) => {
            let (config, path) = cli::load_config(cli.config)?;
            match config_cmd.action {
                ConfigAction::Validate => {
                    if !cli::validate(&config, &path) {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                ConfigAction::Show => {
                    cli::show(&config);
                    Ok(())
                }
            }
        }
        Some(Command::Version) => {
            println!("pegasus {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured tracing per `log_level` / `log_format`.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Line => builder.compact().init(),
    }
}

/// Start the runtime and serve until Ctrl+C.
async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Pegasus starting");
    let runtime = bootstrap::build_runtime(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    runtime.shutdown().await;
    Ok(())
}
