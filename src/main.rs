use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use streamhub::api::{self, AppState};
use streamhub::config::Config;
use streamhub::store::PgStore;

#[derive(Parser)]
#[command(name = "streamhub", about = "Agent control-channel hub")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the hub server (default).
    Serve {
        /// Bind address, overrides STREAMHUB_HOST.
        #[arg(long)]
        host: Option<String>,
        /// Bind port, overrides STREAMHUB_PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Apply the database schema and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("streamhub=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = PgStore::new(&config.database).await?;

    match cli.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::Migrate => {
            store.run_migrations().await?;
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Serve { host, port } => {
            store.run_migrations().await?;

            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);

            let state = AppState::new(Arc::new(store));
            let hub = state.hub.clone();

            tokio::select! {
                result = api::serve(state, &host, port) => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    hub.stop().await;
                    Ok(())
                }
            }
        }
    }
}
