//! Replication manager binary

use clap::{Parser, Subcommand};
use replicon::coordinator::ClusterImage;
use replicon::{ReconcilerConfig, ReplicationManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "replicon-manager")]
#[command(about = "replicon replication manager")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation loop over a cluster image
    Serve {
        /// Cluster image (JSON)
        #[arg(long)]
        snapshot: PathBuf,

        /// Config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            snapshot,
            config,
            once,
        } => {
            let config = ReconcilerConfig::load(config.as_deref())?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let (store, registry) = ClusterImage::load(&snapshot).await?.into_parts()?;
            tracing::info!(
                version = replicon::VERSION,
                containers = store.len()?,
                nodes = registry.total_node_count()?,
                "cluster image loaded"
            );

            let (manager, mut directives) =
                ReplicationManager::new(config, Arc::new(store), Arc::new(registry));
            let manager = Arc::new(manager);

            let printer = tokio::spawn(async move {
                while let Some(directive) = directives.recv().await {
                    tracing::info!(%directive, "directive");
                }
            });

            if once {
                let report = manager.run_cycle().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let handle = manager.spawn();
                tokio::signal::ctrl_c().await?;
                tracing::info!("shutdown requested");
                manager.shutdown();
                handle.await?;
            }

            print!("{}", manager.metrics().to_prometheus());
            drop(manager);
            printer.await?;
        }
    }

    Ok(())
}
