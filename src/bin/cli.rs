//! CLI for cluster operations

use clap::{Parser, Subcommand};
use replicon::ops::{plan_repairs, verify_cluster};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "replicon")]
#[command(about = "replicon replica-health CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify replica health of every container
    Verify {
        /// Cluster image (JSON)
        #[arg(long)]
        snapshot: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the directives one evaluation pass would emit
    Plan {
        /// Cluster image (JSON)
        #[arg(long)]
        snapshot: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify { snapshot, json } => {
            let report = verify_cluster(&snapshot).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Verification report:");
                println!("  Containers: {}", report.containers);
                println!("  Healthy: {}", report.healthy);
                println!("  Under-replicated: {}", report.under_replicated);
                println!("  Over-replicated: {}", report.over_replicated);
                println!("  Finalizable: {}", report.finalizable);
                println!("  Stuck: {}", report.stuck.len());
                for stuck in &report.stuck {
                    println!("    {}: {}", stuck.container, stuck.reason);
                }
                println!("  Nodes:");
                for (state, count) in &report.nodes {
                    println!("    {}: {}", state, count);
                }
                for error in &report.errors {
                    println!("  Error: {}", error);
                }
            }
            if !report.errors.is_empty() {
                anyhow::bail!("{} containers failed verification", report.errors.len());
            }
        }

        Commands::Plan { snapshot } => {
            let plan = plan_repairs(&snapshot).await?;
            for directive in &plan.directives {
                println!("{}", directive);
            }
            println!(
                "{} directives over {} containers ({} withheld)",
                plan.directives.len(),
                plan.containers,
                plan.withheld
            );
            for error in &plan.errors {
                eprintln!("error: {}", error);
            }
        }
    }

    Ok(())
}
