use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::paper::{PaperRunArgs, RunOutcome};

#[derive(Parser)]
#[command(name = "tbot")]
#[command(about = "Broker gateway + round-trip bots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Run every configured bot against the in-process paper broker
    PaperRun {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Starting quote for every symbol (overrides paper.fill_price)
        #[arg(long)]
        fill_price: Option<f64>,

        /// Round trips each bot completes before the run ends
        #[arg(long, default_value_t = 1)]
        cycles: usize,

        /// Give up if the cycles have not completed by then
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; deployments inject env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let loaded = tbot_config::load_layered_yaml(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::PaperRun {
            config_paths,
            fill_price,
            cycles,
            timeout_secs,
        } => {
            let summary = commands::paper::run(PaperRunArgs {
                config_paths,
                fill_price,
                cycles,
                timeout: Duration::from_secs(timeout_secs),
            })
            .await?;

            println!("config_hash={}", summary.config_hash);
            for bot in &summary.bots {
                println!(
                    "bot={} cycles={} realized_pnl={:.2}",
                    bot.name, bot.cycles, bot.realized_pnl
                );
            }
            for rec in &summary.recordings {
                println!("recording={} lines={}", rec.path.display(), rec.lines);
            }
            println!("outcome={}", summary.outcome.as_str());

            if summary.outcome == RunOutcome::TimedOut {
                bail!("paper-run timed out before {cycles} cycle(s) completed");
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
