// Position engine CLI: run the engine, inspect status, manage config

use clap::{Parser, Subcommand};
use tracing::{error, info};

use equity_position_engine::{Config, TradingEngine, TradingMode, TradingResult};

#[derive(Parser)]
#[command(name = "position-engine")]
#[command(version = "0.2.0")]
#[command(about = "Equity position & risk state engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init,

    /// Run the engine until interrupted
    Run {
        /// Force simulation mode regardless of configuration
        #[arg(long)]
        simulation: bool,
    },

    /// Show data source health and held positions
    Status {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    if let Err(e) = dispatch(cli).await {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> TradingResult<()> {
    match cli.command {
        Commands::Init => {
            let config = Config::load_or_create(&cli.config)?;
            info!(
                path = %cli.config,
                mode = ?config.trading.mode,
                "configuration ready"
            );
            Ok(())
        }
        Commands::Run { simulation } => {
            let mut config = Config::load_or_create(&cli.config)?;
            if simulation {
                config.trading.mode = TradingMode::Simulation;
            }
            run(config).await
        }
        Commands::Status { json } => {
            let config = Config::from_file(&cli.config)?;
            status(config, json)
        }
    }
}

async fn run(config: Config) -> TradingResult<()> {
    let engine = TradingEngine::new(config)?;
    engine.start();

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    engine.shutdown().await
}

fn status(config: Config, json: bool) -> TradingResult<()> {
    let engine = TradingEngine::new(config)?;

    if json {
        let snapshot = engine.snapshot();
        let report = serde_json::json!({
            "sources": engine.source_status(),
            "data_version": snapshot.data_version,
            "positions": snapshot.positions,
        });
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return Ok(());
    }

    println!("Data sources:");
    for source in engine.source_status() {
        println!(
            "  {:<12} healthy={:<5} errors={:<3} current={:<5} locked={} last_success={}",
            source.name,
            source.healthy,
            source.error_count,
            source.current,
            source.locked,
            source
                .last_success
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    let snapshot = engine.snapshot();
    println!("\nPositions (data version {}):", snapshot.data_version);
    if snapshot.positions.is_empty() {
        println!("  none");
    }
    for p in &snapshot.positions {
        println!(
            "  {:<8} {:<10} vol={:<7} avail={:<7} cost={:<8.3} px={:<8.3} pnl={:>6.2}% stop={:<8.3} triggered={}",
            p.symbol,
            p.name,
            p.volume,
            p.available,
            p.cost_price,
            p.current_price,
            p.profit_ratio * 100.0,
            p.stop_loss_price,
            p.profit_triggered,
        );
    }

    println!(
        "\nDatabase: {}",
        if engine.database().health_check()? { "ok" } else { "unreachable" }
    );
    Ok(())
}
