//! lora-router - LoRaWAN router gateway state
//!
//! Reads gateway events as JSON lines on stdin, keeps per-gateway state and
//! mirrors traffic to the configured monitor services.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use lora_proto::RouterEvent;
use lora_router::{GatewayRegistry, LoggingConfig, RouterConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "lora-router")]
#[command(about = "LoRaWAN router gateway state and monitor fan-out")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router, reading gateway events from stdin
    Run {
        /// Path to config file
        #[arg(short, long, env = "LORA_ROUTER_CONFIG", default_value = "/etc/lora-router/config.toml")]
        config: PathBuf,
    },

    /// Validate a config file and print a summary
    CheckConfig {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/lora-router/config.toml")]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/lora-router/config.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = RouterConfig::from_file(&config)?;
            init_tracing(&config.logging)?;
            run_router(config).await?;
        }

        Commands::CheckConfig { config } => {
            check_config(&config)?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .context("invalid log filter")?;

    if logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

async fn run_router(config: RouterConfig) -> anyhow::Result<()> {
    info!(
        monitors = config.monitors.len(),
        queue_capacity = config.queue_capacity,
        "starting lora-router"
    );

    let registry = GatewayRegistry::from_config(&config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match RouterEvent::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping malformed event");
                continue;
            }
        };

        let gateway_id = event.gateway_id().clone();
        if let Err(e) = registry.handle(event).await {
            warn!(gateway_id = %gateway_id, error = %e, "failed to handle event");
        }
    }

    registry.shutdown().await;
    info!("lora-router stopped");
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = RouterConfig::from_file(path)?;

    println!("Config OK: {}", path.display());
    println!("  queue capacity: {}", config.queue_capacity);
    println!(
        "  backoff:        {}ms .. {}ms (x{})",
        config.backoff.initial_delay_ms, config.backoff.max_delay_ms, config.backoff.multiplier
    );
    println!("  monitors:       {}", config.monitors.len());
    for monitor in &config.monitors {
        println!("    {} -> {}", monitor.name, monitor.url);
    }
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("config file already exists: {}", output.display());
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    std::fs::write(output, RouterConfig::sample().to_toml()?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote sample config to {}", output.display());
    Ok(())
}
