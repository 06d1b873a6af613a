//! drydockd — the Drydock daemon.
//!
//! Loads a cluster configuration and drives the cluster manager:
//! - `check` validates the configuration and prints the fleet
//! - `simulate` places replicas of one container on in-memory engines
//!
//! # Usage
//!
//! ```text
//! drydockd check --config drydock.toml
//! drydockd simulate --config drydock.toml --scheduler service \
//!     --container '{"name":"web","image":"nginx","cpus":0.5,"memory":256}' --replicas 3
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use drydock_cluster::ClusterManager;
use drydock_core::{ClusterConfig, Container, Placement};
use drydock_runtime::{MemoryRuntime, RuntimeClient};

const DEFAULT_FILTER: &str = "info,drydockd=debug,drydock=debug";

#[derive(Parser)]
#[command(name = "drydockd", about = "Drydock cluster scheduler daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a configuration file and print its engines and schedulers.
    Check {
        #[arg(long, default_value = "drydock.toml")]
        config: PathBuf,
    },

    /// Place replicas of a container on in-memory engines and print the placements.
    Simulate {
        #[arg(long, default_value = "drydock.toml")]
        config: PathBuf,

        /// Scheduler name to place with.
        #[arg(long, default_value = "service")]
        scheduler: String,

        /// Container request as JSON.
        #[arg(long)]
        container: String,

        /// Number of replicas to place.
        #[arg(long, default_value = "1")]
        replicas: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Check { config } => run_check(&config),
        Command::Simulate {
            config,
            scheduler,
            container,
            replicas,
        } => run_simulate(&config, &scheduler, &container, replicas).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<ClusterConfig> {
    let config = ClusterConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    info!(path = %path.display(), engines = config.engines.len(), "configuration loaded");
    Ok(config)
}

fn run_check(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;

    println!("listen_addr: {}", config.listen_addr);
    println!("engines:");
    for engine in &config.engines {
        let labels: Vec<&str> = engine.labels.iter().map(String::as_str).collect();
        println!(
            "  {:<16} {:<28} cpus={:<6} memory={:<8} labels=[{}]",
            engine.id,
            engine.addr,
            engine.cpus,
            engine.memory,
            labels.join(", ")
        );
    }
    println!("schedulers:");
    for scheduler in &config.schedulers {
        let kinds: Vec<String> = scheduler
            .strategies
            .iter()
            .map(|k| format!("{k:?}").to_lowercase())
            .collect();
        println!("  {:<16} [{}]", scheduler.name, kinds.join(", "));
    }
    Ok(())
}

async fn run_simulate(
    path: &Path,
    scheduler: &str,
    container_json: &str,
    replicas: u32,
) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let template: Container =
        serde_json::from_str(container_json).context("parsing --container")?;

    let manager = Arc::new(ClusterManager::from_config(&config, |_| {
        Arc::new(MemoryRuntime::new()) as Arc<dyn RuntimeClient>
    })?);

    info!(%scheduler, container = %template.name, replicas, "simulation starting");

    let placements = simulate(manager, scheduler, &template, replicas, shutdown_signal()).await?;

    println!("{}", serde_json::to_string_pretty(&placements)?);
    if placements.len() < replicas as usize {
        anyhow::bail!(
            "placed {} of {} replicas of {}",
            placements.len(),
            replicas,
            template.name
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Run the replica loop on its own task until it finishes or `shutdown`
/// fires. On shutdown the manager is closed, which lets the placement in
/// flight complete and stops the loop before the next replica.
async fn simulate(
    manager: Arc<ClusterManager>,
    scheduler: &str,
    template: &Container,
    replicas: u32,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<Vec<Placement>> {
    let mut task = tokio::spawn(place_replicas(
        manager.clone(),
        scheduler.to_string(),
        template.clone(),
        replicas,
    ));

    let placements = tokio::select! {
        joined = &mut task => joined?,
        () = shutdown => {
            manager.close().await;
            task.await?
        }
    };

    manager.close().await;
    Ok(placements)
}

/// Place up to `replicas` copies of `template`, stopping at the first
/// failure or once the manager is closed.
async fn place_replicas(
    manager: Arc<ClusterManager>,
    scheduler: String,
    template: Container,
    replicas: u32,
) -> Vec<Placement> {
    let mut placements = Vec::new();
    for i in 0..replicas {
        if manager.is_closed() {
            info!(placed = placements.len(), "manager closed, not placing further replicas");
            break;
        }
        let mut container = template.clone();
        container.name = replica_name(&template.name, i, replicas);

        match manager.schedule_container(&scheduler, container).await {
            Ok(placement) => placements.push(placement),
            Err(e) => {
                warn!(replica = i, error = %e, kind = ?e.kind(), "placement failed");
                break;
            }
        }
    }
    placements
}

/// Replica names get an index suffix only when there is more than one.
fn replica_name(name: &str, index: u32, replicas: u32) -> String {
    if replicas > 1 {
        format!("{name}-{}", index + 1)
    } else {
        name.to_string()
    }
}
