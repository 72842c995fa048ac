use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lightning_connector::accelerators::Devices;
use lightning_connector::config::{LightningConfig, TrainerConfig};
use lightning_connector::connector::{AcceleratorConnector, Deterministic};
use lightning_connector::plugins::{environments, EnvironmentKind};
use lightning_connector::scheduler::queue::delta_queue;
use lightning_connector::scheduler::SchedulerThread;
use lightning_connector::strategies::StrategyRegistry;
use lightning_connector::system::{HostPlatform, Platform, StaticPlatform};

#[derive(Parser)]
#[command(
    name = "lightning-connector",
    about = "Resolve accelerator, strategy and precision for a training run",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $LIGHTNING_CONNECTOR_CONFIG, then ./lightning.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Resolve against a simulated machine instead of this host, e.g. "cuda=4,interactive=1"
    #[arg(long, global = true)]
    simulate: Option<String>,

    /// JSON output for machine parsing
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve trainer flags into a concrete run configuration
    Resolve {
        #[arg(long)]
        accelerator: Option<String>,

        #[arg(long)]
        strategy: Option<String>,

        #[arg(long)]
        precision: Option<String>,

        /// "auto", a count, or a comma list of indices
        #[arg(long)]
        devices: Option<String>,

        #[arg(long)]
        num_nodes: Option<usize>,

        /// Plugin as kind:value; repeatable
        #[arg(long = "plugin")]
        plugins: Vec<String>,

        #[arg(long)]
        sync_batchnorm: bool,

        #[arg(long)]
        benchmark: Option<bool>,

        /// true, false or warn
        #[arg(long)]
        deterministic: Option<String>,
    },

    /// List registered accelerators and whether they are usable here
    Accelerators,

    /// List registered strategies
    Strategies,

    /// Show the detected cluster environment
    Environment,

    /// Inspect or run cron schedules from the config file
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List configured schedules
    List,

    /// Preview upcoming fires
    DryRun {
        /// Preview window in hours
        #[arg(long, default_value = "24")]
        hours: u64,
    },

    /// Run the scheduler and print emitted deltas
    Run {
        /// Exit after this many deltas
        #[arg(long)]
        max_deltas: Option<usize>,
    },
}

fn init_tracing(cfg: &LightningConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    if cfg.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn platform_for(simulate: Option<&str>) -> Result<Box<dyn Platform>> {
    match simulate {
        Some(spec) => Ok(Box::new(StaticPlatform::from_spec(spec)?)),
        None => Ok(Box::new(HostPlatform::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => LightningConfig::load(path)?,
        None => LightningConfig::load_or_default(),
    };
    init_tracing(&cfg);

    let platform = platform_for(cli.simulate.as_deref())?;

    match cli.command {
        Commands::Resolve {
            accelerator,
            strategy,
            precision,
            devices,
            num_nodes,
            plugins,
            sync_batchnorm,
            benchmark,
            deterministic,
        } => {
            let mut trainer: TrainerConfig = cfg.trainer.clone();
            if let Some(a) = accelerator {
                trainer.accelerator = a;
            }
            if let Some(s) = strategy {
                trainer.strategy = s;
            }
            if let Some(p) = precision {
                trainer.precision = p;
            }
            if let Some(d) = devices {
                trainer.devices = d.parse::<Devices>().map_err(|e| anyhow!(e))?;
            }
            if let Some(n) = num_nodes {
                trainer.num_nodes = n;
            }
            trainer.plugins.extend(plugins);
            trainer.sync_batchnorm |= sync_batchnorm;
            if benchmark.is_some() {
                trainer.benchmark = benchmark;
            }
            if let Some(d) = deterministic {
                trainer.deterministic = Some(d.parse::<Deterministic>().map_err(|e| anyhow!(e))?);
            }
            tracing::info!(
                accelerator = %trainer.accelerator,
                strategy = %trainer.strategy,
                precision = %trainer.precision,
                devices = %trainer.devices,
                "Resolving run configuration"
            );

            let accelerators = cfg.accelerator_registry()?;
            let strategies = StrategyRegistry::with_defaults();
            let connector_config = trainer.to_connector_config(platform.as_ref())?;
            let connector =
                AcceleratorConnector::new(connector_config, &accelerators, &strategies, platform.as_ref())?;
            let summary = connector.summary();

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("\n=== Resolved Run Configuration ===");
                println!("{:<22} : {}", "Accelerator", summary.accelerator);
                println!("{:<22} : {}", "Strategy", summary.strategy);
                println!("{:<22} : {}", "Precision", summary.precision);
                println!("{:<22} : {}", "Precision plugin", summary.precision_plugin);
                println!("{:<22} : {}", "Cluster environment", summary.cluster_environment);
                println!("{:<22} : {:?}", "Devices", summary.devices);
                println!("{:<22} : {}", "Root device", summary.root_device);
                println!("{:<22} : {}", "Nodes", summary.num_nodes);
                if let Some(ws) = summary.world_size {
                    println!("{:<22} : {}", "World size", ws);
                }
                if let Some(launcher) = summary.launcher {
                    println!("{:<22} : {:?}", "Launcher", launcher);
                }
                println!("{:<22} : {}", "Distributed", summary.is_distributed);
                if !summary.warnings.is_empty() {
                    println!("\nWarnings:");
                    for w in &summary.warnings {
                        println!(" - {}", w);
                    }
                }
                println!();
            }
        }

        Commands::Accelerators => {
            let registry = cfg.accelerator_registry()?;
            let infos = registry.describe(platform.as_ref());
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                println!("{:<10} | {:<9} | {:<7} | Description", "Name", "Available", "Devices");
                println!("{:-<10}-|-{:-<9}-|-{:-<7}-|-{:-<30}", "", "", "", "");
                for info in infos {
                    let status = if info.available { "yes" } else { "no" };
                    println!(
                        "{:<10} | {:<9} | {:<7} | {}",
                        info.name, status, info.device_count, info.description
                    );
                }
            }
        }

        Commands::Strategies => {
            let infos = StrategyRegistry::with_defaults().describe();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                println!("{:<36} | {:<14} | Description", "Name", "Family");
                println!("{:-<36}-|-{:-<14}-|-{:-<30}", "", "", "");
                for info in infos {
                    let family = serde_json::to_value(info.family)?;
                    println!(
                        "{:<36} | {:<14} | {}",
                        info.name,
                        family.as_str().unwrap_or_default(),
                        info.description
                    );
                }
            }
        }

        Commands::Environment => {
            let env = environments::detect(platform.as_ref());
            let probes: Vec<_> = EnvironmentKind::PROBE_ORDER
                .iter()
                .map(|kind| (kind.name(), kind.detect(platform.as_ref())))
                .collect();
            if cli.json {
                let value = serde_json::json!({
                    "name": env.name(),
                    "creates_processes_externally": env.creates_processes_externally(),
                    "main_address": env.main_address(),
                    "main_port": env.main_port(),
                    "world_size": env.world_size(),
                    "global_rank": env.global_rank(),
                    "local_rank": env.local_rank(),
                    "node_rank": env.node_rank(),
                    "probes": probes
                        .iter()
                        .map(|(name, hit)| serde_json::json!({ "name": name, "detected": hit }))
                        .collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{:<22} : {}", "Environment", env.name());
                println!("{:<22} : {}:{}", "Main address", env.main_address(), env.main_port());
                println!("{:<22} : {}", "External processes", env.creates_processes_externally());
                println!(
                    "{:<22} : node {} / local {}",
                    "Ranks",
                    env.node_rank(),
                    env.local_rank()
                );
                println!("\nProbes:");
                for (name, hit) in probes {
                    println!(" - {:<22} {}", name, if hit { "detected" } else { "-" });
                }
            }
        }

        Commands::Schedule { action } => {
            let schedules = cfg.schedule_table(Utc::now())?;
            match action {
                ScheduleAction::List => {
                    let list = schedules.list()?;
                    if cli.json {
                        let rows: Vec<_> = list
                            .iter()
                            .map(|(hash, s)| serde_json::json!({ "call_hash": hash, "schedule": s, "next_fire": s.next_fire() }))
                            .collect();
                        println!("{}", serde_json::to_string_pretty(&rows)?);
                    } else if list.is_empty() {
                        println!("No schedules found.");
                    } else {
                        println!("{:<16} | {:<24} | {:<15} | Next fire", "Call hash", "Name", "Cron");
                        println!("{:-<16}-|-{:-<24}-|-{:-<15}-|-{:-<25}", "", "", "", "");
                        for (hash, s) in list {
                            let next = s.next_fire().map(|t| t.to_rfc3339()).unwrap_or_default();
                            println!("{:<16} | {:<24} | {:<15} | {}", hash, s.name, s.cron_pattern, next);
                        }
                    }
                }
                ScheduleAction::DryRun { hours } => {
                    let runs = schedules.preview(Utc::now(), hours)?;
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&runs)?);
                    } else if runs.is_empty() {
                        println!("No runs scheduled in next {} hours.", hours);
                    } else {
                        println!("Upcoming runs (next {} hours):", hours);
                        for run in runs {
                            println!("{} : {} ({})", run.at.to_rfc3339(), run.name, run.call_hash);
                        }
                    }
                }
                ScheduleAction::Run { max_deltas } => {
                    if schedules.is_empty() {
                        println!("No schedules found.");
                        return Ok(());
                    }
                    let (tx, mut rx) = delta_queue();
                    let handle = SchedulerThread::new(schedules, tx)
                        .with_interval(cfg.scheduler.poll_interval())
                        .spawn();
                    let mut seen = 0usize;
                    loop {
                        tokio::select! {
                            delta = rx.recv() => {
                                let Some(delta) = delta else { break };
                                println!("{}", serde_json::to_string(&delta).context("failed to encode delta")?);
                                seen += 1;
                                if max_deltas.is_some_and(|max| seen >= max) {
                                    break;
                                }
                            }
                            _ = tokio::signal::ctrl_c() => {
                                tracing::info!("Interrupted, stopping scheduler");
                                break;
                            }
                        }
                    }
                    handle.stop().await;
                }
            }
        }
    }

    Ok(())
}
