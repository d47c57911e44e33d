//! QARMA Quantum Engine
//!
//! Command-line front end: runs the demo workloads and inspects saved
//! observer databases and configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use qarma_quantum::demos::{run_demo, DEMO_NAMES};
use qarma_quantum::{AiObserver, CollapseStrategy, DispatcherKind, EngineConfig, QuantumEngine};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "qarma")]
#[command(about = "QARMA Quantum Engine - speculative parallel execution", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short = 'w', long, default_value = "0")]
    workers: usize,

    /// Dispatcher (serial, work-stealing, rayon)
    #[arg(short = 'd', long)]
    dispatcher: Option<DispatcherKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo workload ("all" runs every demo)
    Demo {
        name: String,

        /// Save the observer's learning database afterwards
        #[arg(long, value_name = "FILE")]
        save_db: Option<PathBuf>,
    },

    /// List collapse strategies and what each requires
    Strategies,

    /// Print a saved learning database
    ObserverReport {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = cli.config {
        log::info!("Loading config from: {}", config_path.display());
        EngineConfig::load(&config_path)?
    } else {
        EngineConfig::default()
    };

    // Override with CLI options
    if cli.workers > 0 {
        config.worker_threads = cli.workers;
    }
    if let Some(dispatcher) = cli.dispatcher {
        config.dispatcher = dispatcher;
    }

    match cli.command {
        Commands::Demo { name, save_db } => {
            let engine = QuantumEngine::new(config)?;
            let names: Vec<&str> = if name == "all" {
                DEMO_NAMES.to_vec()
            } else {
                vec![name.as_str()]
            };

            for name in names {
                let summary = run_demo(&engine, name)?;
                println!("{:<16} {}", name, summary);
            }

            let stats = engine.stats();
            let observer = engine.observer().stats();
            let scheduler = engine.scheduler().stats();
            let bus = engine.bus().stats();
            println!();
            println!(
                "Engine:     {} runs, {} collapsed, {} failed",
                stats.runs, stats.collapses_succeeded, stats.collapses_failed
            );
            println!(
                "Observer:   {} observations, {} profiles",
                observer.total_observations, observer.entries
            );
            println!(
                "Scheduler:  {} scheduled, {} accurate, {} patterns",
                scheduler.total_scheduled,
                scheduler.predictions_accurate,
                scheduler.learned_patterns
            );
            println!(
                "Bus:        {} sent, {} received, {} helpful",
                bus.messages_sent, bus.messages_received, bus.helpful_messages
            );

            if let Some(path) = save_db {
                engine.observer().save(&path)?;
                println!("Learning database saved to {}", path.display());
            }
        }

        Commands::Strategies => {
            for strategy in CollapseStrategy::ALL {
                println!(
                    "{:>2}  {:<12} requires {}",
                    strategy.index(),
                    strategy.name(),
                    strategy.requirement()
                );
            }
        }

        Commands::ObserverReport { db } => {
            let observer = AiObserver::new();
            observer.load(&db)?;
            let stats = observer.stats();
            println!("{} observations across {} profiles", stats.total_observations, stats.entries);

            for (i, entry) in observer.entries().iter().enumerate() {
                let p = &entry.profile;
                println!(
                    "\n[{}] qubits={} avg={}ms var={} eval={} all={} size={}  \
                     ({} obs, confidence {:.2})",
                    i,
                    p.qubit_count,
                    p.avg_execution_time,
                    p.variance,
                    p.has_evaluation,
                    p.requires_all,
                    p.data_size,
                    entry.observation_count,
                    entry.confidence
                );
                for strategy in CollapseStrategy::ALL {
                    let m = entry.metrics_for(strategy);
                    if m.total_uses == 0 {
                        continue;
                    }
                    println!(
                        "    {:<12} uses={:<4} success={:.0}% avg={:.1}ms \
                         quality={:.2} score={:.4}",
                        strategy.name(),
                        m.total_uses,
                        m.success_rate() * 100.0,
                        m.avg_time_ms(),
                        m.avg_quality,
                        m.score()
                    );
                }
                println!("    recommended: {}", observer.recommend_strategy(p));
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
