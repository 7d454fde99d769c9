//! `pursuit` CLI: offline scenario runs, threaded runs against the simulated
//! platform, configuration and replay tools.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flight_control::{spawn_pipeline, Boundaries, Clock, MonotonicClock, SystemConfig};
use sim::replay::{load_replay, save_replay, ReplaySummary};
use sim::scenarios::{Scenario, ScenarioKind};
use sim::{run_offline, SimCamera, SimDetector, SimPlatform, SimRangeSensor, World};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pursuit", about = "Pedestrian pursuit control core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario offline, deterministically, and report the outcome.
    Simulate {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// JSON configuration (defaults for missing fields)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the summary to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the full replay log
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Run the threaded pipeline in real time against the simulated platform.
    /// Type `q` and Enter to land and stop.
    Fly {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Mission time limit in seconds (defaults to the scenario duration)
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Configuration tools.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Summarise a saved replay log.
    Replay {
        /// Path to replay JSON file
        input: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as JSON.
    Dump,
    /// Load and validate a configuration file.
    Check { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            scenario,
            seed,
            config,
            output,
            save_replay: save_path,
        } => run_simulate(
            scenario,
            seed,
            config.as_deref(),
            output.as_deref(),
            save_path.as_deref(),
        ),
        Commands::Fly {
            scenario,
            seed,
            config,
            duration,
        } => run_fly(scenario, seed, config.as_deref(), duration),
        Commands::Config { action } => match action {
            ConfigAction::Dump => {
                println!("{}", SystemConfig::default().to_json_pretty()?);
                Ok(())
            }
            ConfigAction::Check { path } => {
                SystemConfig::load(&path)
                    .with_context(|| format!("{} is not a valid configuration", path.display()))?;
                println!("{}: ok", path.display());
                Ok(())
            }
        },
        Commands::Replay { input } => {
            let log = load_replay(&input)
                .with_context(|| format!("reading replay {}", input.display()))?;
            print_summary(&log.summary());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SystemConfig> {
    match path {
        Some(p) => Ok(SystemConfig::load(p)
            .with_context(|| format!("loading configuration {}", p.display()))?),
        None => Ok(SystemConfig::default()),
    }
}

fn print_summary(s: &ReplaySummary) {
    println!("Scenario '{}' (seed={})", s.scenario, s.seed);
    println!(
        "  {} frames, {} control ticks ({} searching, {} tracking), {} velocity commands",
        s.frames, s.ticks, s.searching_ticks, s.tracking_ticks, s.velocity_commands
    );
    match s.first_lock_time {
        Some(t) => println!("  first lock at {t:.2}s"),
        None => println!("  never locked"),
    }
    println!(
        "  lock ratio {:.3}, center RMSE {:.1}px, {} id switches",
        s.lock_ratio, s.rmse_center, s.id_switches
    );
    println!("  outcome: {:?}", s.outcome);
}

fn run_simulate(
    kind: ScenarioKind,
    seed: u64,
    config_path: Option<&Path>,
    output_path: Option<&Path>,
    replay_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let scenario = Scenario::build(kind, seed);
    println!(
        "Running scenario '{}' (seed={}, duration={:.0}s)...",
        scenario.name, seed, scenario.duration
    );

    let start = std::time::Instant::now();
    let log = run_offline(&scenario, &config)?;
    let summary = log.summary();
    print_summary(&summary);
    println!("  elapsed {:.2}s", start.elapsed().as_secs_f64());

    if let Some(rpath) = replay_path {
        save_replay(&log, rpath)?;
        println!("Replay saved to {}", rpath.display());
    }
    if let Some(opath) = output_path {
        std::fs::write(opath, serde_json::to_string_pretty(&summary)?)?;
        println!("Summary saved to {}", opath.display());
    }
    Ok(())
}

fn run_fly(
    kind: ScenarioKind,
    seed: u64,
    config_path: Option<&Path>,
    duration: Option<f64>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let scenario = Scenario::build(kind, seed);
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let world = World::shared(scenario.pedestrians.clone());
    let platform = Arc::new(SimPlatform::new(world.clone(), clock.clone()));

    let boundaries = Boundaries {
        frames: Box::new(SimCamera::new(
            world.clone(),
            scenario.camera,
            clock.clone(),
            scenario.frame_dt,
        )),
        detector: Box::new(SimDetector::new(
            world.clone(),
            scenario.camera,
            scenario.detector.clone(),
            seed,
        )),
        range: Box::new(SimRangeSensor::new(world, scenario.tof.clone(), seed.wrapping_add(1))),
        actuator: platform.clone(),
        stream: Some(platform.clone()),
    };

    let mission = duration.unwrap_or(scenario.duration);
    let handles = spawn_pipeline(&config, boundaries, clock, Some(mission))?;
    println!("Flying '{}' for up to {mission:.0}s. Type q + Enter to land.", scenario.name);

    // Detached: stays blocked on stdin until the process exits.
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                    let _ = tx.send(());
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });

    while !handles.is_stopped() {
        if rx.try_recv().is_ok() {
            info!("operator requested landing");
            handles.request_stop();
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let summary = handles.join();
    match &summary.shutdown {
        Some(report) => println!(
            "Stopped: {} (land {:?}, disconnect {:?})",
            report.reason, report.land, report.disconnect
        ),
        None => println!("Stopped"),
    }
    if !summary.panicked.is_empty() {
        warn!(stages = ?summary.panicked, "stages panicked");
    }
    println!(
        "Platform received {} commands, landed: {}",
        platform.commands().len(),
        platform.is_landed()
    );
    Ok(())
}
