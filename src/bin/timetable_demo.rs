//! Demo CLI driving the timetable core against a SQLite scenario fixture: loads the
//! scenario, advances the simulated clock a fixed number of ticks calling
//! `Engine::update_for_vehicle` on every vehicle each tick, then exports delay
//! statistics (and optionally a snapshot) as CSV/JSON.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use transit_timetable::export;
use transit_timetable::facade::SimulationFacade;
use transit_timetable::scenario::{ScenarioLoader, SqliteScenarioLoader};

#[derive(Parser)]
#[command(name = "timetable-demo")]
#[command(about = "Runs a timetable scenario fixture through the scheduling core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a scenario and drive it for a fixed number of ticks, exporting stats.
    Run {
        /// Path to the SQLite scenario database.
        #[arg(long)]
        db: PathBuf,
        /// Scenario id within the database.
        #[arg(long)]
        scenario: String,
        /// Number of one-second ticks to simulate.
        #[arg(long, default_value_t = 3600)]
        ticks: i64,
        /// Output file prefix for the exported CSV/snapshot.
        #[arg(long, default_value = "timetable-run")]
        out_prefix: String,
        /// Also write a snapshot of the final model state.
        #[arg(long)]
        snapshot: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            db,
            scenario,
            ticks,
            out_prefix,
            snapshot,
        } => run(&db, scenario, ticks, &out_prefix, snapshot),
    }
}

fn run(db: &PathBuf, scenario: String, ticks: i64, out_prefix: &str, snapshot: bool) -> Result<(), Box<dyn std::error::Error>> {
    let loader = SqliteScenarioLoader::new(db.to_str().unwrap_or_default(), scenario)
        .map_err(|e| format!("failed to open scenario db: {e:?}"))?;
    let (mut engine, facade) = loader.load().map_err(|e| format!("failed to load scenario: {e:?}"))?;

    let lines: Vec<_> = facade
        .list_lines()
        .into_iter()
        .filter_map(|l| facade.get_line_info(l).map(|info| (l, info)))
        .collect();
    let vehicles: Vec<_> = lines
        .iter()
        .flat_map(|(line, _)| facade.list_vehicles_on_line(*line))
        .collect();

    tracing::info!(lines = lines.len(), vehicles = vehicles.len(), ticks, "starting run");

    for t in 0..ticks {
        *facade.now.borrow_mut() = t;
        for &vehicle in &vehicles {
            engine.update_for_vehicle(&facade, vehicle);
        }
        if t % 600 == 0 {
            engine.clean_timetable(&facade);
        }
    }

    export::export_delay_statistics(&engine, &lines, out_prefix)?;
    if snapshot {
        export::export_snapshot(&engine, out_prefix)?;
    }
    tracing::info!("run complete, exported to {out_prefix}-*");
    Ok(())
}
