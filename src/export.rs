use std::error::Error;

use csv::Writer;

use crate::engine::Engine;
use crate::facade::LineInfo;
use crate::model::LineId;

/// Writes one row per (line, stop) with the enhanced delay statistics accumulated so
/// far, for offline inspection of a finished run.
pub fn export_delay_statistics(
    engine: &Engine,
    lines: &[(LineId, LineInfo)],
    filename_prefix: &str,
) -> Result<(), Box<dyn Error>> {
    let mut writer = Writer::from_path(format!("{filename_prefix}-delay-stats.csv"))?;
    writer.write_record(["line", "stop", "avg_delay", "count", "on_time_count", "min_delay", "max_delay", "p75_delay"])?;
    for (line, info) in lines {
        for stop in 0..info.stops.len() {
            let stop_index = stop + 1;
            let Some(stats) = engine.get_enhanced_statistics(*line, stop_index) else {
                continue;
            };
            writer.write_record([
                line.to_string(),
                stop_index.to_string(),
                format!("{:.1}", stats.avg_delay),
                stats.total_count.to_string(),
                stats.on_time_count.to_string(),
                stats.min_delay.to_string(),
                stats.max_delay.to_string(),
                stats.p75_delay.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Writes a snapshot blob to disk alongside its schema version, for the
/// `timetable-demo snapshot` subcommand.
pub fn export_snapshot(engine: &Engine, filename_prefix: &str) -> Result<(), Box<dyn Error>> {
    let (version, blob) = engine.snapshot()?;
    let path = format!("{filename_prefix}-snapshot-v{version}.json");
    std::fs::write(path, blob).map_err(|e| Box::new(e) as Box<dyn Error>)
}

pub fn import_snapshot(engine: &mut Engine, path: &str) -> Result<(), Box<dyn Error>> {
    let blob = std::fs::read(path)?;
    let version = path
        .rsplit("-v")
        .next()
        .and_then(|s| s.trim_end_matches(".json").parse::<u32>().ok())
        .unwrap_or(crate::snapshot::CURRENT_VERSION);
    engine.restore(version, &blob)?;
    Ok(())
}
