//! Lap table and snapshot export.
//!
//! One delimited table per entity with header `Lap,Time,Penalty`: lap index,
//! raw duration (2 decimals) and the penalty charged to the lap (1 decimal).
//! Entities without a completed lap produce no file.

use crate::race::{EntitySnapshot, RaceSnapshot};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Header row of every lap table.
pub const LAP_TABLE_HEADER: &str = "Lap,Time,Penalty";

/// Renders the lap table of one entity.
pub fn lap_table(entity: &EntitySnapshot) -> String {
    let mut out = String::with_capacity(16 * (entity.laps.len() + 1));
    out.push_str(LAP_TABLE_HEADER);
    out.push('\n');
    for lap in &entity.laps {
        // Writing into a String cannot fail
        let _ = writeln!(out, "{},{:.2},{:.1}", lap.lap_index, lap.duration, lap.penalty_seconds);
    }
    out
}

/// File name for an entity's table: spaces in the display name become `_`.
pub fn table_file_name(display_name: &str, suffix: &str) -> String {
    format!("{}_{}.csv", display_name.replace(' ', "_"), suffix)
}

/// Writes one table per entity with at least one lap into `dir`.
///
/// Returns the paths written, in entity order.
pub fn write_lap_tables(
    dir: &Path,
    snapshot: &RaceSnapshot,
    suffix: &str,
) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for entity in snapshot.entities.iter().filter(|e| !e.laps.is_empty()) {
        let path = dir.join(table_file_name(&entity.display_name, suffix));
        fs::write(&path, lap_table(entity))?;
        info!("💾 Saved {} laps of {} to {}", entity.laps.len(), entity.display_name, path.display());
        written.push(path);
    }
    Ok(written)
}

/// Writes the whole snapshot as pretty-printed JSON.
pub fn write_snapshot_json(path: &Path, snapshot: &RaceSnapshot) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, json)?;
    Ok(())
}

/// Export failures.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::{Lap, RacePhase};
    use finishline_env::EntityId;
    use uuid::Uuid;

    fn lap(index: u32, duration: f64, penalty: f64) -> Lap {
        Lap {
            entity_id: EntityId::from("blue-car"),
            lap_index: index,
            duration,
            penalty_seconds: penalty,
            completed_at: 0.0,
        }
    }

    fn entity(name: &str, laps: Vec<Lap>) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: EntityId::from(name.to_lowercase().replace(' ', "-")),
            display_name: name.to_string(),
            laps,
            current_lap_elapsed: None,
            pending_penalty: 0.0,
            best_lap: None,
            last_seen: None,
            visible: false,
            penalty_flash: false,
        }
    }

    fn snapshot(entities: Vec<EntitySnapshot>) -> RaceSnapshot {
        RaceSnapshot {
            session_id: Uuid::new_v4(),
            phase: RacePhase::Running,
            finish_line: None,
            race_start: None,
            taken_at: 0.0,
            entities,
        }
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("finishline-export-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_lap_table_format() {
        let blue = entity("Blue Car", vec![lap(1, 5.1, 2.0), lap(2, 4.876, 0.0)]);
        assert_eq!(lap_table(&blue), "Lap,Time,Penalty\n1,5.10,2.0\n2,4.88,0.0\n");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(table_file_name("Blue Car", "1700000000"), "Blue_Car_1700000000.csv");
    }

    #[test]
    fn test_write_skips_entities_without_laps() {
        let dir = scratch_dir();
        let snap = snapshot(vec![
            entity("Blue Car", vec![lap(1, 5.1, 0.0)]),
            entity("Green Car", Vec::new()),
        ]);

        let written = write_lap_tables(&dir, &snap, "42").unwrap();
        assert_eq!(written, vec![dir.join("Blue_Car_42.csv")]);

        let contents = fs::read_to_string(&written[0]).unwrap();
        assert!(contents.starts_with(LAP_TABLE_HEADER));
        assert!(!dir.join("Green_Car_42.csv").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_snapshot_json() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("snapshot.json");
        let snap = snapshot(vec![entity("Blue Car", vec![lap(1, 5.1, 0.0)])]);

        write_snapshot_json(&path, &snap).unwrap();
        let back: RaceSnapshot = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, snap);

        fs::remove_dir_all(&dir).unwrap();
    }
}
