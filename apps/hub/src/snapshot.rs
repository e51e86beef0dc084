use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::aircon::damper::DamperPercent;
use crate::aircon::effectiveness::EffectivenessCheckpoint;
use crate::aircon::tariff::AirconRunningCost;
use crate::aircon::Mode;
use crate::blinds::{BlindRuntimeState, Position};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermostatSnapshot {
    pub mode: Mode,
    pub target_temp: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlindSnapshot {
    pub state: BlindRuntimeState,
    pub positions: BTreeMap<String, Position>,
}

/// Everything restored at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub doors: BTreeMap<String, bool>,
    #[serde(default)]
    pub blinds: BTreeMap<String, BlindSnapshot>,
    #[serde(default)]
    pub thermostats: BTreeMap<String, ThermostatSnapshot>,
    #[serde(default)]
    pub aircon_mode: Mode,
    #[serde(default)]
    pub damper: Option<DamperPercent>,
    #[serde(default)]
    pub running_cost: AirconRunningCost,
    #[serde(default)]
    pub effectiveness: EffectivenessCheckpoint,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            doors: BTreeMap::new(),
            blinds: BTreeMap::new(),
            thermostats: BTreeMap::new(),
            aircon_mode: Mode::Off,
            damper: None,
            running_cost: AirconRunningCost::default(),
            effectiveness: EffectivenessCheckpoint::default(),
        }
    }
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file or a different version gives the defaults.
    pub fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            info!("No state snapshot at {}, starting fresh", self.path.display());
            return Ok(Snapshot::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state snapshot {}", self.path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state snapshot {}", self.path.display()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                found = snapshot.version,
                expected = SNAPSHOT_VERSION,
                "state snapshot version mismatch, starting fresh"
            );
            return Ok(Snapshot::default());
        }
        info!(
            "Loaded state snapshot: {} blinds, {} thermostats, aircon {}",
            snapshot.blinds.len(),
            snapshot.thermostats.len(),
            snapshot.aircon_mode
        );
        Ok(snapshot)
    }

    /// Writes a temp file next to the snapshot and renames it into place.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize state snapshot")?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to rename {} to {}", tmp.display(), self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aircon::effectiveness::EffectivenessRecord;
    use crate::aircon::Zone;
    use tempfile::tempdir;

    fn populated() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.doors.insert("Patio Door".to_owned(), true);
        snapshot.blinds.insert(
            "Living Room Blinds".to_owned(),
            BlindSnapshot {
                state: BlindRuntimeState {
                    current_level: 3,
                    previous_level: 4,
                    temp_outside_threshold: true,
                    auto_override: false,
                    door_open: true,
                    door_override: true,
                },
                positions: BTreeMap::from([
                    ("Left Window".to_owned(), Position::Venetian),
                    ("Patio Door".to_owned(), Position::Open),
                    ("All Blinds".to_owned(), Position::Venetian),
                ]),
            },
        );
        snapshot.thermostats.insert(
            "Living".to_owned(),
            ThermostatSnapshot {
                mode: Mode::Cool,
                target_temp: 23.5,
            },
        );
        snapshot.aircon_mode = Mode::Cool;
        snapshot.damper = Some(DamperPercent::BALANCED);
        snapshot.running_cost = AirconRunningCost {
            total_cost: 123.456789,
            total_hours: 310.1,
        };
        snapshot.effectiveness.zones.insert(
            Zone::Night,
            EffectivenessRecord {
                max_cool: Some(2.7),
                min_cool: Some(0.6),
                ..EffectivenessRecord::default()
            },
        );
        snapshot
    }

    #[test]
    fn missing_file_gives_defaults() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path().join("state.json"));
        assert_eq!(store.load()?, Snapshot::default());
        Ok(())
    }

    #[test]
    fn round_trip_is_lossless() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path().join("nested").join("state.json"));
        let snapshot = populated();
        store.save(&snapshot)?;
        assert!(!store.path().with_extension("tmp").exists());
        assert_eq!(store.load()?, snapshot);
        Ok(())
    }

    #[test]
    fn other_version_is_ignored() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION + 1,
            ..populated()
        };
        store.save(&snapshot)?;
        assert_eq!(store.load()?, Snapshot::default());
        Ok(())
    }
}
