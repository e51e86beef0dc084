pub mod actuator;
pub mod controller;
pub mod doors;
pub mod manual;
pub mod sunlight;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::{HubError, HubResult};

pub use controller::{BlindSunlightController, Move, Plan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Open,
    Venetian,
    Closed,
}

impl Position {
    pub fn is_lowered(self) -> bool {
        self != Position::Open
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Position::Open => "Open",
            Position::Venetian => "Venetian",
            Position::Closed => "Closed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    Window,
    /// Covers a door someone may walk through.
    Door { door: String },
    /// An "All ..." segment; has no motor of its own.
    Aggregate { members: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: String,
    pub kind: SegmentKind,
}

impl Segment {
    pub fn door(&self) -> Option<&str> {
        match &self.kind {
            SegmentKind::Door { door } => Some(door),
            _ => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, SegmentKind::Aggregate { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlindConfig {
    pub name: String,
    pub light_sensor: String,
    pub temp_sensor: String,
    pub doors: Vec<String>,
    pub segments: Vec<Segment>,
    /// Ascending lux thresholds for levels 1 to 4.
    pub sunlight_thresholds: [u32; 4],
    pub temp_high: f64,
    pub temp_low: f64,
    pub temp_gap: f64,
    pub close_duration: Duration,
    pub tilt_time: Duration,
    pub poll_interval: Duration,
}

impl BlindConfig {
    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn validate(&self) -> HubResult<()> {
        let blind = &self.name;
        if self.sunlight_thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HubError::config(format!(
                "{}: sunlight thresholds must be strictly ascending",
                blind
            )));
        }
        if self.temp_low >= self.temp_high || self.temp_gap < 0.0 {
            return Err(HubError::config(format!(
                "{}: temperature thresholds need low < high and a non-negative gap",
                blind
            )));
        }
        // Re-entry needs low + gap < temp < high - gap.
        if self.temp_high - self.temp_low <= 2.0 * self.temp_gap {
            return Err(HubError::config(format!(
                "{}: temperature band {}..{} leaves no room inside a gap of {}",
                blind, self.temp_low, self.temp_high, self.temp_gap
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(HubError::config(format!("{}: door poll interval is zero", blind)));
        }

        let mut ids = HashSet::new();
        for segment in &self.segments {
            if !ids.insert(segment.id.as_str()) {
                return Err(HubError::config(format!("{}: duplicate segment {}", blind, segment.id)));
            }
        }
        for segment in &self.segments {
            match &segment.kind {
                SegmentKind::Window => {}
                SegmentKind::Door { door } => {
                    if !self.doors.contains(door) {
                        return Err(HubError::config(format!(
                            "{}: segment {} covers unknown door {}",
                            blind, segment.id, door
                        )));
                    }
                }
                SegmentKind::Aggregate { members } => {
                    for member in members {
                        match self.segment(member) {
                            Some(m) if !m.is_aggregate() => {}
                            _ => {
                                return Err(HubError::config(format!(
                                    "{}: aggregate {} has invalid member {}",
                                    blind, segment.id, member
                                )))
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Per-blind automation state, persisted across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlindRuntimeState {
    pub current_level: u8,
    pub previous_level: u8,
    pub temp_outside_threshold: bool,
    pub auto_override: bool,
    pub door_open: bool,
    /// Set while a door kept a door segment away from its requested position.
    pub door_override: bool,
}

/// A requested position that was not applied because a door was open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyOverride {
    pub blind: String,
    pub segment: String,
    pub door: String,
    pub requested: Position,
    pub applied: Position,
}

impl fmt::Display for SafetyOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} refused while door {} is open, held {}",
            self.blind, self.segment, self.requested, self.door, self.applied
        )
    }
}

#[cfg(test)]
pub(crate) fn patio_config() -> BlindConfig {
    let window = |id: &str| Segment {
        id: id.to_owned(),
        kind: SegmentKind::Window,
    };
    BlindConfig {
        name: "Patio".to_owned(),
        light_sensor: "Patio Lux".to_owned(),
        temp_sensor: "Outside".to_owned(),
        doors: vec!["Patio Door".to_owned()],
        segments: vec![
            window("Left"),
            window("Right"),
            Segment {
                id: "Door".to_owned(),
                kind: SegmentKind::Door {
                    door: "Patio Door".to_owned(),
                },
            },
            Segment {
                id: "All".to_owned(),
                kind: SegmentKind::Aggregate {
                    members: vec!["Left".to_owned(), "Right".to_owned(), "Door".to_owned()],
                },
            },
        ],
        sunlight_thresholds: [500, 5000, 12000, 20000],
        temp_high: 26.0,
        temp_low: 12.0,
        temp_gap: 1.0,
        close_duration: Duration::from_secs(25),
        tilt_time: Duration::from_secs(2),
        poll_interval: Duration::from_millis(500),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_is_valid() {
        assert_eq!(patio_config().validate(), Ok(()));
    }

    #[test]
    fn rejects_unknown_door_and_member() {
        let mut config = patio_config();
        config.doors.clear();
        assert!(matches!(config.validate(), Err(HubError::ConfigInconsistency { .. })));

        let mut config = patio_config();
        config.segments.push(Segment {
            id: "Everything".to_owned(),
            kind: SegmentKind::Aggregate {
                members: vec!["All".to_owned()],
            },
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let mut config = patio_config();
        config.sunlight_thresholds = [500, 5000, 5000, 20000];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_gap_that_swallows_the_band() {
        let mut config = patio_config();
        config.temp_high = 26.0;
        config.temp_low = 12.0;
        config.temp_gap = 8.0;
        assert!(matches!(config.validate(), Err(HubError::ConfigInconsistency { .. })));

        config.temp_gap = 7.0;
        assert!(config.validate().is_err());

        config.temp_gap = 6.5;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn override_report_names_the_door() {
        let report = SafetyOverride {
            blind: "Patio".to_owned(),
            segment: "Door".to_owned(),
            door: "Patio Door".to_owned(),
            requested: Position::Closed,
            applied: Position::Open,
        };
        assert_eq!(
            report.to_string(),
            "Patio Door: Closed refused while door Patio Door is open, held Open"
        );
    }
}
