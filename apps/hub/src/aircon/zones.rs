use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-thermostat and master aircon mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Off,
    Heat,
    Cool,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Off => "Off",
            Mode::Heat => "Heat",
            Mode::Cool => "Cool",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Day,
    Night,
    Indoor,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Zone::Day => "Day Zone",
            Zone::Night => "Night Zone",
            Zone::Indoor => "Indoor",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thermostat {
    pub name: String,
    pub zone: Zone,
    pub current_temp: Option<f64>,
    pub target_temp: f64,
    pub mode: Mode,
    pub active: bool,
    #[serde(skip)]
    last_reading: Option<DateTime<Local>>,
}

impl Thermostat {
    pub fn new(name: &str, zone: Zone, target_temp: f64) -> Self {
        Thermostat {
            name: name.to_owned(),
            zone,
            current_temp: None,
            target_temp,
            mode: Mode::Off,
            active: false,
            last_reading: None,
        }
    }

    pub fn record_reading(&mut self, temp: f64, at: DateTime<Local>) {
        self.current_temp = Some(temp);
        self.last_reading = Some(at);
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Off {
            self.active = false;
        }
    }

    /// Switched on and reporting. A reading older than `stale_after` counts as no reading.
    pub fn is_live(&self, now: DateTime<Local>, stale_after: Duration) -> bool {
        self.mode != Mode::Off
            && self.current_temp.is_some()
            && self.last_reading.is_some_and(|at| now - at <= stale_after)
    }

    pub fn is_stale(&self, now: DateTime<Local>, stale_after: Duration) -> bool {
        self.last_reading.is_some_and(|at| now - at > stale_after)
    }

    /// Returns true if the flag changed.
    pub fn set_active(&mut self, active: bool) -> bool {
        let active = active && self.mode != Mode::Off;
        let changed = self.active != active;
        self.active = active;
        changed
    }
}

/// Derived view of a zone. Never stored; recomputed from the thermostats on demand.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ZoneAggregate {
    pub sensor_active: bool,
    pub target_temp: f64,
    pub current_temp: f64,
}

pub struct ZoneAggregator {
    stale_after: Duration,
}

impl ZoneAggregator {
    pub fn new(stale_after: Duration) -> Self {
        ZoneAggregator { stale_after }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Mean target and current temperature of the live members of `zone`.
    pub fn aggregate(&self, thermostats: &[Thermostat], zone: Zone, now: DateTime<Local>) -> ZoneAggregate {
        let mut count = 0usize;
        let mut target = 0.0;
        let mut current = 0.0;
        for t in thermostats
            .iter()
            .filter(|t| t.zone == zone && t.is_live(now, self.stale_after))
        {
            count += 1;
            target += t.target_temp;
            current += t.current_temp.unwrap_or(t.target_temp);
        }

        if count == 0 {
            return ZoneAggregate::default();
        }
        ZoneAggregate {
            sensor_active: true,
            target_temp: target / count as f64,
            current_temp: current / count as f64,
        }
    }
}
