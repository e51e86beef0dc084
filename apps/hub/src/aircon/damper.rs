use serde::{Deserialize, Serialize};
use std::fmt;

// Share of airflow preferred for the day zone when both zones want air.
const DAY_WEIGHT: f64 = 0.6;
const NIGHT_WEIGHT: f64 = 0.4;

/// Damper setting in 10% steps; 100 sends all air to the day zone, 0 all to the night zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DamperPercent(u8);

impl DamperPercent {
    pub const ALL_DAY: DamperPercent = DamperPercent(100);
    pub const ALL_NIGHT: DamperPercent = DamperPercent(0);
    pub const BALANCED: DamperPercent = DamperPercent(60);

    /// Nearest 10%: >= 95 becomes 100, < 5 becomes 0.
    pub fn quantize(percent: f64) -> Self {
        if percent.is_nan() {
            return Self::BALANCED;
        }
        let steps = ((percent.clamp(0.0, 100.0) + 5.0) / 10.0).floor().min(10.0);
        DamperPercent(steps as u8 * 10)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DamperPercent {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 100 || value % 10 != 0 {
            return Err(format!("damper percent {} is not a 10% step", value));
        }
        Ok(DamperPercent(value))
    }
}

impl From<DamperPercent> for u8 {
    fn from(value: DamperPercent) -> u8 {
        value.0
    }
}

impl fmt::Display for DamperPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Remaining demand per zone. A gap is positive while the zone has not reached its
/// target yet (in the direction of the current mode); the far-edge gap additionally
/// includes the hysteresis allowance past the target.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZoneGaps {
    pub day: f64,
    pub night: f64,
    pub day_to_far_edge: f64,
    pub night_to_far_edge: f64,
}

fn weighted_day_share(day: f64, night: f64) -> f64 {
    let day = day * DAY_WEIGHT;
    let night = night * NIGHT_WEIGHT;
    if day + night <= 0.0 {
        return f64::from(DamperPercent::BALANCED.get());
    }
    100.0 * day / (day + night)
}

pub fn damper_setpoint(gaps: &ZoneGaps) -> DamperPercent {
    if gaps.day == 0.0 && gaps.night == 0.0 {
        return DamperPercent::BALANCED;
    }

    let day_crossed = gaps.day < 0.0;
    let night_crossed = gaps.night < 0.0;
    match (day_crossed, night_crossed) {
        (true, false) => DamperPercent::ALL_NIGHT,
        (false, true) => DamperPercent::ALL_DAY,
        (false, false) => DamperPercent::quantize(weighted_day_share(gaps.day, gaps.night)),
        (true, true) => {
            let day_exhausted = gaps.day_to_far_edge <= 0.0;
            let night_exhausted = gaps.night_to_far_edge <= 0.0;
            match (day_exhausted, night_exhausted) {
                (true, true) => DamperPercent::BALANCED,
                (true, false) => DamperPercent::ALL_NIGHT,
                (false, true) => DamperPercent::ALL_DAY,
                (false, false) => DamperPercent::quantize(weighted_day_share(
                    gaps.day_to_far_edge,
                    gaps.night_to_far_edge,
                )),
            }
        }
    }
}

/// Remembers the last commanded setting so that the damper is only driven on change.
#[derive(Debug, Default)]
pub struct DamperPositioner {
    current: Option<DamperPercent>,
}

impl DamperPositioner {
    pub fn new(current: Option<DamperPercent>) -> Self {
        DamperPositioner { current }
    }

    pub fn current(&self) -> Option<DamperPercent> {
        self.current
    }

    pub fn position(&mut self, gaps: &ZoneGaps) -> Option<DamperPercent> {
        self.command(damper_setpoint(gaps))
    }

    pub fn command(&mut self, percent: DamperPercent) -> Option<DamperPercent> {
        if self.current == Some(percent) {
            return None;
        }
        self.current = Some(percent);
        Some(percent)
    }
}
