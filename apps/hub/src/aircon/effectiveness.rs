use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use crate::aircon::damper::DamperPercent;
use crate::aircon::zones::Zone;
use crate::aircon::AirconState;

const WINDOW_SLOTS: usize = 10;
// A full window counts as a tenth of an hour whatever the actual slot spacing.
// Slots are at least `min_spacing` (10 s by default) apart, taken as readings arrive.
const WINDOWS_PER_HOUR: f64 = 6.0;

/// Observed heating and cooling rates in °C/hour. `max_*` only rises and `min_*`
/// only falls, so the recorded range never shrinks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectivenessRecord {
    pub max_heat: Option<f64>,
    pub min_heat: Option<f64>,
    pub max_cool: Option<f64>,
    pub min_cool: Option<f64>,
}

impl EffectivenessRecord {
    fn observe(&mut self, run: AirconState, rate: f64) -> bool {
        let (max, min) = match run {
            AirconState::Heat => (&mut self.max_heat, &mut self.min_heat),
            AirconState::Cool => (&mut self.max_cool, &mut self.min_cool),
            AirconState::Off | AirconState::Idle => return false,
        };
        let mut changed = false;
        if max.map_or(true, |m| rate > m) {
            *max = Some(rate);
            changed = true;
        }
        if min.map_or(true, |m| rate < m) {
            *min = Some(rate);
            changed = true;
        }
        changed
    }
}

/// Checkpointed bounds, restored at startup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectivenessCheckpoint {
    pub sensors: BTreeMap<String, EffectivenessRecord>,
    pub zones: BTreeMap<Zone, EffectivenessRecord>,
}

/// One line of the append-only effectiveness log, written when a bound moves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectivenessLine {
    pub at: DateTime<Local>,
    pub subject: String,
    pub run: AirconState,
    pub rate: f64,
    pub record: EffectivenessRecord,
}

fn bound(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_owned(), |v| format!("{:.2}", v))
}

impl fmt::Display for EffectivenessLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:.2}C/h | heat {}..{} cool {}..{}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.subject,
            self.run,
            self.rate,
            bound(self.record.min_heat),
            bound(self.record.max_heat),
            bound(self.record.min_cool),
            bound(self.record.max_cool),
        )
    }
}

/// What the aircon is doing to the air right now, as far as effectiveness goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Airflow {
    pub run: AirconState,
    /// Remote operation on and no malfunction reported.
    pub automatic: bool,
    pub damper: Option<DamperPercent>,
}

impl Airflow {
    fn reaches(&self, zone: Zone) -> bool {
        match (zone, self.damper) {
            (Zone::Day, Some(d)) => d != DamperPercent::ALL_NIGHT,
            (Zone::Night, Some(d)) => d != DamperPercent::ALL_DAY,
            _ => true,
        }
    }

    fn contributes(&self, zone: Zone) -> bool {
        matches!(self.run, AirconState::Heat | AirconState::Cool) && self.automatic && self.reaches(zone)
    }
}

#[derive(Debug, Default)]
struct SensorWindow {
    slots: VecDeque<f64>,
    last_sample: Option<DateTime<Local>>,
}

impl SensorWindow {
    /// Oldest minus newest, scaled to an hour. Zero unless every slot saw active airflow.
    fn rate(&self) -> f64 {
        if self.slots.len() < WINDOW_SLOTS || self.slots.iter().any(|t| *t == 0.0) {
            return 0.0;
        }
        match (self.slots.front(), self.slots.back()) {
            (Some(oldest), Some(newest)) => (oldest - newest) * WINDOWS_PER_HOUR,
            _ => 0.0,
        }
    }
}

pub struct EffectivenessTracker {
    min_spacing: Duration,
    windows: HashMap<String, SensorWindow>,
    checkpoint: EffectivenessCheckpoint,
}

impl EffectivenessTracker {
    pub fn new(min_spacing: Duration, checkpoint: EffectivenessCheckpoint) -> Self {
        EffectivenessTracker {
            min_spacing,
            windows: HashMap::new(),
            checkpoint,
        }
    }

    pub fn checkpoint(&self) -> &EffectivenessCheckpoint {
        &self.checkpoint
    }

    /// Pushes the sensor's active contribution. Returns false when the sensor was sampled
    /// less than `min_spacing` ago.
    pub fn sample(&mut self, sensor: &str, zone: Zone, temp: f64, airflow: &Airflow, now: DateTime<Local>) -> bool {
        let window = self.windows.entry(sensor.to_owned()).or_default();
        if window.last_sample.is_some_and(|last| now - last < self.min_spacing) {
            return false;
        }
        window.last_sample = Some(now);
        let contribution = if airflow.contributes(zone) { temp } else { 0.0 };
        if window.slots.len() == WINDOW_SLOTS {
            window.slots.pop_front();
        }
        window.slots.push_back(contribution);
        true
    }

    /// Raw window rate: positive while the temperature falls.
    pub fn sensor_rate(&self, sensor: &str) -> f64 {
        self.windows.get(sensor).map_or(0.0, SensorWindow::rate)
    }

    /// Mean of the members that currently have a rate.
    pub fn zone_rate<'a>(&self, members: impl IntoIterator<Item = &'a str>) -> f64 {
        let rates: Vec<f64> = members
            .into_iter()
            .map(|s| self.sensor_rate(s))
            .filter(|r| *r != 0.0)
            .collect();
        if rates.is_empty() {
            return 0.0;
        }
        rates.iter().sum::<f64>() / rates.len() as f64
    }

    /// Folds the current sensor and zone rates into the bounds. Heating rates are
    /// recorded as warming per hour, cooling rates as cooling per hour.
    pub fn update_bounds<'a>(
        &mut self,
        sensor: &str,
        zone: Zone,
        members: impl IntoIterator<Item = &'a str>,
        run: AirconState,
        now: DateTime<Local>,
    ) -> Vec<EffectivenessLine> {
        let oriented = |raw: f64| if run == AirconState::Heat { -raw } else { raw };
        let mut lines = Vec::new();

        let sensor_rate = self.sensor_rate(sensor);
        if sensor_rate != 0.0 {
            let record = self.checkpoint.sensors.entry(sensor.to_owned()).or_default();
            if record.observe(run, oriented(sensor_rate)) {
                lines.push(EffectivenessLine {
                    at: now,
                    subject: sensor.to_owned(),
                    run,
                    rate: oriented(sensor_rate),
                    record: *record,
                });
            }
        }

        let zone_rate = self.zone_rate(members);
        if zone_rate != 0.0 {
            let record = self.checkpoint.zones.entry(zone).or_default();
            if record.observe(run, oriented(zone_rate)) {
                lines.push(EffectivenessLine {
                    at: now,
                    subject: zone.to_string(),
                    run,
                    rate: oriented(zone_rate),
                    record: *record,
                });
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 7, 1, 15, 0, 0).unwrap()
    }

    fn cooling() -> Airflow {
        Airflow {
            run: AirconState::Cool,
            automatic: true,
            damper: Some(DamperPercent::BALANCED),
        }
    }

    #[test]
    fn samples_are_spaced() {
        let mut tracker = EffectivenessTracker::new(Duration::seconds(10), EffectivenessCheckpoint::default());
        assert!(tracker.sample("Living", Zone::Day, 26.0, &cooling(), start()));
        assert!(!tracker.sample("Living", Zone::Day, 26.0, &cooling(), start() + Duration::seconds(5)));
        assert!(tracker.sample("Living", Zone::Day, 26.0, &cooling(), start() + Duration::seconds(10)));
    }

    #[test]
    fn full_active_window_gives_hourly_rate() {
        let mut tracker = EffectivenessTracker::new(Duration::seconds(10), EffectivenessCheckpoint::default());
        for i in 0..10 {
            let now = start() + Duration::minutes(i);
            tracker.sample("Living", Zone::Day, 26.0 - 0.1 * i as f64, &cooling(), now);
        }
        // 0.9 degrees over the window, six windows per hour.
        assert!((tracker.sensor_rate("Living") - 5.4).abs() < 1e-9);
        assert!((tracker.zone_rate(["Living", "Kitchen"]) - 5.4).abs() < 1e-9);

        let lines = tracker.update_bounds("Living", Zone::Day, ["Living"], AirconState::Cool, start());
        assert_eq!(lines.len(), 2);
        let record = tracker.checkpoint().zones[&Zone::Day];
        assert_eq!(record.max_cool, record.min_cool);
        assert!(record.max_heat.is_none());

        // Unchanged rate leaves the bounds alone.
        assert!(tracker
            .update_bounds("Living", Zone::Day, ["Living"], AirconState::Cool, start())
            .is_empty());
    }

    #[test]
    fn window_scale_is_fixed_for_close_samples() {
        let mut tracker = EffectivenessTracker::new(Duration::seconds(10), EffectivenessCheckpoint::default());
        for i in 0..10 {
            let now = start() + Duration::seconds(10 * i);
            tracker.sample("Living", Zone::Day, 26.0 - 0.1 * i as f64, &cooling(), now);
        }
        assert!((tracker.sensor_rate("Living") - 5.4).abs() < 1e-9);
    }

    #[test]
    fn recorded_range_never_shrinks() {
        let mut record = EffectivenessRecord::default();
        for rate in [2.0, 4.0, 1.0, 3.0, 2.5] {
            record.observe(AirconState::Cool, rate);
        }
        assert_eq!((record.min_cool, record.max_cool), (Some(1.0), Some(4.0)));
    }

    #[test]
    fn disconnected_zone_contributes_nothing() {
        let mut tracker = EffectivenessTracker::new(Duration::seconds(10), EffectivenessCheckpoint::default());
        let all_day = Airflow {
            damper: Some(DamperPercent::ALL_DAY),
            ..cooling()
        };
        for i in 0..10 {
            let now = start() + Duration::minutes(i);
            tracker.sample("Bedroom", Zone::Night, 24.0 - 0.1 * i as f64, &all_day, now);
            tracker.sample("Living", Zone::Day, 24.0 - 0.1 * i as f64, &all_day, now);
        }
        assert_eq!(tracker.sensor_rate("Bedroom"), 0.0);
        assert!(tracker.sensor_rate("Living") > 0.0);
        assert_eq!(tracker.zone_rate(["Bedroom"]), 0.0);
    }

    #[test]
    fn heating_rates_are_recorded_as_warming() {
        let mut record = EffectivenessRecord::default();
        assert!(record.observe(AirconState::Heat, 3.0));
        assert!(record.observe(AirconState::Heat, 1.5));
        assert!(!record.observe(AirconState::Heat, 2.0));
        assert_eq!((record.min_heat, record.max_heat), (Some(1.5), Some(3.0)));
        assert!(!record.observe(AirconState::Idle, 9.0));
    }
}
