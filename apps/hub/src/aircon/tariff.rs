use chrono::{DateTime, Datelike, Local, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aircon::AirconState;
use crate::error::{HubError, HubResult};

/// Tariff bucket; both hour bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBucket {
    pub start_hour: u32,
    pub name: String,
    /// Currency units per kWh.
    pub rate: f64,
    pub stop_hour: u32,
}

impl RateBucket {
    fn new(start_hour: u32, name: &str, rate: f64, stop_hour: u32) -> Self {
        RateBucket {
            start_hour,
            name: name.to_owned(),
            rate,
            stop_hour,
        }
    }

    fn covers(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour <= self.stop_hour
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerRateSchedule {
    pub weekday: Vec<RateBucket>,
    pub weekend: Vec<RateBucket>,
}

impl Default for PowerRateSchedule {
    fn default() -> Self {
        PowerRateSchedule {
            weekday: vec![
                RateBucket::new(0, "Off Peak", 0.1615, 6),
                RateBucket::new(7, "Shoulder", 0.2365, 13),
                RateBucket::new(14, "Peak", 0.4563, 19),
                RateBucket::new(20, "Shoulder", 0.2365, 21),
                RateBucket::new(22, "Off Peak", 0.1615, 23),
            ],
            weekend: vec![
                RateBucket::new(0, "Off Peak", 0.1615, 6),
                RateBucket::new(7, "Shoulder", 0.2365, 21),
                RateBucket::new(22, "Off Peak", 0.1615, 23),
            ],
        }
    }
}

impl PowerRateSchedule {
    /// Every hour of the day must land in a bucket of both tables.
    pub fn validate(&self) -> HubResult<()> {
        for (table, buckets) in [("weekday", &self.weekday), ("weekend", &self.weekend)] {
            if let Some(hour) = (0..24).find(|h| !buckets.iter().any(|b| b.covers(*h))) {
                return Err(HubError::config(format!("{} tariff has no bucket for hour {}", table, hour)));
            }
        }
        Ok(())
    }

    pub fn rate_for(&self, at: DateTime<Local>) -> HubResult<&RateBucket> {
        let (table, buckets) = match at.weekday() {
            Weekday::Sat | Weekday::Sun => ("weekend", &self.weekend),
            _ => ("weekday", &self.weekday),
        };
        let hour = at.hour();
        buckets
            .iter()
            .find(|b| b.covers(hour))
            .ok_or_else(|| HubError::config(format!("{} tariff has no bucket for hour {}", table, hour)))
    }
}

/// Electrical draw of the outdoor unit per run state, in kW.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerDraw {
    pub heat_kw: f64,
    pub cool_kw: f64,
    pub idle_kw: f64,
}

impl Default for PowerDraw {
    fn default() -> Self {
        PowerDraw {
            heat_kw: 4.6,
            cool_kw: 4.2,
            idle_kw: 0.3,
        }
    }
}

impl PowerDraw {
    fn kw(&self, state: AirconState) -> f64 {
        match state {
            AirconState::Off => 0.0,
            AirconState::Idle => self.idle_kw,
            AirconState::Heat => self.heat_kw,
            AirconState::Cool => self.cool_kw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AirconRunningCost {
    pub total_cost: f64,
    pub total_hours: f64,
}

/// One line of the append-only cost log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostRecord {
    pub at: DateTime<Local>,
    pub total_hours: f64,
    pub total_cost: f64,
    pub mode: AirconState,
    pub prior_mode: AirconState,
    pub prior_hours: f64,
    pub prior_cost: f64,
    pub tariff: String,
}

impl CostRecord {
    pub fn is_start(&self) -> bool {
        self.prior_mode == AirconState::Off
    }
}

impl fmt::Display for CostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total {:.3}h ${:.2} | {} -> {} ",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.total_hours,
            self.total_cost,
            self.prior_mode,
            self.mode
        )?;
        if self.is_start() {
            write!(f, "(start, {})", self.tariff)
        } else {
            write!(
                f,
                "after {:.3}h costing ${:.3} ({})",
                self.prior_hours, self.prior_cost, self.tariff
            )
        }
    }
}

/// Bills each run-state interval at the cost per hour in force when it began.
pub struct PowerCostModel {
    schedule: PowerRateSchedule,
    draw: PowerDraw,
    totals: AirconRunningCost,
    prior_mode: AirconState,
    prior_since: Option<DateTime<Local>>,
    prior_cost_per_hour: f64,
    prior_tariff: Option<String>,
}

impl PowerCostModel {
    pub fn new(schedule: PowerRateSchedule, draw: PowerDraw, totals: AirconRunningCost) -> Self {
        PowerCostModel {
            schedule,
            draw,
            totals,
            prior_mode: AirconState::Off,
            prior_since: None,
            prior_cost_per_hour: 0.0,
            prior_tariff: None,
        }
    }

    pub fn rate_for(&self, at: DateTime<Local>) -> HubResult<&RateBucket> {
        self.schedule.rate_for(at)
    }

    pub fn totals(&self) -> AirconRunningCost {
        self.totals
    }

    /// Name of the tariff the running interval is billed under.
    pub fn current_tariff(&self) -> Option<&str> {
        self.prior_tariff.as_deref()
    }

    /// Closes the running interval and opens a new one for `mode` billed at `rate`.
    pub fn on_transition(&mut self, mode: AirconState, rate: &RateBucket, now: DateTime<Local>) -> CostRecord {
        let (prior_hours, prior_cost) = match (self.prior_mode, self.prior_since) {
            (AirconState::Off, _) | (_, None) => (0.0, 0.0),
            (_, Some(since)) => {
                let hours = (now - since).num_milliseconds().max(0) as f64 / 3_600_000.0;
                (hours, hours * self.prior_cost_per_hour)
            }
        };
        self.totals.total_hours += prior_hours;
        self.totals.total_cost += prior_cost;

        let record = CostRecord {
            at: now,
            total_hours: self.totals.total_hours,
            total_cost: self.totals.total_cost,
            mode,
            prior_mode: self.prior_mode,
            prior_hours,
            prior_cost,
            tariff: rate.name.clone(),
        };

        self.prior_mode = mode;
        self.prior_since = Some(now);
        self.prior_cost_per_hour = rate.rate * self.draw.kw(mode);
        self.prior_tariff = Some(rate.name.clone());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Local> {
        // 2026-10-19 is a Monday.
        Local.with_ymd_and_hms(2026, 10, day, hour, min, 0).unwrap()
    }

    #[test]
    fn weekday_and_weekend_tables() -> HubResult<()> {
        let schedule = PowerRateSchedule::default();
        schedule.validate()?;
        assert_eq!(schedule.rate_for(at(19, 6, 59))?.name, "Off Peak");
        assert_eq!(schedule.rate_for(at(19, 7, 0))?.name, "Shoulder");
        assert_eq!(schedule.rate_for(at(19, 19, 30))?.name, "Peak");
        assert_eq!(schedule.rate_for(at(19, 23, 59))?.name, "Off Peak");
        // Saturday afternoon has no peak.
        assert_eq!(schedule.rate_for(at(24, 17, 0))?.name, "Shoulder");
        Ok(())
    }

    #[test]
    fn unreachable_hour_is_a_config_error() {
        let mut schedule = PowerRateSchedule::default();
        schedule.weekend.remove(1);
        assert!(matches!(schedule.validate(), Err(HubError::ConfigInconsistency { .. })));
        assert!(schedule.rate_for(at(25, 12, 0)).is_err());
    }

    #[test]
    fn bills_outgoing_interval_at_prior_rate() -> HubResult<()> {
        let schedule = PowerRateSchedule::default();
        let draw = PowerDraw { heat_kw: 4.0, cool_kw: 4.0, idle_kw: 0.0 };
        let mut model = PowerCostModel::new(schedule.clone(), draw, AirconRunningCost::default());

        let start = at(19, 12, 0);
        let shoulder = schedule.rate_for(start)?.clone();
        let first = model.on_transition(AirconState::Heat, &shoulder, start);
        assert!(first.is_start());
        assert_eq!(first.prior_cost, 0.0);

        // Two hours of heating into the peak bucket: billed at the shoulder rate.
        let later = start + Duration::hours(2);
        let peak = schedule.rate_for(later)?.clone();
        let second = model.on_transition(AirconState::Heat, &peak, later);
        assert!((second.prior_hours - 2.0).abs() < 1e-9);
        assert!((second.prior_cost - 2.0 * 4.0 * 0.2365).abs() < 1e-9);
        assert_eq!(model.current_tariff(), Some("Peak"));

        let off = model.on_transition(AirconState::Off, &peak, later + Duration::minutes(30));
        assert!((off.prior_cost - 0.5 * 4.0 * 0.4563).abs() < 1e-9);
        assert!((model.totals().total_hours - 2.5).abs() < 1e-9);
        assert_eq!(model.totals().total_cost, off.total_cost);
        Ok(())
    }

    #[test]
    fn restart_after_off_has_no_cost_delta() -> HubResult<()> {
        let schedule = PowerRateSchedule::default();
        let totals = AirconRunningCost { total_cost: 10.0, total_hours: 20.0 };
        let mut model = PowerCostModel::new(schedule.clone(), PowerDraw::default(), totals);
        let t = at(19, 8, 0);
        let rate = schedule.rate_for(t)?.clone();
        model.on_transition(AirconState::Off, &rate, t);
        let record = model.on_transition(AirconState::Cool, &rate, t + Duration::hours(5));
        assert!(record.is_start());
        assert_eq!(model.totals(), totals);
        Ok(())
    }
}
