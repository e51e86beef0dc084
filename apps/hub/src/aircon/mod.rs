pub mod damper;
pub mod effectiveness;
pub mod tariff;
pub mod zones;

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::error::{HubError, HubResult};
use crate::events::Outbound;
use damper::{DamperPercent, DamperPositioner, ZoneGaps};
use effectiveness::{Airflow, EffectivenessCheckpoint, EffectivenessTracker};
use tariff::{AirconRunningCost, PowerCostModel, PowerDraw, PowerRateSchedule};
pub use zones::{Mode, Thermostat, Zone, ZoneAggregate, ZoneAggregator};

/// What the outdoor unit is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AirconState {
    #[default]
    Off,
    Idle,
    Heat,
    Cool,
}

impl fmt::Display for AirconState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AirconState::Off => "Off",
            AirconState::Idle => "Idle",
            AirconState::Heat => "Heat",
            AirconState::Cool => "Cool",
        })
    }
}

/// Status flags reported by the aircon controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HardwareStatus {
    pub remote_operation: bool,
    pub heat: bool,
    pub cool: bool,
    pub fan: bool,
    pub fan_hi: bool,
    pub fan_lo: bool,
    pub heating: bool,
    pub compressor: bool,
    pub malfunction: bool,
    pub damper_percent: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermostatUpdate {
    CurrentTemp(f64),
    TargetTemp(f64),
    Mode(Mode),
}

pub struct AirconSettings {
    pub hysteresis: f64,
    pub stale_after: Duration,
    pub sample_spacing: Duration,
    pub schedule: PowerRateSchedule,
    pub draw: PowerDraw,
}

/// State persisted across restarts.
#[derive(Debug, Clone, Default)]
pub struct AirconRestore {
    pub mode: Mode,
    pub damper: Option<DamperPercent>,
    pub running_cost: AirconRunningCost,
    pub effectiveness: EffectivenessCheckpoint,
}

pub struct AirconModeController {
    thermostats: Vec<Thermostat>,
    zones: ZoneAggregator,
    hysteresis: f64,
    mode: Mode,
    state: AirconState,
    hardware: HardwareStatus,
    damper: DamperPositioner,
    single_zone: Option<Zone>,
    cost: PowerCostModel,
    effectiveness: EffectivenessTracker,
    no_zone_reported: bool,
}

impl AirconModeController {
    pub fn new(settings: AirconSettings, thermostats: Vec<Thermostat>, restore: AirconRestore) -> Self {
        AirconModeController {
            thermostats,
            zones: ZoneAggregator::new(settings.stale_after),
            hysteresis: settings.hysteresis,
            mode: restore.mode,
            state: AirconState::Off,
            hardware: HardwareStatus::default(),
            damper: DamperPositioner::new(restore.damper),
            single_zone: None,
            cost: PowerCostModel::new(settings.schedule, settings.draw, restore.running_cost),
            effectiveness: EffectivenessTracker::new(settings.sample_spacing, restore.effectiveness),
            no_zone_reported: false,
        }
    }

    pub fn thermostats(&self) -> &[Thermostat] {
        &self.thermostats
    }

    pub fn has_thermostat(&self, name: &str) -> bool {
        self.thermostats.iter().any(|t| t.name == name)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> AirconState {
        self.state
    }

    pub fn damper(&self) -> Option<DamperPercent> {
        self.damper.current()
    }

    pub fn running_cost(&self) -> AirconRunningCost {
        self.cost.totals()
    }

    pub fn effectiveness(&self) -> &EffectivenessCheckpoint {
        self.effectiveness.checkpoint()
    }

    pub fn zone(&self, zone: Zone, now: DateTime<Local>) -> ZoneAggregate {
        self.zones.aggregate(&self.thermostats, zone, now)
    }

    fn airflow(&self) -> Airflow {
        Airflow {
            run: self.state,
            automatic: self.hardware.remote_operation && !self.hardware.malfunction,
            damper: self.damper.current(),
        }
    }

    pub fn on_hardware_status(&mut self, status: HardwareStatus) -> Vec<Outbound> {
        if status.remote_operation != self.hardware.remote_operation {
            info!(remote_operation = status.remote_operation, "aircon remote operation changed");
        }
        if status.malfunction && !self.hardware.malfunction {
            warn!("aircon reports a malfunction");
        }
        self.hardware = status;
        vec![Outbound::Hardware(status)]
    }

    pub fn on_thermostat_update(
        &mut self,
        name: &str,
        update: ThermostatUpdate,
        now: DateTime<Local>,
    ) -> HubResult<Vec<Outbound>> {
        let idx = self
            .thermostats
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| HubError::UnknownEntity {
                kind: "thermostat",
                name: name.to_owned(),
            })?;

        let mut outs = Vec::new();
        match update {
            ThermostatUpdate::CurrentTemp(temp) => {
                let airflow = self.airflow();
                self.thermostats[idx].record_reading(temp, now);
                let zone = self.thermostats[idx].zone;
                let sampled = self.effectiveness.sample(name, zone, temp, &airflow, now);
                if sampled && matches!(self.state, AirconState::Heat | AirconState::Cool) {
                    let members: Vec<&str> = self
                        .thermostats
                        .iter()
                        .filter(|t| t.zone == zone)
                        .map(|t| t.name.as_str())
                        .collect();
                    let lines = self.effectiveness.update_bounds(name, zone, members, self.state, now);
                    outs.extend(lines.into_iter().map(Outbound::Effectiveness));
                }
            }
            ThermostatUpdate::TargetTemp(target) => self.thermostats[idx].target_temp = target,
            ThermostatUpdate::Mode(mode) => {
                // A switched-on thermostat follows the master mode while the aircon runs.
                let mode = if mode != Mode::Off && self.mode != Mode::Off { self.mode } else { mode };
                self.thermostats[idx].set_mode(mode);
            }
        }
        outs.push(Outbound::Thermostat(self.thermostats[idx].clone()));
        outs.extend(self.refresh_active(now));
        Ok(outs)
    }

    /// Heat and Cool are refused while no day or night sensor is active.
    pub fn set_mode(&mut self, mode: Mode, now: DateTime<Local>) -> HubResult<Vec<Outbound>> {
        if mode == self.mode {
            return Ok(Vec::new());
        }
        if mode != Mode::Off
            && !self.zone(Zone::Day, now).sensor_active
            && !self.zone(Zone::Night, now).sensor_active
        {
            return Err(HubError::NoActiveZone { mode });
        }

        info!(from = %self.mode, to = %mode, "aircon mode");
        self.mode = mode;
        let mut outs = vec![Outbound::AirconMode(mode)];
        if mode == Mode::Off {
            outs.extend(self.transition(AirconState::Off, now)?);
            outs.extend(self.refresh_active(now));
            return Ok(outs);
        }

        for t in self.thermostats.iter_mut().filter(|t| t.mode != Mode::Off && t.mode != mode) {
            t.set_mode(mode);
            outs.push(Outbound::Thermostat(t.clone()));
        }
        outs.extend(self.tick(now)?);
        Ok(outs)
    }

    pub fn tick(&mut self, now: DateTime<Local>) -> HubResult<Vec<Outbound>> {
        if !self.hardware.remote_operation {
            return Ok(Vec::new());
        }

        let mut outs = self.refresh_active(now);
        if self.state != AirconState::Off {
            let rate = self.cost.rate_for(now)?.clone();
            if self.cost.current_tariff() != Some(rate.name.as_str()) {
                info!(tariff = %rate.name, "tariff change");
                outs.push(Outbound::Cost(self.cost.on_transition(self.state, &rate, now)));
                outs.push(Outbound::RunningCost(self.cost.totals()));
            }
        }

        if self.mode == Mode::Off {
            outs.extend(self.transition(AirconState::Off, now)?);
            return Ok(outs);
        }

        let day = self.zone(Zone::Day, now);
        let night = self.zone(Zone::Night, now);
        let (next, damper) = match (day.sensor_active, night.sensor_active) {
            (false, false) => {
                if !self.no_zone_reported {
                    warn!(mode = %self.mode, "no active zone sensor, holding aircon idle");
                    self.no_zone_reported = true;
                }
                self.single_zone = None;
                (AirconState::Idle, None)
            }
            (true, false) => (self.single_zone_demand(&day), self.single_zone_damper(Zone::Day)),
            (false, true) => (self.single_zone_demand(&night), self.single_zone_damper(Zone::Night)),
            (true, true) => {
                self.single_zone = None;
                let gaps = self.gaps(&day, &night);
                (self.dual_zone_demand(&day, &night), self.damper.position(&gaps))
            }
        };
        if day.sensor_active || night.sensor_active {
            self.no_zone_reported = false;
        }
        outs.extend(self.transition(next, now)?);
        if let Some(percent) = damper {
            outs.extend(self.damper_outbound(percent));
        }
        Ok(outs)
    }

    fn single_zone_demand(&self, zone: &ZoneAggregate) -> AirconState {
        let h = self.hysteresis;
        match (self.mode, self.state) {
            (Mode::Heat, AirconState::Heat) if zone.current_temp > zone.target_temp + h => AirconState::Idle,
            (Mode::Heat, AirconState::Heat) => AirconState::Heat,
            (Mode::Heat, _) if zone.current_temp < zone.target_temp => AirconState::Heat,
            (Mode::Cool, AirconState::Cool) if zone.current_temp < zone.target_temp - h => AirconState::Idle,
            (Mode::Cool, AirconState::Cool) => AirconState::Cool,
            (Mode::Cool, _) if zone.current_temp > zone.target_temp => AirconState::Cool,
            (Mode::Off, _) => AirconState::Off,
            _ => AirconState::Idle,
        }
    }

    /// Either zone keeps the unit running; it idles only once both are past the far edge.
    fn dual_zone_demand(&self, day: &ZoneAggregate, night: &ZoneAggregate) -> AirconState {
        let h = self.hysteresis;
        match (self.mode, self.state) {
            (Mode::Heat, AirconState::Heat) => {
                if day.current_temp > day.target_temp + h && night.current_temp > night.target_temp + h {
                    AirconState::Idle
                } else {
                    AirconState::Heat
                }
            }
            (Mode::Heat, _) => {
                if day.current_temp < day.target_temp || night.current_temp < night.target_temp {
                    AirconState::Heat
                } else {
                    AirconState::Idle
                }
            }
            (Mode::Cool, AirconState::Cool) => {
                if day.current_temp < day.target_temp - h && night.current_temp < night.target_temp - h {
                    AirconState::Idle
                } else {
                    AirconState::Cool
                }
            }
            (Mode::Cool, _) => {
                if day.current_temp > day.target_temp || night.current_temp > night.target_temp {
                    AirconState::Cool
                } else {
                    AirconState::Idle
                }
            }
            (Mode::Off, _) => AirconState::Off,
        }
    }

    fn gaps(&self, day: &ZoneAggregate, night: &ZoneAggregate) -> ZoneGaps {
        let sign = if self.mode == Mode::Cool { -1.0 } else { 1.0 };
        let day_gap = sign * (day.target_temp - day.current_temp);
        let night_gap = sign * (night.target_temp - night.current_temp);
        ZoneGaps {
            day: day_gap,
            night: night_gap,
            day_to_far_edge: day_gap + self.hysteresis,
            night_to_far_edge: night_gap + self.hysteresis,
        }
    }

    /// Single zone airflow goes entirely to that zone, commanded when the zone changes.
    fn single_zone_damper(&mut self, zone: Zone) -> Option<DamperPercent> {
        if self.single_zone == Some(zone) {
            return None;
        }
        self.single_zone = Some(zone);
        self.damper.command(match zone {
            Zone::Night => DamperPercent::ALL_NIGHT,
            _ => DamperPercent::ALL_DAY,
        })
    }

    fn damper_outbound(&self, percent: DamperPercent) -> Vec<Outbound> {
        info!(damper = %percent, "damper");
        vec![
            Outbound::Damper(percent),
            Outbound::AirconCommand {
                run: self.state,
                damper: Some(percent),
            },
        ]
    }

    /// Bills the outgoing state before the new one takes effect.
    fn transition(&mut self, next: AirconState, now: DateTime<Local>) -> HubResult<Vec<Outbound>> {
        if next == self.state {
            return Ok(Vec::new());
        }
        let rate = self.cost.rate_for(now)?.clone();
        let record = self.cost.on_transition(next, &rate, now);
        info!(from = %self.state, to = %next, tariff = %rate.name, "aircon run state");
        self.state = next;
        if next == AirconState::Off {
            self.single_zone = None;
        }
        Ok(vec![
            Outbound::Cost(record),
            Outbound::RunningCost(self.cost.totals()),
            Outbound::AirconState(next),
            Outbound::AirconCommand {
                run: next,
                damper: None,
            },
        ])
    }

    /// A thermostat is active while the aircon runs and its fresh reading feeds a controlled zone.
    fn refresh_active(&mut self, now: DateTime<Local>) -> Vec<Outbound> {
        let running = self.mode != Mode::Off;
        let stale_after = self.zones.stale_after();
        let mut outs = Vec::new();
        for t in self.thermostats.iter_mut() {
            let live = t.is_live(now, stale_after);
            if t.active && !live && t.is_stale(now, stale_after) {
                warn!(thermostat = %t.name, "reading is stale, dropping out of {}", t.zone);
            }
            if t.set_active(running && t.zone != Zone::Indoor && live) {
                outs.push(Outbound::Thermostat(t.clone()));
            }
        }
        outs
    }
}
