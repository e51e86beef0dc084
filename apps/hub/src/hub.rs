use anyhow::Result;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

use crate::aircon::{AirconModeController, AirconRestore, Thermostat, ThermostatUpdate, Zone};
use crate::blinds::actuator::{BlindActuator, BlindLink, DoorProbe};
use crate::blinds::{manual, BlindSunlightController, Plan};
use crate::clock::Clock;
use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::events::{Event, Outbound, ThermostatControl};
use crate::publish::Publisher;
use crate::snapshot::{BlindSnapshot, Snapshot, SnapshotStore, ThermostatSnapshot, SNAPSHOT_VERSION};

/// Owns all domain state. Only the control loop touches it.
pub struct Hub {
    clock: Arc<dyn Clock>,
    aircon: AirconModeController,
    blinds: Vec<BlindSunlightController>,
    doors: BTreeMap<String, bool>,
    actuator: BlindActuator,
    publisher: Box<dyn Publisher>,
    store: Option<SnapshotStore>,
}

impl Hub {
    pub fn new(
        config: &HubConfig,
        snapshot: Snapshot,
        clock: Arc<dyn Clock>,
        link: Box<dyn BlindLink>,
        publisher: Box<dyn Publisher>,
        store: Option<SnapshotStore>,
    ) -> Result<Self> {
        let thermostats = config
            .aircon
            .thermostats
            .iter()
            .map(|t| {
                let mut thermostat = Thermostat::new(&t.name, t.zone, t.target);
                if let Some(saved) = snapshot.thermostats.get(&t.name) {
                    thermostat.target_temp = saved.target_temp;
                    thermostat.set_mode(saved.mode);
                }
                thermostat
            })
            .collect();
        let aircon = AirconModeController::new(
            config.aircon.settings(&config.tariff),
            thermostats,
            AirconRestore {
                mode: snapshot.aircon_mode,
                damper: snapshot.damper,
                running_cost: snapshot.running_cost,
                effectiveness: snapshot.effectiveness.clone(),
            },
        );

        let blinds = config
            .blind_configs()?
            .into_iter()
            .map(|blind| {
                let saved = snapshot.blinds.get(&blind.name).cloned().unwrap_or_default();
                BlindSunlightController::new(blind, saved.state, &saved.positions, &snapshot.doors)
            })
            .collect();

        Ok(Hub {
            actuator: BlindActuator::new(link, clock.clone()),
            clock,
            aircon,
            blinds,
            doors: snapshot.doors,
            publisher,
            store,
        })
    }

    pub fn aircon(&self) -> &AirconModeController {
        &self.aircon
    }

    pub fn blind(&self, name: &str) -> Option<&BlindSunlightController> {
        self.blinds.iter().find(|b| b.name() == name)
    }

    fn publish_all(&mut self, items: Vec<Outbound>) {
        for item in &items {
            self.publisher.publish(item);
        }
    }

    /// Fills the status board with the restored state.
    pub fn announce(&mut self) {
        let mut items: Vec<Outbound> = self.aircon.thermostats().iter().cloned().map(Outbound::Thermostat).collect();
        items.push(Outbound::AirconMode(self.aircon.mode()));
        items.push(Outbound::AirconState(self.aircon.state()));
        if let Some(damper) = self.aircon.damper() {
            items.push(Outbound::Damper(damper));
        }
        items.push(Outbound::RunningCost(self.aircon.running_cost()));
        let effectiveness = self.aircon.effectiveness();
        let sensors = effectiveness.sensors.iter().map(|(s, r)| (s.clone(), *r));
        let zones = effectiveness.zones.iter().map(|(z, r)| (z.to_string(), *r));
        for (subject, record) in sensors.chain(zones) {
            items.push(Outbound::EffectivenessBounds { subject, record });
        }
        for (name, open) in &self.doors {
            items.push(Outbound::Door {
                name: name.clone(),
                open: *open,
                battery_low: false,
            });
        }
        for blind in &self.blinds {
            for (segment, position) in blind.positions() {
                items.push(Outbound::Segment {
                    blind: blind.name().to_owned(),
                    segment: segment.clone(),
                    position: *position,
                });
            }
            items.push(Outbound::BlindState {
                blind: blind.name().to_owned(),
                state: blind.state(),
            });
        }
        self.publish_all(items);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            doors: self.doors.clone(),
            blinds: self
                .blinds
                .iter()
                .map(|b| {
                    let saved = BlindSnapshot {
                        state: b.state(),
                        positions: b.positions().clone(),
                    };
                    (b.name().to_owned(), saved)
                })
                .collect(),
            thermostats: self
                .aircon
                .thermostats()
                .iter()
                .map(|t| {
                    let saved = ThermostatSnapshot {
                        mode: t.mode,
                        target_temp: t.target_temp,
                    };
                    (t.name.clone(), saved)
                })
                .collect(),
            aircon_mode: self.aircon.mode(),
            damper: self.aircon.damper(),
            running_cost: self.aircon.running_cost(),
            effectiveness: self.aircon.effectiveness().clone(),
        }
    }

    pub fn save_snapshot(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.snapshot()) {
                warn!("{:#}", e);
            }
        }
    }

    /// Handles one event. Returns false once the loop should stop.
    pub fn handle(&mut self, event: Event, probe: &mut dyn DoorProbe) -> bool {
        let now = self.clock.now();
        match event {
            Event::Climate { name, temp, humidity } => {
                self.publisher.publish(&Outbound::Reading {
                    name: name.clone(),
                    temp,
                    humidity,
                });
                if self.aircon.has_thermostat(&name) {
                    let result = self.aircon.on_thermostat_update(&name, ThermostatUpdate::CurrentTemp(temp), now);
                    self.aircon_result(result);
                }
                for i in self.blinds_where(|b| b.config().temp_sensor == name) {
                    let plan = self.blinds[i].on_outdoor_temp(temp);
                    self.run_plan(i, plan, probe);
                }
            }
            Event::Light { name, lux } => {
                let matching = self.blinds_where(|b| b.config().light_sensor == name);
                if matching.is_empty() {
                    debug!(sensor = %name, lux, "light reading for no blind");
                }
                for i in matching {
                    let plan = self.blinds[i].on_light(lux);
                    self.run_plan(i, plan, probe);
                }
            }
            Event::Door {
                name,
                open,
                battery_low,
            } => {
                if battery_low {
                    warn!(door = %name, "door sensor battery low");
                }
                self.doors.insert(name.clone(), open);
                self.publisher.publish(&Outbound::Door {
                    name: name.clone(),
                    open,
                    battery_low,
                });
                for i in self.blinds_where(|b| b.doors().watches(&name)) {
                    match self.blinds[i].on_door(&name, open) {
                        Ok(plan) => self.run_plan(i, plan, probe),
                        Err(e) => warn!("{}", e),
                    }
                }
            }
            Event::Thermostat { name, control } => {
                let update = match control {
                    ThermostatControl::Mode(mode) => ThermostatUpdate::Mode(mode),
                    ThermostatControl::Target(target) => ThermostatUpdate::TargetTemp(target),
                };
                let result = self.aircon.on_thermostat_update(&name, update, now);
                self.aircon_result(result);
            }
            Event::AirconMode(mode) => {
                let result = self.aircon.set_mode(mode, now);
                if let Err(HubError::NoActiveZone { .. }) = &result {
                    // Show the mode that is actually in force.
                    self.publisher.publish(&Outbound::AirconMode(self.aircon.mode()));
                }
                self.aircon_result(result);
            }
            Event::BlindPosition {
                blind,
                segment,
                position,
            } => match self.blind_index(&blind) {
                Ok(i) => match manual::apply(&mut self.blinds[i], &segment, position) {
                    Ok(plan) => self.run_plan(i, plan, probe),
                    Err(HubError::SafetyOverride(report)) => {
                        let current = self.blinds[i].position(&segment).unwrap_or_default();
                        self.publisher.publish(&Outbound::SafetyOverride(report));
                        self.publisher.publish(&Outbound::Segment {
                            blind,
                            segment,
                            position: current,
                        });
                    }
                    Err(e) => warn!("{}", e),
                },
                Err(e) => warn!("{}", e),
            },
            Event::BlindOverride { blind, enabled } => match self.blind_index(&blind) {
                Ok(i) => {
                    let plan = self.blinds[i].set_auto_override(enabled);
                    self.run_plan(i, plan, probe);
                }
                Err(e) => warn!("{}", e),
            },
            Event::Hardware(status) => {
                let items = self.aircon.on_hardware_status(status);
                self.publish_all(items);
            }
            Event::Tick => {
                let result = self.aircon.tick(now);
                self.aircon_result(result);
            }
            Event::Shutdown => {
                info!("shutting down control loop");
                return false;
            }
        }
        true
    }

    fn blinds_where(&self, pred: impl Fn(&BlindSunlightController) -> bool) -> Vec<usize> {
        (0..self.blinds.len()).filter(|i| pred(&self.blinds[*i])).collect()
    }

    fn blind_index(&self, name: &str) -> HubResult<usize> {
        self.blinds
            .iter()
            .position(|b| b.name() == name)
            .ok_or_else(|| HubError::UnknownEntity {
                kind: "blind",
                name: name.to_owned(),
            })
    }

    /// Publishes the outcome of an aircon operation. Saves the snapshot after a cost transition.
    fn aircon_result(&mut self, result: HubResult<Vec<Outbound>>) {
        match result {
            Ok(items) => {
                let billed = items.iter().any(|o| matches!(o, Outbound::Cost(_)));
                self.publish_all(items);
                let now = self.clock.now();
                for zone in [Zone::Day, Zone::Night, Zone::Indoor] {
                    let aggregate = self.aircon.zone(zone, now);
                    self.publisher.publish(&Outbound::Zone { zone, aggregate });
                }
                if billed {
                    self.save_snapshot();
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// Reports the plan, drives the motors and records what they achieved.
    fn run_plan(&mut self, i: usize, plan: Plan, probe: &mut dyn DoorProbe) {
        let before = self.blinds[i].state();
        let blind = &mut self.blinds[i];
        let name = blind.name().to_owned();

        for report in plan.overrides {
            self.publisher.publish(&Outbound::SafetyOverride(report));
        }
        for (segment, position) in plan.displayed {
            self.publisher.publish(&Outbound::Segment {
                blind: name.clone(),
                segment,
                position,
            });
        }
        if !plan.moves.is_empty() {
            let execution = self.actuator.execute(blind.config(), &plan.moves, probe);
            for report in &execution.overrides {
                self.publisher.publish(&Outbound::SafetyOverride(report.clone()));
            }
            for (segment, position) in blind.commit(&execution) {
                self.publisher.publish(&Outbound::Segment {
                    blind: name.clone(),
                    segment,
                    position,
                });
            }
        }
        let state = blind.state();
        if state != before || !plan.moves.is_empty() {
            self.publisher.publish(&Outbound::BlindState { blind: name, state });
        }
    }
}

/// Door reports queued behind a running close sequence. Everything drained here is
/// kept in arrival order for the loop to handle afterwards.
pub struct QueuedDoorProbe<'a> {
    rx: &'a mut Receiver<Event>,
    backlog: &'a mut VecDeque<Event>,
}

impl DoorProbe for QueuedDoorProbe<'_> {
    fn door_report(&mut self, door: &str) -> Option<bool> {
        while let Ok(event) = self.rx.try_recv() {
            self.backlog.push_back(event);
        }
        self.backlog.iter().rev().find_map(|event| match event {
            Event::Door { name, open, .. } if name == door => Some(*open),
            _ => None,
        })
    }
}

/// Drains events one at a time until `Shutdown` or until every sender is gone,
/// then writes the snapshot.
pub fn run_control_loop(hub: &mut Hub, mut rx: Receiver<Event>) {
    let mut backlog = VecDeque::new();
    loop {
        let event = match backlog.pop_front() {
            Some(event) => event,
            None => match rx.blocking_recv() {
                Some(event) => event,
                None => break,
            },
        };
        let mut probe = QueuedDoorProbe {
            rx: &mut rx,
            backlog: &mut backlog,
        };
        if !hub.handle(event, &mut probe) {
            break;
        }
    }
    hub.save_snapshot();
}
