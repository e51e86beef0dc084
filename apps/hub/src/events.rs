use anyhow::{anyhow, Result};
use hub_protocol::listener::MessageHandler;
use hub_protocol::protos::generated::hub::{
    AirconStatus, BlindCommand, BlindPosition, ClimateReport, DoorReport, HubMessage, LightReport, ThermostatCommand,
    ThermostatMode,
};
use std::net::SocketAddr;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use crate::aircon::damper::DamperPercent;
use crate::aircon::effectiveness::{EffectivenessLine, EffectivenessRecord};
use crate::aircon::tariff::{AirconRunningCost, CostRecord};
use crate::aircon::{AirconState, HardwareStatus, Mode, Thermostat, Zone, ZoneAggregate};
use crate::blinds::{BlindRuntimeState, Position, SafetyOverride};
use crate::error::{HubError, HubResult};

const TEMP_RANGE: std::ops::RangeInclusive<f64> = -40.0..=60.0;
const HUMIDITY_RANGE: std::ops::RangeInclusive<f64> = 0.0..=100.0;
const TARGET_RANGE: std::ops::RangeInclusive<f64> = 5.0..=35.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermostatControl {
    Mode(Mode),
    Target(f64),
}

/// Everything the control loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Climate { name: String, temp: f64, humidity: f64 },
    Light { name: String, lux: u32 },
    Door { name: String, open: bool, battery_low: bool },
    Thermostat { name: String, control: ThermostatControl },
    AirconMode(Mode),
    BlindPosition { blind: String, segment: String, position: Position },
    BlindOverride { blind: String, enabled: bool },
    Hardware(HardwareStatus),
    Tick,
    Shutdown,
}

/// State changes and payloads produced by the core for the publisher.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Reading { name: String, temp: f64, humidity: f64 },
    Door { name: String, open: bool, battery_low: bool },
    Thermostat(Thermostat),
    Zone { zone: Zone, aggregate: ZoneAggregate },
    Hardware(HardwareStatus),
    AirconMode(Mode),
    AirconState(AirconState),
    Damper(DamperPercent),
    AirconCommand { run: AirconState, damper: Option<DamperPercent> },
    RunningCost(AirconRunningCost),
    Cost(CostRecord),
    Effectiveness(EffectivenessLine),
    /// Restored bounds, announced at startup without a log line.
    EffectivenessBounds { subject: String, record: EffectivenessRecord },
    Segment { blind: String, segment: String, position: Position },
    BlindState { blind: String, state: BlindRuntimeState },
    SafetyOverride(SafetyOverride),
}

fn mode_from(mode: ThermostatMode) -> Mode {
    match mode {
        ThermostatMode::MODE_OFF => Mode::Off,
        ThermostatMode::MODE_HEAT => Mode::Heat,
        ThermostatMode::MODE_COOL => Mode::Cool,
    }
}

fn position_from(position: BlindPosition) -> Position {
    match position {
        BlindPosition::POS_OPEN => Position::Open,
        BlindPosition::POS_VENETIAN => Position::Venetian,
        BlindPosition::POS_CLOSED => Position::Closed,
    }
}

fn required_name<'a>(name: &'a str, what: &str) -> HubResult<&'a str> {
    if name.is_empty() {
        return Err(HubError::invalid(what, "missing name"));
    }
    Ok(name)
}

/// A reading of exactly 0.0°C at 0% is what the sensors send before their first measurement.
pub fn validate_climate(name: &str, temp: f64, humidity: f64) -> HubResult<()> {
    if temp == 0.0 && humidity == 0.0 {
        return Err(HubError::invalid(name, "startup sentinel"));
    }
    if !TEMP_RANGE.contains(&temp) {
        return Err(HubError::invalid(name, format!("temperature {:.1} out of range", temp)));
    }
    if !HUMIDITY_RANGE.contains(&humidity) {
        return Err(HubError::invalid(name, format!("humidity {:.1} out of range", humidity)));
    }
    Ok(())
}

pub fn validate_target(name: &str, target: f64) -> HubResult<()> {
    if !TARGET_RANGE.contains(&target) {
        return Err(HubError::invalid(name, format!("target {:.1} out of range", target)));
    }
    Ok(())
}

/// Events from one wire message plus the sections that failed validation.
/// Each section stands alone: a bad climate report does not drop a door report
/// carried in the same datagram.
#[derive(Debug, Default)]
pub struct Decoded {
    pub events: Vec<Event>,
    pub rejected: Vec<HubError>,
}

impl Decoded {
    fn section(&mut self, result: HubResult<Vec<Event>>) {
        match result {
            Ok(events) => self.events.extend(events),
            Err(e) => self.rejected.push(e),
        }
    }
}

fn climate_events(climate: &ClimateReport) -> HubResult<Vec<Event>> {
    let name = required_name(climate.name(), "climate report")?;
    let temp = f64::from(climate.temperature_deci()) / 10.0;
    let humidity = f64::from(climate.humidity_deci()) / 10.0;
    validate_climate(name, temp, humidity)?;
    Ok(vec![Event::Climate {
        name: name.to_owned(),
        temp,
        humidity,
    }])
}

fn light_events(light: &LightReport) -> HubResult<Vec<Event>> {
    let name = required_name(light.name(), "light report")?;
    if !light.has_lux() {
        return Err(HubError::invalid(name, "missing lux"));
    }
    Ok(vec![Event::Light {
        name: name.to_owned(),
        lux: light.lux(),
    }])
}

fn door_events(door: &DoorReport) -> HubResult<Vec<Event>> {
    let name = required_name(door.name(), "door report")?;
    if !door.has_open() {
        return Err(HubError::invalid(name, "missing door state"));
    }
    Ok(vec![Event::Door {
        name: name.to_owned(),
        open: door.open(),
        battery_low: door.battery_low(),
    }])
}

/// A target outside the allowed range rejects the whole command, mode included.
fn thermostat_events(cmd: &ThermostatCommand) -> HubResult<Vec<Event>> {
    let name = required_name(cmd.name(), "thermostat command")?;
    let mut events = Vec::new();
    if cmd.has_mode() {
        events.push(Event::Thermostat {
            name: name.to_owned(),
            control: ThermostatControl::Mode(mode_from(cmd.mode())),
        });
    }
    if cmd.has_target_deci() {
        let target = f64::from(cmd.target_deci()) / 10.0;
        validate_target(name, target)?;
        events.push(Event::Thermostat {
            name: name.to_owned(),
            control: ThermostatControl::Target(target),
        });
    }
    Ok(events)
}

fn blind_events(cmd: &BlindCommand) -> HubResult<Vec<Event>> {
    let blind = required_name(cmd.blind(), "blind command")?;
    let mut events = Vec::new();
    if cmd.has_position() {
        let segment = required_name(cmd.segment(), blind)?;
        events.push(Event::BlindPosition {
            blind: blind.to_owned(),
            segment: segment.to_owned(),
            position: position_from(cmd.position()),
        });
    }
    if cmd.has_auto_override() {
        events.push(Event::BlindOverride {
            blind: blind.to_owned(),
            enabled: cmd.auto_override(),
        });
    }
    Ok(events)
}

fn hardware_events(status: &AirconStatus) -> HubResult<Vec<Event>> {
    let damper_percent = match status.has_damper_percent() {
        true if status.damper_percent() > 100 => {
            return Err(HubError::invalid("aircon", format!("damper {}%", status.damper_percent())))
        }
        true => Some(status.damper_percent() as u8),
        false => None,
    };
    Ok(vec![Event::Hardware(HardwareStatus {
        remote_operation: status.remote_operation(),
        heat: status.heat(),
        cool: status.cool(),
        fan: status.fan(),
        fan_hi: status.fan_hi(),
        fan_lo: status.fan_lo(),
        heating: status.heating(),
        compressor: status.compressor(),
        malfunction: status.malfunction(),
        damper_percent,
    })])
}

/// Turns one wire message into typed events, section by section.
pub fn decode(msg: &HubMessage) -> Decoded {
    let mut decoded = Decoded::default();
    if let Some(climate) = msg.climate.as_ref() {
        decoded.section(climate_events(climate));
    }
    if let Some(light) = msg.light.as_ref() {
        decoded.section(light_events(light));
    }
    if let Some(door) = msg.door.as_ref() {
        decoded.section(door_events(door));
    }
    if let Some(cmd) = msg.thermostat.as_ref() {
        decoded.section(thermostat_events(cmd));
    }
    if let Some(cmd) = msg.aircon_mode.as_ref() {
        decoded.events.push(Event::AirconMode(mode_from(cmd.mode())));
    }
    if let Some(cmd) = msg.blind.as_ref() {
        decoded.section(blind_events(cmd));
    }
    if let Some(status) = msg.aircon_status.as_ref() {
        decoded.section(hardware_events(status));
    }
    decoded
}

/// Validates datagrams and queues them for the control loop. Never touches domain state.
pub struct EventForwarder {
    tx: Sender<Event>,
}

impl EventForwarder {
    pub fn new(tx: Sender<Event>) -> Self {
        EventForwarder { tx }
    }
}

impl MessageHandler<HubMessage> for EventForwarder {
    fn on_message(&mut self, src: SocketAddr, msg: HubMessage) -> Result<()> {
        let decoded = decode(&msg);
        for e in &decoded.rejected {
            warn!(%src, "dropped section: {}", e);
        }
        for event in decoded.events {
            debug!(%src, ?event, "queued");
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => return Err(anyhow!("event queue full, dropped {:?}", event)),
                Err(TrySendError::Closed(_)) => return Err(anyhow!("control loop has stopped")),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn climate(name: &str, temperature_deci: i32, humidity_deci: u32) -> HubMessage {
        let mut report = ClimateReport::new();
        report.set_name(name.to_owned());
        report.set_temperature_deci(temperature_deci);
        report.set_humidity_deci(humidity_deci);
        let mut msg = HubMessage::new();
        msg.climate = Some(report).into();
        msg
    }

    #[test]
    fn climate_report_is_scaled() {
        let events = decode(&climate("Living", 215, 456)).events;
        assert_eq!(
            events,
            vec![Event::Climate {
                name: "Living".to_owned(),
                temp: 21.5,
                humidity: 45.6
            }]
        );
    }

    #[test]
    fn startup_sentinel_and_out_of_range_are_rejected() {
        let rejected = |msg: HubMessage| {
            let decoded = decode(&msg);
            decoded.events.is_empty() && decoded.rejected.len() == 1
        };
        assert!(matches!(
            decode(&climate("Living", 0, 0)).rejected.as_slice(),
            [HubError::SensorDataInvalid { .. }]
        ));
        assert_eq!(decode(&climate("Living", 0, 300)).events.len(), 1);
        assert!(rejected(climate("Outside", 650, 300)));
        assert!(rejected(climate("Outside", -120, 1200)));
        assert!(rejected(climate("", 200, 300)));
    }

    #[test]
    fn thermostat_command_may_carry_mode_and_target() {
        let mut cmd = ThermostatCommand::new();
        cmd.set_name("Bedroom".to_owned());
        cmd.set_mode(ThermostatMode::MODE_COOL);
        cmd.set_target_deci(235);
        let mut msg = HubMessage::new();
        msg.thermostat = Some(cmd).into();

        let events = decode(&msg).events;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            Event::Thermostat {
                name: "Bedroom".to_owned(),
                control: ThermostatControl::Target(23.5)
            }
        );
    }

    #[test]
    fn blind_command_needs_a_segment_for_a_position() {
        let mut cmd = BlindCommand::new();
        cmd.set_blind("Living Room Blinds".to_owned());
        cmd.set_position(BlindPosition::POS_CLOSED);
        let mut msg = HubMessage::new();
        msg.blind = Some(cmd).into();
        let decoded = decode(&msg);
        assert!(decoded.events.is_empty());
        assert_eq!(decoded.rejected.len(), 1);
    }

    #[test]
    fn bad_section_does_not_drop_the_rest() {
        let mut msg = climate("Living", 0, 0);
        let mut door = DoorReport::new();
        door.set_name("Patio Door".to_owned());
        door.set_open(true);
        msg.door = Some(door).into();
        let mut cmd = ThermostatCommand::new();
        cmd.set_name("Living".to_owned());
        cmd.set_mode(ThermostatMode::MODE_HEAT);
        cmd.set_target_deci(400);
        msg.thermostat = Some(cmd).into();

        let decoded = decode(&msg);
        assert_eq!(
            decoded.events,
            vec![Event::Door {
                name: "Patio Door".to_owned(),
                open: true,
                battery_low: false
            }]
        );
        assert_eq!(decoded.rejected.len(), 2);
    }

    #[test]
    fn forwarder_queues_the_valid_sections() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut forwarder = EventForwarder::new(tx);
        let src: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let mut msg = climate("", 215, 456);
        let mut light = LightReport::new();
        light.set_name("Patio Lux".to_owned());
        light.set_lux(12000);
        msg.light = Some(light).into();
        forwarder.on_message(src, msg).unwrap();
        assert!(matches!(rx.try_recv(), Ok(Event::Light { lux: 12000, .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forwarder_reports_a_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut forwarder = EventForwarder::new(tx);
        let src: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        forwarder.on_message(src, climate("Living", 215, 456)).unwrap();
        assert!(forwarder.on_message(src, climate("Living", 216, 456)).is_err());
        assert!(matches!(rx.try_recv(), Ok(Event::Climate { .. })));
    }
}
