use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hub_protocol::protos::generated::hub::{
    AirconModeCommand, AirconStatus, BlindCommand, BlindPosition, ClimateReport, DoorReport, HubMessage, LightReport,
    ThermostatCommand, ThermostatMode,
};
use protobuf::Message;
use std::net::UdpSocket;

/// Sends one datagram to the hub, the same way the sensors and wall panels do.
#[derive(Parser, Debug)]
struct Args {
    /// Hub datagram address.
    #[arg(long, default_value = "127.0.0.1:4000")]
    hub: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Off,
    Heat,
    Cool,
}

impl From<ModeArg> for ThermostatMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Off => ThermostatMode::MODE_OFF,
            ModeArg::Heat => ThermostatMode::MODE_HEAT,
            ModeArg::Cool => ThermostatMode::MODE_COOL,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PositionArg {
    Open,
    Venetian,
    Closed,
}

impl From<PositionArg> for BlindPosition {
    fn from(position: PositionArg) -> Self {
        match position {
            PositionArg::Open => BlindPosition::POS_OPEN,
            PositionArg::Venetian => BlindPosition::POS_VENETIAN,
            PositionArg::Closed => BlindPosition::POS_CLOSED,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Temperature and humidity reading.
    Climate {
        name: String,
        #[arg(allow_hyphen_values = true)]
        temp: f64,
        humidity: f64,
    },
    /// Light level reading.
    Light { name: String, lux: u32 },
    /// Door contact report.
    Door {
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        open: bool,
        #[arg(long)]
        battery_low: bool,
    },
    /// Thermostat mode and/or target.
    Thermostat {
        name: String,
        #[arg(long)]
        mode: Option<ModeArg>,
        #[arg(long)]
        target: Option<f64>,
    },
    /// Master aircon mode.
    Aircon { mode: ModeArg },
    /// Manual blind segment position.
    Blind {
        blind: String,
        segment: String,
        position: PositionArg,
    },
    /// Automatic blind control on or off.
    Override {
        blind: String,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Hardware status as the aircon controller reports it.
    AirconStatus {
        #[arg(long)]
        remote: bool,
        #[arg(long)]
        malfunction: bool,
        #[arg(long)]
        damper: Option<u32>,
    },
}

fn deci(value: f64) -> i32 {
    (value * 10.0).round() as i32
}

fn build(command: &Command) -> Result<HubMessage> {
    let mut msg = HubMessage::new();
    match command {
        Command::Climate { name, temp, humidity } => {
            let mut report = ClimateReport::new();
            report.set_name(name.clone());
            report.set_temperature_deci(deci(*temp));
            report.set_humidity_deci(deci(*humidity).max(0) as u32);
            msg.climate = Some(report).into();
        }
        Command::Light { name, lux } => {
            let mut report = LightReport::new();
            report.set_name(name.clone());
            report.set_lux(*lux);
            msg.light = Some(report).into();
        }
        Command::Door {
            name,
            open,
            battery_low,
        } => {
            let mut report = DoorReport::new();
            report.set_name(name.clone());
            report.set_open(*open);
            report.set_battery_low(*battery_low);
            msg.door = Some(report).into();
        }
        Command::Thermostat { name, mode, target } => {
            if mode.is_none() && target.is_none() {
                bail!("thermostat needs --mode or --target");
            }
            let mut cmd = ThermostatCommand::new();
            cmd.set_name(name.clone());
            if let Some(mode) = mode {
                cmd.set_mode((*mode).into());
            }
            if let Some(target) = target {
                cmd.set_target_deci(deci(*target));
            }
            msg.thermostat = Some(cmd).into();
        }
        Command::Aircon { mode } => {
            let mut cmd = AirconModeCommand::new();
            cmd.set_mode((*mode).into());
            msg.aircon_mode = Some(cmd).into();
        }
        Command::Blind {
            blind,
            segment,
            position,
        } => {
            let mut cmd = BlindCommand::new();
            cmd.set_blind(blind.clone());
            cmd.set_segment(segment.clone());
            cmd.set_position((*position).into());
            msg.blind = Some(cmd).into();
        }
        Command::Override { blind, enabled } => {
            let mut cmd = BlindCommand::new();
            cmd.set_blind(blind.clone());
            cmd.set_auto_override(*enabled);
            msg.blind = Some(cmd).into();
        }
        Command::AirconStatus {
            remote,
            malfunction,
            damper,
        } => {
            let mut status = AirconStatus::new();
            status.set_remote_operation(*remote);
            status.set_malfunction(*malfunction);
            if let Some(percent) = damper {
                status.set_damper_percent(*percent);
            }
            msg.aircon_status = Some(status).into();
        }
    }
    Ok(msg)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let msg = build(&args.command)?;
    let udp = UdpSocket::bind("0.0.0.0:0")?;
    let out_bytes: Vec<u8> = msg.write_to_bytes()?;
    println!("Sending {} bytes to {}", out_bytes.len(), args.hub);
    udp.send_to(&out_bytes, &args.hub)?;
    Ok(())
}
