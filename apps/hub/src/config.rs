use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::aircon::tariff::{PowerDraw, PowerRateSchedule};
use crate::aircon::{AirconSettings, Zone};
use crate::blinds::{BlindConfig, Segment, SegmentKind};
use crate::error::{HubError, HubResult};

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub aircon: AirconConfig,
    #[serde(default)]
    pub tariff: PowerRateSchedule,
    #[serde(default)]
    pub blinds: Vec<BlindSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_http")]
    pub http: String,
    pub aircon_controller: Option<String>,
    pub blind_controller: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_state_path")]
    pub state: String,
    #[serde(default = "default_cost_log")]
    pub cost_log: String,
    #[serde(default = "default_effectiveness_log")]
    pub effectiveness_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirconConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_sample_spacing_secs")]
    pub sample_spacing_secs: u64,
    #[serde(default)]
    pub power: PowerDraw,
    #[serde(default)]
    pub thermostats: Vec<ThermostatSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThermostatSettings {
    pub name: String,
    pub zone: Zone,
    #[serde(default = "default_target")]
    pub target: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKindSetting {
    Window,
    Door,
    Aggregate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentSettings {
    pub id: String,
    pub kind: SegmentKindSetting,
    pub door: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlindSettings {
    pub name: String,
    pub light_sensor: String,
    pub temp_sensor: String,
    #[serde(default)]
    pub doors: Vec<String>,
    pub sunlight_thresholds: [u32; 4],
    pub temp_high: f64,
    pub temp_low: f64,
    #[serde(default = "default_temp_gap")]
    pub temp_gap: f64,
    #[serde(default = "default_close_secs")]
    pub close_secs: u64,
    #[serde(default = "default_tilt_ms")]
    pub tilt_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    pub segments: Vec<SegmentSettings>,
}

fn default_listen() -> String {
    "0.0.0.0:4000".to_owned()
}

fn default_http() -> String {
    "0.0.0.0:8080".to_owned()
}

fn default_state_path() -> String {
    "/var/lib/home-hub/state.json".to_owned()
}

fn default_cost_log() -> String {
    "/var/log/home-hub/aircon-cost.log".to_owned()
}

fn default_effectiveness_log() -> String {
    "/var/log/home-hub/aircon-effectiveness.log".to_owned()
}

fn default_tick_secs() -> u64 {
    30
}

fn default_hysteresis() -> f64 {
    0.4
}

fn default_stale_after_secs() -> u64 {
    900
}

fn default_sample_spacing_secs() -> u64 {
    10
}

fn default_target() -> f64 {
    21.0
}

fn default_temp_gap() -> f64 {
    1.0
}

fn default_close_secs() -> u64 {
    25
}

fn default_tilt_ms() -> u64 {
    1500
}

fn default_poll_ms() -> u64 {
    500
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            http: default_http(),
            aircon_controller: None,
            blind_controller: None,
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            state: default_state_path(),
            cost_log: default_cost_log(),
            effectiveness_log: default_effectiveness_log(),
        }
    }
}

impl Default for AirconConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            hysteresis: default_hysteresis(),
            stale_after_secs: default_stale_after_secs(),
            sample_spacing_secs: default_sample_spacing_secs(),
            power: PowerDraw::default(),
            thermostats: Vec::new(),
        }
    }
}

impl SegmentSettings {
    fn to_segment(&self, blind: &str) -> HubResult<Segment> {
        let kind = match (self.kind, &self.door) {
            (SegmentKindSetting::Window, None) => SegmentKind::Window,
            (SegmentKindSetting::Door, Some(door)) => SegmentKind::Door { door: door.clone() },
            (SegmentKindSetting::Aggregate, None) if !self.members.is_empty() => SegmentKind::Aggregate {
                members: self.members.clone(),
            },
            _ => {
                return Err(HubError::config(format!(
                    "{}: segment {} has fields that do not fit its kind",
                    blind, self.id
                )))
            }
        };
        Ok(Segment {
            id: self.id.clone(),
            kind,
        })
    }
}

impl BlindSettings {
    pub fn to_config(&self) -> HubResult<BlindConfig> {
        let segments = self
            .segments
            .iter()
            .map(|s| s.to_segment(&self.name))
            .collect::<HubResult<Vec<_>>>()?;
        let config = BlindConfig {
            name: self.name.clone(),
            light_sensor: self.light_sensor.clone(),
            temp_sensor: self.temp_sensor.clone(),
            doors: self.doors.clone(),
            segments,
            sunlight_thresholds: self.sunlight_thresholds,
            temp_high: self.temp_high,
            temp_low: self.temp_low,
            temp_gap: self.temp_gap,
            close_duration: Duration::from_secs(self.close_secs),
            tilt_time: Duration::from_millis(self.tilt_ms),
            poll_interval: Duration::from_millis(self.poll_ms),
        };
        config.validate()?;
        Ok(config)
    }
}

impl AirconConfig {
    pub fn settings(&self, schedule: &PowerRateSchedule) -> AirconSettings {
        AirconSettings {
            hysteresis: self.hysteresis,
            stale_after: chrono::Duration::seconds(self.stale_after_secs as i64),
            sample_spacing: chrono::Duration::seconds(self.sample_spacing_secs as i64),
            schedule: schedule.clone(),
            draw: self.power,
        }
    }
}

impl HubConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Blind configurations in their validated form.
    pub fn blind_configs(&self) -> HubResult<Vec<BlindConfig>> {
        self.blinds.iter().map(BlindSettings::to_config).collect()
    }

    fn validate(&self) -> HubResult<()> {
        self.tariff.validate()?;
        if self.aircon.hysteresis < 0.0 {
            return Err(HubError::config("aircon.hysteresis is negative"));
        }
        if self.aircon.tick_secs == 0 {
            return Err(HubError::config("aircon.tick_secs is zero"));
        }
        let mut names = std::collections::HashSet::new();
        for t in &self.aircon.thermostats {
            if !names.insert(t.name.as_str()) {
                return Err(HubError::config(format!("thermostat {} configured twice", t.name)));
            }
        }
        let mut blinds = std::collections::HashSet::new();
        for b in &self.blinds {
            if !blinds.insert(b.name.as_str()) {
                return Err(HubError::config(format!("blind {} configured twice", b.name)));
            }
        }
        if !self.blinds.is_empty() && self.network.blind_controller.is_none() {
            return Err(HubError::config("blinds configured without network.blind_controller"));
        }
        self.blind_configs()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = include_str!("../../../config/hub.toml");

    #[test]
    fn sample_config_loads() -> Result<()> {
        let config = HubConfig::from_toml(SAMPLE)?;
        assert_eq!(config.aircon.hysteresis, 0.4);
        assert!(!config.aircon.thermostats.is_empty());
        let blinds = config.blind_configs()?;
        assert_eq!(blinds[0].close_duration, Duration::from_secs(25));
        assert!(blinds[0].segments.iter().any(|s| s.door().is_some()));
        Ok(())
    }

    #[test]
    fn empty_config_uses_defaults() -> Result<()> {
        let config = HubConfig::from_toml("")?;
        assert_eq!(config.network.listen, "0.0.0.0:4000");
        assert_eq!(config.tariff.weekday.len(), 5);
        assert_eq!(config.tariff.weekend.len(), 3);
        Ok(())
    }

    #[test]
    fn tariff_gap_aborts_load() {
        let toml = r#"
            [tariff]
            weekday = [{ start_hour = 0, name = "Flat", rate = 0.2, stop_hour = 22 }]
            weekend = [{ start_hour = 0, name = "Flat", rate = 0.2, stop_hour = 23 }]
        "#;
        let err = HubConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("hour 23"));
    }

    #[test]
    fn blinds_need_a_controller() {
        let without = SAMPLE.replace("blind_controller = \"blind-controller.local:4020\"", "");
        let err = HubConfig::from_toml(&without).unwrap_err();
        assert!(err.to_string().contains("blind_controller"));
    }

    #[test]
    fn door_segment_needs_a_door() {
        let toml = r#"
            [network]
            blind_controller = "127.0.0.1:4020"

            [[blinds]]
            name = "Study"
            light_sensor = "Study Lux"
            temp_sensor = "Outside"
            sunlight_thresholds = [100, 1000, 10000, 20000]
            temp_high = 27.0
            temp_low = 10.0
            segments = [{ id = "Door", kind = "door" }]
        "#;
        assert!(HubConfig::from_toml(toml).is_err());
    }
}
