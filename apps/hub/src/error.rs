use thiserror::Error;

use crate::aircon::Mode;
use crate::blinds::SafetyOverride;

pub type HubResult<T> = Result<T, HubError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HubError {
    /// Stale, out of range or startup-sentinel reading. Affects only the reporting sensor.
    #[error("invalid reading from {sensor}: {reason}")]
    SensorDataInvalid { sensor: String, reason: String },

    #[error("{peer} unreachable: {reason}")]
    Comms { peer: String, reason: String },

    /// A requested action was not applied because a door is open.
    #[error("{0}")]
    SafetyOverride(SafetyOverride),

    #[error("inconsistent configuration: {what}")]
    ConfigInconsistency { what: String },

    #[error("unknown {kind} '{name}'")]
    UnknownEntity { kind: &'static str, name: String },

    #[error("aircon {mode} needs at least one active zone sensor")]
    NoActiveZone { mode: Mode },
}

impl HubError {
    pub fn config(what: impl Into<String>) -> Self {
        HubError::ConfigInconsistency { what: what.into() }
    }

    pub fn invalid(sensor: &str, reason: impl Into<String>) -> Self {
        HubError::SensorDataInvalid {
            sensor: sensor.to_owned(),
            reason: reason.into(),
        }
    }
}
