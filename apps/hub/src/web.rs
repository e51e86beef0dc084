use anyhow::{Context, Result};
use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::Sender;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::aircon::effectiveness::EffectivenessRecord;
use crate::aircon::tariff::AirconRunningCost;
use crate::aircon::{AirconState, HardwareStatus, Mode, Thermostat, Zone, ZoneAggregate};
use crate::blinds::{BlindRuntimeState, Position};
use crate::events::{validate_target, Event, Outbound, ThermostatControl};

const RECENT_OVERRIDES: usize = 20;

// Shared between the control loop (writer) and the web server (reader).
#[derive(Clone)]
pub struct WebState {
    pub board: Arc<RwLock<StatusBoard>>,
    pub events: Sender<Event>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct StatusBoard {
    pub thermostats: BTreeMap<String, Thermostat>,
    pub zones: BTreeMap<Zone, ZoneAggregate>,
    pub sensors: BTreeMap<String, SensorStatus>,
    pub doors: BTreeMap<String, DoorStatus>,
    pub aircon: AirconStatus,
    pub effectiveness: BTreeMap<String, EffectivenessRecord>,
    pub blinds: BTreeMap<String, BlindStatus>,
    pub safety_overrides: VecDeque<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SensorStatus {
    pub temp: f64,
    pub humidity: f64,
    pub updated: i64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DoorStatus {
    pub open: bool,
    pub battery_low: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct AirconStatus {
    pub mode: Mode,
    pub state: AirconState,
    pub damper_percent: Option<u8>,
    pub hardware: HardwareStatus,
    pub running_cost: AirconRunningCost,
    pub last_transition: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BlindStatus {
    pub state: BlindRuntimeState,
    pub positions: BTreeMap<String, Position>,
}

impl StatusBoard {
    pub fn apply(&mut self, item: &Outbound) {
        match item {
            Outbound::Reading { name, temp, humidity } => {
                self.sensors.insert(
                    name.clone(),
                    SensorStatus {
                        temp: *temp,
                        humidity: *humidity,
                        updated: Local::now().timestamp(),
                    },
                );
            }
            Outbound::Door {
                name,
                open,
                battery_low,
            } => {
                self.doors.insert(
                    name.clone(),
                    DoorStatus {
                        open: *open,
                        battery_low: *battery_low,
                    },
                );
            }
            Outbound::Thermostat(t) => {
                self.thermostats.insert(t.name.clone(), t.clone());
            }
            Outbound::Zone { zone, aggregate } => {
                self.zones.insert(*zone, *aggregate);
            }
            Outbound::Hardware(status) => self.aircon.hardware = *status,
            Outbound::AirconMode(mode) => self.aircon.mode = *mode,
            Outbound::AirconState(state) => self.aircon.state = *state,
            Outbound::Damper(percent) => self.aircon.damper_percent = Some(percent.get()),
            Outbound::AirconCommand { .. } => {}
            Outbound::RunningCost(cost) => self.aircon.running_cost = *cost,
            Outbound::Cost(record) => self.aircon.last_transition = Some(record.to_string()),
            Outbound::Effectiveness(line) => {
                self.effectiveness.insert(line.subject.clone(), line.record);
            }
            Outbound::EffectivenessBounds { subject, record } => {
                self.effectiveness.insert(subject.clone(), *record);
            }
            Outbound::Segment {
                blind,
                segment,
                position,
            } => {
                self.blinds
                    .entry(blind.clone())
                    .or_default()
                    .positions
                    .insert(segment.clone(), *position);
            }
            Outbound::BlindState { blind, state } => {
                self.blinds.entry(blind.clone()).or_default().state = *state;
            }
            Outbound::SafetyOverride(report) => {
                if self.safety_overrides.len() == RECENT_OVERRIDES {
                    self.safety_overrides.pop_front();
                }
                self.safety_overrides
                    .push_back(format!("{} {}", Local::now().format("%Y-%m-%d %H:%M:%S"), report));
            }
        }
    }
}

#[derive(Deserialize)]
pub struct ThermostatRequest {
    name: String,
    mode: Option<Mode>,
    target: Option<f64>,
}

#[derive(Deserialize)]
pub struct AirconRequest {
    mode: Mode,
}

#[derive(Deserialize)]
pub struct BlindRequest {
    blind: String,
    segment: String,
    position: Position,
}

#[derive(Deserialize)]
pub struct OverrideRequest {
    blind: String,
    enabled: bool,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/thermostat", post(thermostat_command))
        .route("/api/aircon", post(aircon_command))
        .route("/api/blind", post(blind_command))
        .route("/api/blind/override", post(blind_override))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn create_web_server(bind: &str, state: WebState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind web server to {}", bind))?;
    info!("Starting web server on http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn get_status(State(state): State<WebState>) -> axum::Json<StatusBoard> {
    let board = state.board.read().unwrap_or_else(PoisonError::into_inner);
    axum::Json(board.clone())
}

fn failure(error: impl ToString) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": false,
        "error": error.to_string()
    }))
}

/// Commands only ever reach domain state through the control loop's queue.
async fn enqueue(state: &WebState, events: Vec<Event>) -> axum::Json<serde_json::Value> {
    for event in events {
        if state.events.send(event).await.is_err() {
            return failure("control loop has stopped");
        }
    }
    axum::Json(serde_json::json!({ "success": true }))
}

async fn thermostat_command(
    State(state): State<WebState>,
    Json(request): Json<ThermostatRequest>,
) -> axum::Json<serde_json::Value> {
    let mut events = Vec::new();
    if let Some(mode) = request.mode {
        events.push(Event::Thermostat {
            name: request.name.clone(),
            control: ThermostatControl::Mode(mode),
        });
    }
    if let Some(target) = request.target {
        if let Err(e) = validate_target(&request.name, target) {
            return failure(e);
        }
        events.push(Event::Thermostat {
            name: request.name.clone(),
            control: ThermostatControl::Target(target),
        });
    }
    if events.is_empty() {
        return failure("nothing to change");
    }
    enqueue(&state, events).await
}

async fn aircon_command(
    State(state): State<WebState>,
    Json(request): Json<AirconRequest>,
) -> axum::Json<serde_json::Value> {
    enqueue(&state, vec![Event::AirconMode(request.mode)]).await
}

async fn blind_command(
    State(state): State<WebState>,
    Json(request): Json<BlindRequest>,
) -> axum::Json<serde_json::Value> {
    let event = Event::BlindPosition {
        blind: request.blind,
        segment: request.segment,
        position: request.position,
    };
    enqueue(&state, vec![event]).await
}

async fn blind_override(
    State(state): State<WebState>,
    Json(request): Json<OverrideRequest>,
) -> axum::Json<serde_json::Value> {
    let event = Event::BlindOverride {
        blind: request.blind,
        enabled: request.enabled,
    };
    enqueue(&state, vec![event]).await
}
