use anyhow::{Context, Result};
use hub_protocol::aircon::send_aircon_control;
use hub_protocol::protos::generated::hub::AirconRunMode;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::aircon::AirconState;
use crate::events::Outbound;
use crate::web::StatusBoard;

/// Receives everything the control loop produces.
pub trait Publisher: Send {
    fn publish(&mut self, item: &Outbound);
}

impl From<AirconState> for AirconRunMode {
    fn from(state: AirconState) -> Self {
        match state {
            AirconState::Off => AirconRunMode::RUN_OFF,
            AirconState::Idle => AirconRunMode::RUN_IDLE,
            AirconState::Heat => AirconRunMode::RUN_HEAT,
            AirconState::Cool => AirconRunMode::RUN_COOL,
        }
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", line).with_context(|| format!("Failed to append to {}", path.display()))?;
    Ok(())
}

/// Updates the status board, forwards aircon commands and appends the audit logs.
pub struct Dispatcher {
    board: Arc<RwLock<StatusBoard>>,
    aircon_controller: Option<String>,
    cost_log: PathBuf,
    effectiveness_log: PathBuf,
    aircon_failing: bool,
}

impl Dispatcher {
    pub fn new(
        board: Arc<RwLock<StatusBoard>>,
        aircon_controller: Option<String>,
        cost_log: impl Into<PathBuf>,
        effectiveness_log: impl Into<PathBuf>,
    ) -> Self {
        Dispatcher {
            board,
            aircon_controller,
            cost_log: cost_log.into(),
            effectiveness_log: effectiveness_log.into(),
            aircon_failing: false,
        }
    }

    fn send_aircon(&mut self, run: AirconState, damper: Option<u8>) {
        let Some(addr) = self.aircon_controller.as_deref() else {
            debug!(%run, ?damper, "no aircon controller configured");
            return;
        };
        match send_aircon_control(addr, run.into(), damper) {
            Ok(()) => {
                if self.aircon_failing {
                    info!(addr, "aircon controller reachable again");
                    self.aircon_failing = false;
                }
            }
            Err(e) => {
                if !self.aircon_failing {
                    warn!(addr, "aircon command failed: {:#}", e);
                    self.aircon_failing = true;
                }
            }
        }
    }
}

impl Publisher for Dispatcher {
    fn publish(&mut self, item: &Outbound) {
        self.board.write().unwrap_or_else(PoisonError::into_inner).apply(item);
        match item {
            Outbound::AirconCommand { run, damper } => self.send_aircon(*run, damper.map(|d| d.get())),
            Outbound::Cost(record) => {
                info!("{}", record);
                if let Err(e) = append_line(&self.cost_log, &record.to_string()) {
                    warn!("{:#}", e);
                }
            }
            Outbound::Effectiveness(line) => {
                info!("{}", line);
                if let Err(e) = append_line(&self.effectiveness_log, &line.to_string()) {
                    warn!("{:#}", e);
                }
            }
            _ => {}
        }
    }
}
