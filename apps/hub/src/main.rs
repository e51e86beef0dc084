pub mod aircon;
pub mod blinds;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod publish;
pub mod snapshot;
pub mod web;

use anyhow::{Context, Result};
use clap::Parser;
use hub_protocol::listener::DatagramListener;
use hub_protocol::protos::generated::hub::HubMessage;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::blinds::actuator::TcpBlindLink;
use crate::clock::SystemClock;
use crate::config::HubConfig;
use crate::events::{Event, EventForwarder};
use crate::hub::{run_control_loop, Hub};
use crate::publish::Dispatcher;
use crate::snapshot::SnapshotStore;
use crate::web::{create_web_server, StatusBoard, WebState};

const EVENT_QUEUE: usize = 256;

#[derive(Parser, Debug)]
#[command(about = "Aircon zone and window blind controller")]
struct Args {
    /// Path to the hub configuration file.
    #[arg(short, long, default_value = "/etc/home-hub/hub.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!(path = %args.config, "Loading configuration");
    let config = HubConfig::from_file(&args.config)?;

    let store = SnapshotStore::new(&config.paths.state);
    let snapshot = store.load()?;

    let board = Arc::new(RwLock::new(StatusBoard::default()));
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);

    let publisher = Dispatcher::new(
        board.clone(),
        config.network.aircon_controller.clone(),
        &config.paths.cost_log,
        &config.paths.effectiveness_log,
    );
    if config.network.aircon_controller.is_none() {
        warn!("no aircon controller configured, aircon commands are not sent");
    }
    let link = TcpBlindLink::new(config.network.blind_controller.as_deref().unwrap_or_default());
    let mut hub = Hub::new(
        &config,
        snapshot,
        Arc::new(SystemClock),
        Box::new(link),
        Box::new(publisher),
        Some(store),
    )?;
    hub.announce();

    {
        let tx = tx.clone();
        let listen = config.network.listen.clone();
        tokio::spawn(async move {
            let mut forwarder = EventForwarder::new(tx);
            info!("Listening for sensor datagrams on {}", listen);
            if let Err(e) = DatagramListener::<HubMessage>::new(&mut forwarder).main_loop(&listen).await {
                error!("datagram listener stopped: {:#}", e);
            }
        });
    }

    {
        let tx = tx.clone();
        let period = Duration::from_secs(config.aircon.tick_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if tx.send(Event::Tick).await.is_err() {
                    break;
                }
            }
        });
    }

    {
        let state = WebState {
            board,
            events: tx.clone(),
        };
        let http = config.network.http.clone();
        tokio::spawn(async move {
            if let Err(e) = create_web_server(&http, state).await {
                error!("web server stopped: {:#}", e);
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = tx.send(Event::Shutdown).await;
        }
    });

    tokio::task::spawn_blocking(move || run_control_loop(&mut hub, rx))
        .await
        .context("control loop panicked")?;
    info!("hub stopped");
    Ok(())
}
