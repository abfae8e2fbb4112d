use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use animatek::{
    config::{load_config, Args},
    devices::{CommandQueue, Fleet, GoveeApi},
    engine::{initial_snapshot, EngineHandle, TimerEngine},
    hub::BroadcastHub,
    ipc,
    reactor::{self, ReactorSettings},
    recorder::{CalendarService, GoogleWorkspace, SessionRecorder, SheetService, Unconfigured},
    state::AppState,
    store::RecordStore,
    ws,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("animatek={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(sheet_id) = args.sheet_id() {
        config.google.sheet_id = Some(sheet_id);
    }

    let data_dir = config.data_dir()?;
    let sessions_dir = config.sessions_out_dir()?;
    let store = Arc::new(
        RecordStore::open(&data_dir)
            .await
            .with_context(|| format!("Failed to open record store at {:?}", data_dir))?,
    );
    info!("Data: {:?}", data_dir);
    info!("Session artifacts: {:?}", sessions_dir);

    // Google Workspace, or local fallbacks only
    let call_timeout = Duration::from_secs(config.google.timeout_secs);
    let (calendar, sheet): (Arc<dyn CalendarService>, Arc<dyn SheetService>) =
        match GoogleWorkspace::new(
            store.clone(),
            config.google.calendar_id.clone(),
            config.google.sheet_id.clone(),
            call_timeout,
        ) {
            Ok(google) => {
                let google = Arc::new(google);
                (
                    google.clone() as Arc<dyn CalendarService>,
                    google as Arc<dyn SheetService>,
                )
            }
            Err(e) => {
                warn!("Google Workspace unavailable, using local fallbacks: {}", e);
                (Arc::new(Unconfigured), Arc::new(Unconfigured))
            }
        };
    let recorder = Arc::new(SessionRecorder::new(
        store.clone(),
        calendar,
        sheet,
        sessions_dir,
        call_timeout,
    ));

    // Lights
    if args.govee_api_key.is_none() {
        warn!("GOVEE_API_KEY not set; light commands will fail");
    }
    let govee = GoveeApi::new(config.lights.api_base.clone(), args.govee_api_key.clone())
        .context("Failed to build Govee client")?;
    let queue = CommandQueue::spawn(Arc::new(govee), config.lights.queue_settings());
    let fleet = Arc::new(Fleet::new(queue, &config.lights));

    // Timer engine and hub
    let app_config = store.config().await.context("Failed to read config.json")?;
    let initial = initial_snapshot(&app_config);
    let (engine, inbox) = EngineHandle::channel();
    let hub = Arc::new(BroadcastHub::new(initial.clone(), engine));
    tokio::spawn(TimerEngine::new(initial, recorder.clone(), hub.clone()).run(inbox));

    tokio::spawn(reactor::run(
        hub.clone(),
        fleet.clone(),
        ReactorSettings {
            blink_on_complete: config.lights.blink_on_complete,
            category_lights: config.lights.category_lights,
            notify_on_complete: config.notify_on_complete,
        },
    ));

    let state = Arc::new(AppState {
        store,
        hub: hub.clone(),
        fleet,
        recorder,
    });

    let control_socket = config.control_socket.clone();
    let ws_listen = config.ws_listen;

    tokio::select! {
        res = ws::serve(ws_listen, hub) => {
            if let Err(e) = res {
                error!("WebSocket server failed: {:#}", e);
                return Err(e);
            }
        }
        res = ipc::server::serve(&control_socket, state) => {
            if let Err(e) = res {
                error!("Control socket failed: {:#}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    let _ = std::fs::remove_file(&control_socket);
    Ok(())
}
