//! Unix domain socket server for the control plane

use anyhow::{Context, Result};
use animatek_ipc::{
    CategoryTotals, LightRequest, Request, Response, ServerMessage, TimerAction,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use crate::state::AppState;

pub async fn serve(path: &Path, state: Arc<AppState>) -> Result<()> {
    // Remove old socket if it exists
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind control socket {:?}", path))?;
    info!("Control socket listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state).await {
                        error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, state: Arc<AppState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader.read_line(&mut line).await?;
    let response = match serde_json::from_str::<Request>(&line) {
        Ok(request) => handle_request(&state, request).await,
        Err(e) => Response::Error(format!("Malformed request: {e}")),
    };

    let response_json = serde_json::to_vec(&response)?;
    writer.write_all(&response_json).await?;
    writer.shutdown().await?;

    Ok(())
}

/// Run one request; failures come back as [`Response::Error`]
pub async fn handle_request(state: &AppState, request: Request) -> Response {
    debug!("Control request {:?}", request);
    match dispatch(state, request).await {
        Ok(response) => response,
        Err(e) => Response::Error(format!("{e:#}")),
    }
}

async fn dispatch(state: &AppState, request: Request) -> Result<Response> {
    let response = match request {
        Request::Status => Response::State(state.hub.snapshot().await),
        // same inbox as observer commands, but waits for the new state
        Request::Timer(action) => Response::State(state.hub.engine().apply(action).await?),
        Request::GetConfig => Response::Config(state.store.config().await?),
        Request::UpdateConfig(patch) => {
            if !patch.is_object() {
                anyhow::bail!("Config update must be a JSON object");
            }
            let config = state
                .store
                .config()
                .await?
                .merged(&patch)
                .context("Invalid config values")?;
            state.store.save_config(&config).await?;
            if patch.get("defaultDurationMin").is_some_and(|v| v.is_number()) {
                let secs = config.default_duration_sec() as i64;
                state.hub.engine().apply(TimerAction::SetDurationSec(secs)).await?;
            }
            state
                .hub
                .publish(ServerMessage::ConfigUpdate(config.clone()))
                .await;
            Response::Config(config)
        }
        Request::ListSessions => Response::Sessions(state.store.sessions().await?),
        Request::DeleteSession { id } => Response::Removed(state.store.delete_session(id).await?),
        Request::ClearSessions => {
            state.store.clear_sessions().await?;
            Response::Ok
        }
        Request::PatchSession { id, patch } => {
            Response::Session(state.store.update_session(id, |r| patch.apply(r)).await?)
        }
        Request::Stats => {
            Response::Stats(CategoryTotals::from_sessions(&state.store.sessions().await?))
        }
        Request::ImportFromSheet => Response::Imported(state.recorder.import_from_sheet().await?),
        Request::Lights(request) => lights(state, request).await?,
    };
    Ok(response)
}

async fn lights(state: &AppState, request: LightRequest) -> Result<Response> {
    let fleet = &state.fleet;
    match request {
        LightRequest::AllOn => fleet.all_on().await?,
        LightRequest::AllOff => fleet.all_off().await?,
        LightRequest::Power { device, on } => fleet.set_power(&device, on).await?,
        LightRequest::Color { device, color } => fleet.set_color(&device, &color).await?,
        LightRequest::Brightness { device, percent } => {
            fleet.set_brightness(&device, percent).await?
        }
        LightRequest::Preset { name } => fleet.apply_preset(&name).await?,
        LightRequest::Blink => fleet.blink().await?,
        LightRequest::Status => return Ok(Response::Devices(fleet.status().await?)),
    }
    Ok(Response::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LightsConfig;
    use crate::devices::{CommandQueue, DeviceApi, DeviceError, Fleet, QueueSettings, QueuedCommand};
    use crate::engine::{initial_snapshot, EngineHandle, TimerEngine};
    use crate::hub::BroadcastHub;
    use crate::recorder::{SessionRecorder, Unconfigured};
    use crate::store::RecordStore;
    use animatek_ipc::{SessionPatch, TimerPhase};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    struct Offline;

    #[async_trait]
    impl DeviceApi for Offline {
        async fn dispatch(&self, _: &QueuedCommand) -> Result<Value, DeviceError> {
            Err(DeviceError::NotConfigured)
        }
    }

    async fn app(dir: &TempDir) -> Arc<AppState> {
        let store = Arc::new(RecordStore::open(dir.path().join("data")).await.unwrap());
        let recorder = Arc::new(SessionRecorder::new(
            store.clone(),
            Arc::new(Unconfigured),
            Arc::new(Unconfigured),
            dir.path().join("sessions"),
            Duration::from_secs(5),
        ));
        let initial = initial_snapshot(&store.config().await.unwrap());
        let (engine, inbox) = EngineHandle::channel();
        let hub = Arc::new(BroadcastHub::new(initial.clone(), engine));
        tokio::spawn(TimerEngine::new(initial, recorder.clone(), hub.clone()).run(inbox));
        let queue = CommandQueue::spawn(Arc::new(Offline), QueueSettings::default());
        let fleet = Arc::new(Fleet::new(queue, &LightsConfig::default()));
        Arc::new(AppState {
            store,
            hub,
            fleet,
            recorder,
        })
    }

    #[tokio::test]
    async fn test_timer_and_status() {
        let dir = TempDir::new().unwrap();
        let state = app(&dir).await;

        match handle_request(&state, Request::Timer(TimerAction::Start)).await {
            Response::State(s) => assert_eq!(s.state, TimerPhase::Running),
            other => panic!("unexpected {:?}", other),
        }
        match handle_request(&state, Request::Status).await {
            Response::State(s) => {
                assert_eq!(s.state, TimerPhase::Running);
                assert_eq!(s.duration_sec, 5400);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_config_broadcasts_and_sets_duration() {
        let dir = TempDir::new().unwrap();
        let state = app(&dir).await;
        let mut observer = state.hub.subscribe().await;
        observer.rx.recv().await.unwrap();

        let patch = json!({"defaultDurationMin": 25, "theme": "light", "obsScene": "Main"});
        match handle_request(&state, Request::UpdateConfig(patch)).await {
            Response::Config(c) => {
                assert_eq!(c.default_duration_min, 25.0);
                assert_eq!(c.extra["obsScene"], "Main");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(state.hub.snapshot().await.duration_sec, 1500);
        assert_eq!(state.store.config().await.unwrap().theme, "light");

        let mut saw_config = false;
        while let Ok(frame) = observer.rx.try_recv() {
            if matches!(
                serde_json::from_str(&frame).unwrap(),
                ServerMessage::ConfigUpdate(_)
            ) {
                saw_config = true;
            }
        }
        assert!(saw_config);

        assert!(matches!(
            handle_request(&state, Request::UpdateConfig(json!([1, 2]))).await,
            Response::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_session_management() {
        let dir = TempDir::new().unwrap();
        let state = app(&dir).await;
        state.hub.engine().apply(TimerAction::Start).await.unwrap();
        state.hub.engine().apply(TimerAction::Finish).await.unwrap();

        let sessions = match handle_request(&state, Request::ListSessions).await {
            Response::Sessions(s) => s,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(sessions.len(), 1);
        let id = sessions[0].id;

        let patch = SessionPatch {
            category: Some("Digitakt".to_string()),
            duration_min: Some(30),
            duration_sec: Some(1800),
            ..Default::default()
        };
        match handle_request(&state, Request::PatchSession { id, patch }).await {
            Response::Session(s) => assert_eq!(s.category, "Digitakt"),
            other => panic!("unexpected {:?}", other),
        }
        match handle_request(&state, Request::Stats).await {
            Response::Stats(t) => {
                assert_eq!(t.totals_min["Digitakt"], 30.0);
                assert_eq!(t.totals_hours["Digitakt"], 0.5);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            handle_request(&state, Request::DeleteSession { id }).await,
            Response::Removed(1)
        ));
        assert!(matches!(
            handle_request(&state, Request::PatchSession { id, patch: SessionPatch::default() }).await,
            Response::Error(_)
        ));
        assert!(matches!(
            handle_request(&state, Request::ImportFromSheet).await,
            Response::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_lights_errors_surface() {
        let dir = TempDir::new().unwrap();
        let state = app(&dir).await;
        match handle_request(&state, Request::Lights(LightRequest::Status)).await {
            Response::Error(e) => assert!(e.contains("GOVEE_API_KEY")),
            other => panic!("unexpected {:?}", other),
        }
        match handle_request(
            &state,
            Request::Lights(LightRequest::Preset {
                name: "disco".to_string(),
            }),
        )
        .await
        {
            Response::Error(e) => assert!(e.contains("disco")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = app(&dir).await;
        let path = dir.path().join("animatek.sock");
        let server_path = path.clone();
        tokio::spawn(async move { serve(&server_path, state).await });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut stream = stream.expect("server did not come up");
        let mut line = serde_json::to_vec(&Request::Status).unwrap();
        line.push(b'\n');
        stream.write_all(&line).await.unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let response: Response = serde_json::from_slice(&buf).unwrap();
        assert!(matches!(response, Response::State(_)));
    }
}
