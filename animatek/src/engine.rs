//! The timer engine: sole owner of the in-progress session state
//!
//! Runs as one task. Inbound actions and the 1 Hz tick are both handled
//! inside the same `select!` loop, so every mutation and the publish that
//! follows it happen back to back with nothing interleaved. The tick driver
//! is an `Option<Interval>`; dropping it is what stops ticking, and that
//! happens inside the handler for `pause`/`reset`/completion before the next
//! loop iteration can poll it.

use animatek_ipc::{AppConfig, ServerMessage, TimerAction, TimerPhase, TimerSnapshot};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::hub::BroadcastHub;
use crate::recorder::{SessionFields, SessionRecorder};

pub const MIN_DURATION_SEC: u64 = 60;

const TICK: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
#[error("Timer engine is not running")]
pub struct EngineStopped;

enum EngineCommand {
    Action {
        action: TimerAction,
        reply: Option<oneshot::Sender<TimerSnapshot>>,
    },
    Snapshot(oneshot::Sender<TimerSnapshot>),
}

/// Cheap handle for talking to the engine task
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

/// Receiving side, consumed by [`TimerEngine::run`]
pub struct EngineInbox {
    rx: mpsc::UnboundedReceiver<EngineCommand>,
}

impl EngineHandle {
    /// Create the channel before the engine exists so the hub can hold a
    /// handle while the engine holds the hub.
    pub fn channel() -> (Self, EngineInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EngineInbox { rx })
    }

    /// Fire and forget
    pub fn dispatch(&self, action: TimerAction) -> Result<(), EngineStopped> {
        self.tx
            .send(EngineCommand::Action { action, reply: None })
            .map_err(|_| EngineStopped)
    }

    /// Apply an action and wait for the resulting state
    pub async fn apply(&self, action: TimerAction) -> Result<TimerSnapshot, EngineStopped> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Action {
                action,
                reply: Some(reply),
            })
            .map_err(|_| EngineStopped)?;
        rx.await.map_err(|_| EngineStopped)
    }

    pub async fn snapshot(&self) -> Result<TimerSnapshot, EngineStopped> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Snapshot(reply))
            .map_err(|_| EngineStopped)?;
        rx.await.map_err(|_| EngineStopped)
    }
}

#[cfg(test)]
impl EngineInbox {
    /// Pop a queued action without running an engine
    pub(crate) fn try_next_action(&mut self) -> Option<TimerAction> {
        match self.rx.try_recv().ok()? {
            EngineCommand::Action { action, .. } => Some(action),
            EngineCommand::Snapshot(_) => None,
        }
    }
}

/// Idle state derived from the user configuration
pub fn initial_snapshot(config: &AppConfig) -> TimerSnapshot {
    let duration = config.default_duration_sec().max(MIN_DURATION_SEC);
    let category = config.default_category();
    TimerSnapshot {
        state: TimerPhase::Idle,
        duration_sec: duration,
        remaining_sec: duration,
        session_name: category.clone(),
        category,
        language: config.default_language.clone(),
        session_type: config.default_session_type.clone(),
        started_at: None,
    }
}

pub struct TimerEngine {
    state: TimerSnapshot,
    ticker: Option<Interval>,
    recorder: Arc<SessionRecorder>,
    hub: Arc<BroadcastHub>,
}

impl TimerEngine {
    pub fn new(initial: TimerSnapshot, recorder: Arc<SessionRecorder>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            state: initial,
            ticker: None,
            recorder,
            hub,
        }
    }

    /// Serve until every [`EngineHandle`] is dropped
    pub async fn run(mut self, mut inbox: EngineInbox) {
        info!(
            "Timer engine ready: {}s {}",
            self.state.duration_sec, self.state.category
        );
        loop {
            tokio::select! {
                command = inbox.rx.recv() => match command {
                    Some(EngineCommand::Action { action, reply }) => {
                        self.handle(action).await;
                        if let Some(reply) = reply {
                            let _ = reply.send(self.state.clone());
                        }
                    }
                    Some(EngineCommand::Snapshot(reply)) => {
                        let _ = reply.send(self.state.clone());
                    }
                    None => break,
                },
                _ = next_tick(&mut self.ticker) => self.on_tick().await,
            }
        }
        debug!("Timer engine stopped");
    }

    async fn handle(&mut self, action: TimerAction) {
        debug!("Timer action {:?} in {:?}", action, self.state.state);
        let s = &mut self.state;
        match action {
            TimerAction::Start => {
                if s.state == TimerPhase::Idle {
                    s.state = TimerPhase::Running;
                    s.remaining_sec = s.duration_sec;
                    s.started_at = Some(Utc::now());
                    self.ticker = Some(ticker());
                }
            }
            TimerAction::Pause => {
                if s.state == TimerPhase::Running {
                    s.state = TimerPhase::Paused;
                    self.ticker = None;
                }
            }
            TimerAction::Resume => {
                if s.state == TimerPhase::Paused {
                    s.state = TimerPhase::Running;
                    self.ticker = Some(ticker());
                }
            }
            TimerAction::Reset => {
                self.ticker = None;
                s.state = TimerPhase::Idle;
                s.remaining_sec = s.duration_sec;
                s.started_at = None;
            }
            TimerAction::Finish => {
                if s.state != TimerPhase::Idle {
                    // completion publishes on its own
                    self.complete().await;
                    return;
                }
            }
            TimerAction::Add(delta) => {
                if s.state != TimerPhase::Idle {
                    let adjusted = (s.remaining_sec as i64).saturating_add(delta);
                    s.remaining_sec = adjusted.clamp(0, s.duration_sec as i64) as u64;
                }
            }
            TimerAction::SetDurationSec(secs) => {
                let duration = (secs.max(0) as u64).max(MIN_DURATION_SEC);
                s.duration_sec = duration;
                if s.state == TimerPhase::Idle {
                    s.remaining_sec = duration;
                } else {
                    s.remaining_sec = s.remaining_sec.min(duration);
                }
            }
            TimerAction::SetCategory(category) => {
                s.session_name = category.clone();
                s.category = category;
            }
            TimerAction::SetSessionName(name) => s.session_name = name,
            TimerAction::SetLanguage(language) => s.language = language,
            TimerAction::SetSessionType(kind) => s.session_type = kind,
        }
        self.publish_state().await;
    }

    async fn on_tick(&mut self) {
        if self.state.state != TimerPhase::Running {
            self.ticker = None;
            return;
        }
        self.state.remaining_sec = self.state.remaining_sec.saturating_sub(1);
        if self.state.remaining_sec == 0 {
            self.complete().await;
        } else {
            self.publish_state().await;
        }
    }

    async fn complete(&mut self) {
        self.ticker = None;
        let end = Utc::now();
        let start = self.state.started_at.unwrap_or(end);
        let fields = SessionFields {
            category: self.state.category.clone(),
            session_name: self.state.session_name.clone(),
            language: self.state.language.clone(),
            session_type: self.state.session_type.clone(),
        };

        let record = self.recorder.record(start, end, fields).await;

        self.state.state = TimerPhase::Idle;
        self.state.remaining_sec = self.state.duration_sec;
        self.state.started_at = None;
        self.publish_state().await;
        self.hub.publish(ServerMessage::SessionComplete(record)).await;
    }

    async fn publish_state(&self) {
        self.hub.publish_state(self.state.clone()).await;
    }
}

fn ticker() -> Interval {
    let mut interval = interval_at(Instant::now() + TICK, TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
