//! Fan-out of timer state to every connected observer
//!
//! Each subscriber owns a small bounded channel of pre-serialized frames.
//! The transport task on the other end (see `ws`) drains it at its own pace,
//! so a slow or broken socket never holds up `publish`. A subscriber whose
//! channel is closed, or full because it stopped reading, is dropped on the
//! next publish.

use animatek_ipc::{ClientMessage, ServerMessage, TimerAction, TimerSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::engine::EngineHandle;

pub type SubscriberId = u64;

/// Frames buffered per observer before it counts as stalled
pub const SUBSCRIBER_BACKLOG: usize = 32;

/// Frames for one observer, starting with the current state
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: Receiver<Arc<str>>,
}

struct Subscribers {
    snapshot: TimerSnapshot,
    senders: HashMap<SubscriberId, Sender<Arc<str>>>,
    next_id: SubscriberId,
}

pub struct BroadcastHub {
    inner: Mutex<Subscribers>,
    engine: EngineHandle,
}

impl BroadcastHub {
    pub fn new(initial: TimerSnapshot, engine: EngineHandle) -> Self {
        Self {
            inner: Mutex::new(Subscribers {
                snapshot: initial,
                senders: HashMap::new(),
                next_id: 1,
            }),
            engine,
        }
    }

    /// Register an observer. The snapshot is queued under the same lock that
    /// publish takes, so it can never arrive after a newer state.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BACKLOG);
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;

        match ServerMessage::State(inner.snapshot.clone()).to_json() {
            Ok(json) => {
                let _ = tx.try_send(Arc::from(json));
            }
            Err(e) => error!("Failed to serialize snapshot: {}", e),
        }
        inner.senders.insert(id, tx);
        info!("Observer {} connected. Total: {}", id, inner.senders.len());
        Subscription { id, rx }
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut inner = self.inner.lock().await;
        if inner.senders.remove(&id).is_some() {
            info!("Observer {} disconnected. Remaining: {}", id, inner.senders.len());
        }
    }

    pub async fn publish_state(&self, snapshot: TimerSnapshot) {
        self.publish(ServerMessage::State(snapshot)).await;
    }

    /// Serialize once, deliver to everyone, forget the ones that are gone
    pub async fn publish(&self, message: ServerMessage) {
        let json: Arc<str> = match message.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!("Failed to serialize broadcast: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        if let ServerMessage::State(snapshot) = message {
            inner.snapshot = snapshot;
        }
        inner.senders.retain(|id, tx| match tx.try_send(json.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Dropping observer {}: not reading", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Dropping observer {}: connection gone", id);
                false
            }
        });
    }

    /// Handle one text frame from an observer. Anything other than a
    /// well-formed command is ignored.
    pub fn handle_inbound(&self, raw: &str) {
        let message: ClientMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring inbound frame: {}", e);
                return;
            }
        };
        match message.into_action() {
            Some(action) => self.forward(action),
            None => debug!("Ignoring command with unknown action or payload"),
        }
    }

    pub fn forward(&self, action: TimerAction) {
        if let Err(e) = self.engine.dispatch(action) {
            error!("Could not forward action: {}", e);
        }
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.senders.len()
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animatek_ipc::TimerPhase;

    fn snapshot(remaining: u64) -> TimerSnapshot {
        TimerSnapshot {
            state: TimerPhase::Running,
            duration_sec: 5400,
            remaining_sec: remaining,
            category: "Digitakt".to_string(),
            session_name: "Digitakt".to_string(),
            language: "ES".to_string(),
            session_type: "privada".to_string(),
            started_at: None,
        }
    }

    fn hub() -> (BroadcastHub, crate::engine::EngineInbox) {
        let (engine, inbox) = EngineHandle::channel();
        (BroadcastHub::new(snapshot(5400), engine), inbox)
    }

    fn state_of(raw: &str) -> TimerSnapshot {
        match serde_json::from_str(raw).unwrap() {
            ServerMessage::State(s) => s,
            other => panic!("expected state frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_joiner_gets_last_state() {
        let (hub, _inbox) = hub();
        for remaining in [5399, 5398, 5397] {
            hub.publish_state(snapshot(remaining)).await;
        }
        let mut sub = hub.subscribe().await;
        let first = sub.rx.recv().await.unwrap();
        assert_eq!(state_of(&first), snapshot(5397));
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_subscriber_does_not_block_others() {
        let (hub, _inbox) = hub();
        let dead = hub.subscribe().await;
        let mut alive = hub.subscribe().await;
        drop(dead.rx);
        assert_eq!(hub.subscriber_count().await, 2);

        hub.publish_state(snapshot(100)).await;

        assert_eq!(hub.subscriber_count().await, 1);
        alive.rx.recv().await.unwrap();
        assert_eq!(state_of(&alive.rx.recv().await.unwrap()).remaining_sec, 100);
    }

    #[tokio::test]
    async fn test_inbound_commands_are_forwarded() {
        let (engine, mut inbox) = EngineHandle::channel();
        let hub = BroadcastHub::new(snapshot(5400), engine);

        hub.handle_inbound(r#"{"type":"command","action":"setDurationSec","payload":"3600"}"#);
        hub.handle_inbound(r#"{"type":"hello"}"#);
        hub.handle_inbound("not json");
        hub.handle_inbound(r#"{"type":"command","action":"explode"}"#);
        hub.handle_inbound(r#"{"type":"command","action":"pause"}"#);

        let mut forwarded = Vec::new();
        while let Some(action) = inbox.try_next_action() {
            forwarded.push(action);
        }
        assert_eq!(
            forwarded,
            vec![TimerAction::SetDurationSec(3600), TimerAction::Pause]
        );
    }

    #[tokio::test]
    async fn test_stalled_subscriber_is_dropped() {
        let (hub, _inbox) = hub();
        let mut stalled = hub.subscribe().await;
        let mut reader = hub.subscribe().await;

        for remaining in (0..5000).rev() {
            hub.publish_state(snapshot(remaining)).await;
            while reader.rx.try_recv().is_ok() {}
        }

        assert_eq!(hub.subscriber_count().await, 1);
        let mut backlog = 0;
        while stalled.rx.try_recv().is_ok() {
            backlog += 1;
        }
        assert_eq!(backlog, SUBSCRIBER_BACKLOG);
        assert!(stalled.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (hub, _inbox) = hub();
        let sub = hub.subscribe().await;
        hub.unsubscribe(sub.id).await;
        hub.unsubscribe(sub.id).await;
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
