//! WebSocket listener for observers (dashboard, overlay, keypad, bot)
//!
//! Messages (server → observer): `state`, `session:complete`, `config:update`
//! Messages (observer → server): `command` with `action` and `payload`

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::hub::BroadcastHub;

/// A frame that cannot be written in this long means the peer is gone
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn serve(addr: SocketAddr, hub: Arc<BroadcastHub>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind WebSocket listener on {addr}"))?;
    info!("WebSocket listening on ws://{}", addr);
    accept_loop(listener, hub).await
}

pub async fn accept_loop(listener: TcpListener, hub: Arc<BroadcastHub>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, hub).await {
                        warn!("Observer {} error: {}", peer, e);
                    }
                });
            }
            Err(e) => error!("Error accepting observer: {}", e),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<BroadcastHub>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut sender, mut receiver) = ws.split();
    let mut subscription = hub.subscribe().await;
    debug!("Observer {} is subscriber {}", peer, subscription.id);

    loop {
        tokio::select! {
            frame = subscription.rx.recv() => {
                let Some(frame) = frame else { break };
                match timeout(SEND_TIMEOUT, sender.send(WsMessage::Text(frame.to_string()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break,
                    Err(_) => {
                        warn!("Observer {} stopped reading, closing", peer);
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => hub.handle_inbound(&text),
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer, e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    hub.unsubscribe(subscription.id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHandle;
    use animatek_ipc::{ServerMessage, TimerAction, TimerPhase, TimerSnapshot};

    fn idle() -> TimerSnapshot {
        TimerSnapshot {
            state: TimerPhase::Idle,
            duration_sec: 5400,
            remaining_sec: 5400,
            category: "General".to_string(),
            session_name: "General".to_string(),
            language: "ES".to_string(),
            session_type: "privada".to_string(),
            started_at: None,
        }
    }

    #[tokio::test]
    async fn test_observer_round_trip() {
        let (engine, mut inbox) = EngineHandle::channel();
        let hub = Arc::new(BroadcastHub::new(idle(), engine));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(accept_loop(listener, hub.clone()));

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();

        let first = client.next().await.unwrap().unwrap();
        let msg: ServerMessage = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(msg, ServerMessage::State(idle()));

        client
            .send(WsMessage::Text(
                r#"{"type":"command","action":"start"}"#.to_string(),
            ))
            .await
            .unwrap();

        let mut forwarded = None;
        for _ in 0..50 {
            if let Some(action) = inbox.try_next_action() {
                forwarded = Some(action);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(forwarded, Some(TimerAction::Start));

        client.close(None).await.unwrap();
        for _ in 0..50 {
            if hub.subscriber_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
