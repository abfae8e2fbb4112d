//! Side effects of timer events: light blink, desktop notification and
//! category colors
//!
//! Runs as one more hub subscriber, reading the same frames observers get.
//! Device work is spawned so a slow queue never backs up the frame stream.

use animatek_ipc::{ServerMessage, SessionRecord};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::devices::Fleet;
use crate::hub::BroadcastHub;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReactorSettings {
    pub blink_on_complete: bool,
    pub category_lights: bool,
    pub notify_on_complete: bool,
}

pub async fn run(hub: Arc<BroadcastHub>, fleet: Arc<Fleet>, settings: ReactorSettings) {
    let mut subscription = hub.subscribe().await;
    let mut last_category: Option<String> = None;

    while let Some(frame) = subscription.rx.recv().await {
        let message: ServerMessage = match serde_json::from_str(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Reactor could not read frame: {}", e);
                continue;
            }
        };

        match message {
            ServerMessage::SessionComplete(record) => {
                if settings.blink_on_complete {
                    let fleet = fleet.clone();
                    tokio::spawn(async move {
                        if let Err(e) = fleet.blink().await {
                            warn!("Completion blink failed: {}", e);
                        }
                    });
                }
                if settings.notify_on_complete {
                    tokio::task::spawn_blocking(move || notify_completion(&record));
                }
            }
            ServerMessage::State(snapshot) => {
                let changed = last_category
                    .as_ref()
                    .is_some_and(|previous| *previous != snapshot.category);
                if changed && settings.category_lights {
                    let fleet = fleet.clone();
                    let category = snapshot.category.clone();
                    tokio::spawn(async move {
                        match fleet.apply_category_color(&category).await {
                            Ok(true) => info!("Lights set for category {}", category),
                            Ok(false) => debug!("No color for category {}", category),
                            Err(e) => warn!("Category lights failed: {}", e),
                        }
                    });
                }
                last_category = Some(snapshot.category);
            }
            ServerMessage::ConfigUpdate(_) => {}
        }
    }
    hub.unsubscribe(subscription.id).await;
}

fn notify_completion(record: &SessionRecord) {
    if let Err(e) = notify_rust::Notification::new()
        .summary("Session complete")
        .body(&format!("{} · {} min", record.category, record.duration_min))
        .appname("animatek")
        .show()
    {
        warn!("Failed to send notification: {}", e);
    }
}
