use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use super::{Device, DeviceApi, DeviceError, Operation, QueuedCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Minimum spacing between two dispatches, across all devices
    pub min_gap: Duration,
    /// Throttled commands are re-sent at most this many times
    pub max_retries: u32,
    /// Backoff when the throttling body carries no "<N> second" hint
    pub fallback_wait: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            min_gap: Duration::from_millis(6200),
            max_retries: 2,
            fallback_wait: Duration::from_secs(30),
        }
    }
}

static WAIT_HINT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*second").ok());

struct Job {
    command: QueuedCommand,
    reply: oneshot::Sender<Result<Value, DeviceError>>,
}

/// Global FIFO for device commands, consumed by a single worker task
///
/// Commands are never cancelled once enqueued; dropping the future returned
/// by [`CommandQueue::enqueue`] only discards the result.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl CommandQueue {
    pub fn spawn(api: Arc<dyn DeviceApi>, settings: QueueSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(api, settings, rx));
        Self { tx }
    }

    pub async fn enqueue(&self, target: Device, operation: Operation) -> Result<Value, DeviceError> {
        let (reply, rx) = oneshot::channel();
        let command = QueuedCommand {
            target,
            operation,
            attempt: 0,
        };
        self.tx
            .send(Job { command, reply })
            .map_err(|_| DeviceError::QueueClosed)?;
        rx.await.map_err(|_| DeviceError::QueueClosed)?
    }
}

async fn run_worker(
    api: Arc<dyn DeviceApi>,
    settings: QueueSettings,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    let mut last_dispatch: Option<Instant> = None;

    while let Some(Job { mut command, reply }) = rx.recv().await {
        let result = loop {
            if let Some(last) = last_dispatch {
                sleep_until(last + settings.min_gap).await;
            }
            let dispatched_at = Instant::now();
            debug!(
                "Dispatching {:?} to {} (attempt {})",
                command.operation, command.target.key, command.attempt
            );

            let outcome = api.dispatch(&command).await;
            // Nothing went over the wire without an API key
            if !matches!(outcome, Err(DeviceError::NotConfigured)) {
                last_dispatch = Some(dispatched_at);
            }

            match outcome {
                Err(DeviceError::Throttled { body }) => {
                    if command.attempt >= settings.max_retries {
                        break Err(DeviceError::RetriesExhausted {
                            attempts: command.attempt + 1,
                            body,
                        });
                    }
                    let wait = suggested_wait(&body).unwrap_or(settings.fallback_wait);
                    warn!(
                        "Device API throttled, retrying in {}s (attempt {}/{})",
                        wait.as_secs(),
                        command.attempt + 1,
                        settings.max_retries
                    );
                    sleep(wait).await;
                    command.attempt += 1;
                }
                other => break other,
            }
        };

        // The caller may have stopped waiting; the command still ran.
        let _ = reply.send(result);
    }
    debug!("Command queue worker stopped");
}

/// Parse "<N> second(s)" out of a throttling body; waits one extra second
fn suggested_wait(body: &str) -> Option<Duration> {
    let secs: u64 = WAIT_HINT.as_ref()?.captures(body)?.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs(secs + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records dispatch times and replays scripted outcomes
    struct ScriptedApi {
        calls: Mutex<Vec<(Instant, QueuedCommand)>>,
        script: Mutex<VecDeque<Result<Value, DeviceError>>>,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<Value, DeviceError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
            })
        }

        fn calls(&self) -> Vec<(Instant, QueuedCommand)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceApi for ScriptedApi {
        async fn dispatch(&self, command: &QueuedCommand) -> Result<Value, DeviceError> {
            self.calls.lock().unwrap().push((Instant::now(), command.clone()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Value::Null))
        }
    }

    fn device(key: &str) -> Device {
        Device {
            key: key.to_string(),
            id: format!("id-{key}"),
            model: "H6047".to_string(),
            name: key.to_string(),
        }
    }

    fn throttled(body: &str) -> Result<Value, DeviceError> {
        Err(DeviceError::Throttled { body: body.to_string() })
    }

    #[test]
    fn test_suggested_wait_parsing() {
        assert_eq!(
            suggested_wait("Too many requests, retry after 30 seconds"),
            Some(Duration::from_secs(31))
        );
        assert_eq!(suggested_wait("wait 5 Second"), Some(Duration::from_secs(6)));
        assert_eq!(suggested_wait("slow down"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_gap_across_devices() {
        let api = ScriptedApi::new(vec![]);
        let queue = CommandQueue::spawn(api.clone(), QueueSettings::default());

        let (a, b, c) = tokio::join!(
            queue.enqueue(device("estudio"), Operation::Power(true)),
            queue.enqueue(device("salon"), Operation::Power(true)),
            queue.enqueue(device("estudio"), Operation::Brightness(40)),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let calls = api.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1.target.key, "estudio");
        assert_eq!(calls[1].1.target.key, "salon");
        assert_eq!(calls[2].1.operation, Operation::Brightness(40));
        assert!(calls[1].0 - calls[0].0 >= Duration::from_millis(6200));
        assert!(calls[2].0 - calls[0].0 >= Duration::from_millis(2 * 6200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_uses_hinted_wait() {
        let api = ScriptedApi::new(vec![throttled("retry in 30 second"), Ok(Value::Null)]);
        let queue = CommandQueue::spawn(api.clone(), QueueSettings::default());

        queue
            .enqueue(device("estudio"), Operation::Power(false))
            .await
            .unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.attempt, 1);
        assert!(calls[1].0 - calls[0].0 >= Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_without_hint_uses_fallback() {
        let api = ScriptedApi::new(vec![throttled("nope"), Ok(Value::Null)]);
        let settings = QueueSettings {
            fallback_wait: Duration::from_secs(12),
            ..Default::default()
        };
        let queue = CommandQueue::spawn(api.clone(), settings);

        queue.enqueue(device("salon"), Operation::Status).await.unwrap();

        let calls = api.calls();
        assert!(calls[1].0 - calls[0].0 >= Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_propagates_failure() {
        let api = ScriptedApi::new(vec![
            throttled("1 second"),
            throttled("1 second"),
            throttled("1 second"),
            Ok(Value::Null),
        ]);
        let queue = CommandQueue::spawn(api.clone(), QueueSettings::default());

        let err = queue
            .enqueue(device("estudio"), Operation::Power(true))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(api.calls().len(), 3);

        // the queue keeps serving after a failure
        queue
            .enqueue(device("estudio"), Operation::Power(true))
            .await
            .unwrap();
        assert_eq!(api.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_does_not_consume_gap() {
        let api = ScriptedApi::new(vec![
            Err(DeviceError::NotConfigured),
            Err(DeviceError::NotConfigured),
            Err(DeviceError::NotConfigured),
        ]);
        let queue = CommandQueue::spawn(api.clone(), QueueSettings::default());
        let started = Instant::now();

        let (a, b, c) = tokio::join!(
            queue.enqueue(device("estudio"), Operation::Power(true)),
            queue.enqueue(device("salon"), Operation::Power(true)),
            queue.enqueue(device("estudio"), Operation::Status),
        );
        for result in [a, b, c] {
            assert!(matches!(result, Err(DeviceError::NotConfigured)));
        }
        assert!(Instant::now() - started < Duration::from_millis(6200));

        // the next real dispatch goes out right away too
        queue
            .enqueue(device("salon"), Operation::Power(false))
            .await
            .unwrap();
        let calls = api.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[3].0 - started < Duration::from_millis(6200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failures_are_not_retried() {
        let api = ScriptedApi::new(vec![Err(DeviceError::Status {
            status: 400,
            body: "bad model".to_string(),
        })]);
        let queue = CommandQueue::spawn(api.clone(), QueueSettings::default());

        let err = queue
            .enqueue(device("estudio"), Operation::Brightness(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Status { status: 400, .. }));
        assert_eq!(api.calls().len(), 1);
    }
}
