use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::{Duration, sleep};

use rand::random_range;

use crate::error::SinkError;

use super::alert::{Alert, AlertSink};

const QUEUE_CAPACITY: usize = 1_000;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// ============================================================
/// AlertConnection
/// ============================================================
///
/// A **single persistent WebSocket connection** to the operator
/// service.
///
/// Responsibilities:
/// - Perform login handshake
/// - Send queued alerts as JSON text frames
/// - Send periodic JSON pings
/// - Reconnect automatically after connection loss
///
/// Alerts are best-effort: a full or disconnected queue rejects
/// the alert instead of blocking the pipeline.
#[derive(Clone)]
struct AlertConnection {
    /// Replaced on every reconnect.
    queue: Arc<Mutex<mpsc::Sender<Value>>>,
}

impl AlertConnection {
    /// Spawns the reconnect loop and returns immediately.
    fn spawn(url: String, login_msg: String, debug: bool) -> Self {
        // Placeholder queue until the first connection attempt installs one
        let (tx, _) = mpsc::channel::<Value>(1);
        let queue = Arc::new(Mutex::new(tx));

        tokio::spawn({
            let queue = queue.clone();

            async move {
                loop {
                    let (tx, rx) = mpsc::channel::<Value>(QUEUE_CAPACITY);
                    {
                        let mut q = queue.lock().await;
                        *q = tx;
                    }

                    if let Err(e) = Self::run_connection(&url, &login_msg, debug, rx).await {
                        warn!("Alert forwarder connection lost: {}", e);
                    }

                    sleep(RECONNECT_DELAY).await;
                }
            }
        });

        Self { queue }
    }

    /// Runs one connection until it closes or errors.
    async fn run_connection(
        url: &str,
        login_msg: &str,
        debug: bool,
        mut rx: mpsc::Receiver<Value>,
    ) -> anyhow::Result<()> {
        let (ws, _) = connect_async(url).await?;
        let (mut write, mut read) = ws.split();
        let closed = Arc::new(Notify::new());

        write.send(Message::Text(login_msg.to_string().into())).await?;
        info!("Alert forwarder connected to {}", url);

        let mut ping = tokio::time::interval(PING_INTERVAL);

        // Reader: drains replies and reports EOF to the writer
        tokio::spawn({
            let closed = closed.clone();

            async move {
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Text(text) = msg {
                        if debug {
                            debug!("[Alert RECV] {}", text);
                        }
                    }
                }
                closed.notify_one();
            }
        });

        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let json = serde_json::to_string(&msg)?;
                    if debug {
                        debug!("[Alert SEND] {}", json);
                    }
                    write.send(Message::Text(json.into())).await?;
                }

                _ = ping.tick() => {
                    write.send(Message::Text(r#"{"op":"ping"}"#.into())).await?;
                }

                _ = closed.notified() => {
                    return Err(anyhow::anyhow!("operator service closed connection"));
                }
            }
        }
    }

    async fn enqueue(&self, msg: Value) -> Result<(), SinkError> {
        let tx = self.queue.lock().await;
        match tx.try_send(msg) {
            Ok(_) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(SinkError::Backend("alert queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SinkError::Backend("alert forwarder disconnected".into()))
            }
        }
    }
}

/// ============================================================
/// WsAlertSink
/// ============================================================
///
/// Pool of `AlertConnection`s forwarding alerts to an operator
/// service.
///
/// LOGIN FORMAT:
/// - key=<API_KEY>&role=pipeline
///
/// DEMO MODE:
/// - No network connections
/// - Alerts are only logged
pub struct WsAlertSink {
    connections: Vec<AlertConnection>,
    demo: bool,
}

impl WsAlertSink {
    pub fn new(url: &str, key: &str, count: usize, debug: bool, demo: bool) -> Self {
        if demo {
            warn!("Alert forwarder running in DEMO mode");
        }

        let connections = if demo {
            Vec::new()
        } else {
            let login = format!("key={}&role=pipeline", key);
            (0..count.max(1))
                .map(|_| AlertConnection::spawn(url.to_string(), login.clone(), debug))
                .collect()
        };

        Self { connections, demo }
    }
}

#[async_trait::async_trait]
impl AlertSink for WsAlertSink {
    /// Tries up to three randomly chosen connections.
    async fn raise(&self, alert: &Alert) -> Result<(), SinkError> {
        let msg = serde_json::json!({ "op": "alert", "data": alert });

        if self.demo || self.connections.is_empty() {
            info!("DEMO alert -> {}", serde_json::to_string(&msg)?);
            return Ok(());
        }

        let mut last_err = None;
        for _ in 0..3 {
            let idx = random_range(0..self.connections.len());
            match self.connections[idx].enqueue(msg.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
            sleep(Duration::from_millis(100)).await;
        }

        Err(last_err.unwrap_or_else(|| SinkError::Backend("no alert connection".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::alert::{AlertKind, Severity};

    #[tokio::test]
    async fn test_demo_mode_accepts_without_network() {
        let sink = WsAlertSink::new("ws://127.0.0.1:1", "secret", 2, false, true);
        let alert = Alert::new(
            AlertKind::Staleness,
            Severity::Medium,
            "stale",
            "collector stale",
            serde_json::json!({ "collector": "league" }),
        );
        assert!(sink.raise(&alert).await.is_ok());
    }
}
