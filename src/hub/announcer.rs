//! Server Announcer
//!
//! Runs inside a game server process. Keeps one WebSocket connection to the
//! hub open and pushes the server's record on a fixed interval, reconnecting
//! after failures.

use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::AnnouncerConfig;
use crate::hub::protocol::HubRequest;
use crate::hub::registry::ServerRecord;
use crate::shutdown::{Shutdown, ShutdownListener};

/// Why a connection attempt ended.
enum SessionEnd {
    Stopped,
    Failed(String),
}

/// Periodic announcer for one game server.
pub struct Announcer {
    record: Arc<RwLock<ServerRecord>>,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl Announcer {
    /// Start announcing `record` to the hub.
    pub fn spawn(config: AnnouncerConfig, record: ServerRecord) -> Self {
        let record = Arc::new(RwLock::new(record));
        let shutdown = Shutdown::new();

        let task = tokio::spawn(Self::run(config, record.clone(), shutdown.listener()));

        Self { record, shutdown, task }
    }

    /// Mutate the announced record; the change goes out with the next tick.
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ServerRecord),
    {
        let mut record = self.record.write().await;
        f(&mut record);
    }

    /// Snapshot of the record being announced.
    pub async fn record(&self) -> ServerRecord {
        self.record.read().await.clone()
    }

    /// Stop after the in-flight announcement and wait for the loop to end.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.task.await;
    }

    async fn run(config: AnnouncerConfig, record: Arc<RwLock<ServerRecord>>, mut shutdown: ShutdownListener) {
        loop {
            match Self::session(&config, &record, &mut shutdown).await {
                SessionEnd::Stopped => break,
                SessionEnd::Failed(reason) => {
                    warn!("Announcer lost hub {}: {}", config.hub_url, reason);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(config.interval) => {}
                _ = shutdown.wait() => break,
            }
        }

        debug!("Announcer for {} stopped", config.hub_url);
    }

    /// One connection lifetime: connect, then announce every interval.
    async fn session(
        config: &AnnouncerConfig,
        record: &RwLock<ServerRecord>,
        shutdown: &mut ShutdownListener,
    ) -> SessionEnd {
        let connect = tokio::select! {
            result = connect_async(config.hub_url.as_str()) => result,
            _ = shutdown.wait() => return SessionEnd::Stopped,
        };
        let (ws, _) = match connect {
            Ok(conn) => conn,
            Err(e) => return SessionEnd::Failed(e.to_string()),
        };
        info!("Announcer connected to {}", config.hub_url);

        let (mut write, mut read) = ws.split();
        let mut ticker = interval(config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = HubRequest::Announce { record: record.read().await.clone() };
                    let text = match frame.to_json() {
                        Ok(t) => t,
                        Err(e) => return SessionEnd::Failed(e.to_string()),
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return SessionEnd::Failed(e.to_string());
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Failed("connection closed".to_string());
                        }
                        Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                        // Announcements have no responses; anything else is noise.
                        Some(Ok(_)) => {}
                    }
                }
                _ = shutdown.wait() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
            }
        }
    }
}
