//! Hub WebSocket Server
//!
//! Network front end for the registry. Each connection is handled by its
//! own task; a bad frame or a dropped socket only affects that connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::hub::protocol::{ErrorCode, HubRequest, HubResponse};
use crate::hub::registry::{Hub, HubError};
use crate::shutdown::Shutdown;

/// Hub server errors.
#[derive(Debug, thiserror::Error)]
pub enum HubServerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Listener I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Serves the hub over WebSocket.
pub struct HubServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    listener: TcpListener,
    connections: Arc<AtomicUsize>,
    shutdown: Shutdown,
}

impl HubServer {
    /// Bind the listener. Fails if the address is unavailable.
    pub async fn bind(config: ServerConfig, hub: Arc<Hub>) -> Result<Self, HubServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| HubServerError::Bind { addr: config.bind_addr, source })?;

        Ok(Self {
            config,
            hub,
            listener,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown: Shutdown::new(),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, HubServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops [`HubServer::run`] from another task.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Accept connections until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), HubServerError> {
        info!("Hub v{} listening on {}", self.config.version, self.listener.local_addr()?);
        let mut shutdown = self.shutdown.listener();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connection_count() >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                Self::reject_overloaded(stream, addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.wait() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop accepting and close open connections.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let hub = self.hub.clone();
        let connections = self.connections.clone();
        let mut shutdown = self.shutdown.listener();

        connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    connections.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<HubResponse>(64);

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize response: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let request = match HubRequest::from_json(&text) {
                                    Ok(r) => r,
                                    Err(e) => {
                                        debug!("Invalid frame from {}: {}", addr, e);
                                        let _ = msg_tx.send(HubResponse::error(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                if let Some(response) = Self::handle_request(addr, request, &hub).await {
                                    if msg_tx.send(response).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(HubResponse::error(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                )).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.wait() => {
                        break;
                    }
                }
            }

            drop(msg_tx);
            let _ = sender_task.await;
            connections.fetch_sub(1, Ordering::Relaxed);
            debug!("Client {} cleaned up", addr);
        });
    }

    /// Complete the handshake, report `server_overloaded`, then close.
    fn reject_overloaded(stream: TcpStream, addr: SocketAddr) {
        tokio::spawn(async move {
            let mut ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("Handshake with rejected client {} failed: {}", addr, e);
                    return;
                }
            };

            let frame = HubResponse::error(ErrorCode::ServerOverloaded, "Connection limit reached");
            if let Ok(text) = frame.to_json() {
                let _ = ws.send(Message::Text(text)).await;
            }
            let _ = ws.close(None).await;
        });
    }

    /// Returns `None` for fire-and-forget requests.
    async fn handle_request(addr: SocketAddr, request: HubRequest, hub: &Hub) -> Option<HubResponse> {
        match request {
            HubRequest::Announce { record } => {
                if let Err(e) = hub.announce(record).await {
                    warn!("Dropped announce from {}: {}", addr, e);
                }
                None
            }
            HubRequest::Query { filter } => {
                let servers = hub.query(&filter.unwrap_or_default()).await;
                Some(HubResponse::Servers { servers })
            }
            HubRequest::LookupPlayer { player_id } => match hub.lookup_player(&player_id).await {
                Ok(lookup) => Some(HubResponse::Player(lookup)),
                Err(HubError::EmptyPlayerId) => {
                    Some(HubResponse::error(ErrorCode::BadRequest, "player_id must not be empty"))
                }
                Err(e) => Some(HubResponse::error(ErrorCode::InternalError, e.to_string())),
            },
            HubRequest::Ping { timestamp } => Some(HubResponse::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
            }),
        }
    }
}
