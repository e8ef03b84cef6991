//! # Push Client
//!
//! Maintains one long-lived WebSocket channel to the control plane. The
//! remote side pushes full `config_snapshot` documents; each one is run
//! through the store and answered with `ack` or `nack`. The client never
//! polls. Connection loss triggers reconnection with exponential backoff,
//! and a shutdown signal closes the channel cleanly and stops reconnecting.
//!
//! `try_replace` is synchronous, so no lock is ever held across an await
//! point in the dispatch path.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::errors::{ControlPlaneError, ControlPlaneResult};
use super::protocol::{self, DataPlaneMessage, Inbound};
use crate::config::{ConfigSource, ConfigStore};
use crate::observability::Logger;

/// First reconnect delay.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Why a connected session ended.
enum SessionEnd {
    /// The channel dropped; reconnect
    Disconnected,
    /// Shutdown was requested; stop
    Shutdown,
}

/// The resilient push channel client.
pub struct PushClient {
    url: String,
    backoff_base: Duration,
    backoff_cap: Duration,
    store: Arc<ConfigStore>,
}

/// Doubling backoff with a ceiling.
fn next_backoff(current: Duration, cap: Duration) -> Duration {
    (current * 2).min(cap)
}

impl PushClient {
    /// Create a client for the given control plane endpoint.
    pub fn new(url: String, store: Arc<ConfigStore>) -> Self {
        Self {
            url,
            backoff_base: BACKOFF_BASE,
            backoff_cap: BACKOFF_CAP,
            store,
        }
    }

    /// Override the backoff schedule.
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = self.backoff_base;

        loop {
            tokio::select! {
                connect_result = connect_async(self.url.as_str()) => {
                    match connect_result {
                        Ok((ws, _)) => {
                            backoff = self.backoff_base;
                            Logger::info("CONTROL_PLANE_CONNECTED", &[("url", &self.url)]);

                            match self.serve(ws, &mut shutdown).await {
                                SessionEnd::Shutdown => {
                                    Logger::info("CONTROL_PLANE_STOPPED", &[("url", &self.url)]);
                                    return;
                                }
                                SessionEnd::Disconnected => {
                                    Logger::warn(
                                        "CONTROL_PLANE_DISCONNECTED",
                                        &[
                                            ("url", &self.url),
                                            ("retry_in_ms", &backoff.as_millis().to_string()),
                                        ],
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            Logger::warn(
                                "CONTROL_PLANE_CONNECT_FAILED",
                                &[
                                    ("url", &self.url),
                                    ("error", &e.to_string()),
                                    ("retry_in_ms", &backoff.as_millis().to_string()),
                                ],
                            );
                        }
                    }
                }
                _ = shutdown.recv() => {
                    Logger::info("CONTROL_PLANE_STOPPED", &[("url", &self.url)]);
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.recv() => {
                    Logger::info("CONTROL_PLANE_STOPPED", &[("url", &self.url)]);
                    return;
                }
            }
            backoff = next_backoff(backoff, self.backoff_cap);
        }
    }

    /// Serve one connected session until it drops or shutdown fires.
    async fn serve(&self, ws: WsStream, shutdown: &mut broadcast::Receiver<()>) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_frame(&text, &mut sink).await.is_err() {
                                return SessionEnd::Disconnected;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if sink.send(Message::Pong(payload)).await.is_err() {
                                return SessionEnd::Disconnected;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Disconnected;
                        }
                        Some(Err(e)) => {
                            Logger::warn(
                                "CONTROL_PLANE_RECEIVE_FAILED",
                                &[("url", &self.url), ("error", &e.to_string())],
                            );
                            return SessionEnd::Disconnected;
                        }
                        Some(Ok(_)) => {}
                    }
                }
                _ = shutdown.recv() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Dispatch one inbound text frame and send the reply, if any.
    async fn handle_frame(&self, text: &str, sink: &mut WsSink) -> ControlPlaneResult<()> {
        match protocol::parse_inbound(text) {
            Ok(Inbound::ConfigSnapshot(document)) => {
                let version = document.version.clone();
                let reply = match self.store.try_replace(&document, ConfigSource::ControlPlane) {
                    Ok(event) => {
                        Logger::info(
                            "CONTROL_PLANE_SNAPSHOT_APPLIED",
                            &[
                                ("old_version", &event.old_version),
                                ("new_version", &event.new_version),
                            ],
                        );
                        DataPlaneMessage::Ack { version }
                    }
                    Err(e) => {
                        Logger::error(
                            "CONTROL_PLANE_SNAPSHOT_REJECTED",
                            &[("version", &version), ("error", &e.to_string())],
                        );
                        DataPlaneMessage::Nack {
                            version,
                            error: e.to_string(),
                        }
                    }
                };
                self.send(sink, reply).await
            }
            Ok(Inbound::Unknown(message_type)) => {
                Logger::warn(
                    "CONTROL_PLANE_UNKNOWN_MESSAGE",
                    &[("type", &message_type)],
                );
                Ok(())
            }
            Err(ControlPlaneError::MalformedSnapshot { version, reason }) => {
                Logger::error(
                    "CONTROL_PLANE_SNAPSHOT_REJECTED",
                    &[("version", &version), ("error", &reason)],
                );
                self.send(sink, DataPlaneMessage::Nack { version, error: reason })
                    .await
            }
            Err(e) => {
                Logger::warn(
                    "CONTROL_PLANE_INVALID_MESSAGE",
                    &[("error", &e.to_string())],
                );
                Ok(())
            }
        }
    }

    async fn send(&self, sink: &mut WsSink, message: DataPlaneMessage) -> ControlPlaneResult<()> {
        let json = message.to_json()?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| ControlPlaneError::Send(e.to_string()))
    }
}
