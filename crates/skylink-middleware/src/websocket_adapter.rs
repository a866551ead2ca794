//! WebSocket transport.
//!
//! [`WebSocketAdapter`] speaks JSON text frames to a drone-side WebSocket
//! server:
//!
//! * **Outbound** – `{"type":"command","command":{…}}`
//! * **Inbound** – `{"type":"telemetry","telemetry":{…}}`
//!
//! Frames of any other shape are counted and ignored.  Socket errors end up
//! in the adapter's [`ConnectionHealth`], never as panics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{BoxStream, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use skylink_types::{
    Command, ConnectionHealth, ConnectionStatus, LinkError, ProtocolType, Telemetry,
};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::adapter::{HealthSource, ProtocolAdapter};
use crate::bus::Broadcaster;
use crate::health::HealthTracker;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One JSON frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireFrame {
    Command { command: Command },
    Telemetry { telemetry: Telemetry },
}

impl WireFrame {
    pub fn encode(&self) -> Result<String, LinkError> {
        serde_json::to_string(self).map_err(|e| LinkError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, LinkError> {
        serde_json::from_str(text).map_err(|e| LinkError::Serialization(e.to_string()))
    }
}

struct Shared {
    connected: AtomicBool,
    telemetry: Broadcaster<Telemetry>,
    health: HealthTracker,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    frames_rejected: AtomicU64,
}

pub struct WebSocketAdapter {
    shared: Arc<Shared>,
    sink: tokio::sync::Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    url: Mutex<Option<String>>,
}

impl Default for WebSocketAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketAdapter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                telemetry: Broadcaster::with_default_capacity("ws-telemetry"),
                health: HealthTracker::new("ws-health"),
                frames_in: AtomicU64::new(0),
                frames_out: AtomicU64::new(0),
                frames_rejected: AtomicU64::new(0),
            }),
            sink: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            url: Mutex::new(None),
        }
    }

    fn stop_reader(&self) {
        if let Some(handle) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut source: SplitStream<WsStream>) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match WireFrame::decode(text.as_str()) {
                Ok(WireFrame::Telemetry { telemetry }) => {
                    shared.frames_in.fetch_add(1, Ordering::Relaxed);
                    shared.health.message_received();
                    shared.telemetry.publish(telemetry);
                }
                Ok(WireFrame::Command { .. }) => {
                    shared.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    debug!("ignoring command frame from drone side");
                }
                Err(e) => {
                    shared.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    shared.health.record_error(format!("bad frame: {e}"));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket receive error");
                shared.health.record_error(format!("receive error: {e}"));
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    shared.health.set_status(ConnectionStatus::Disconnected);
}

impl HealthSource for WebSocketAdapter {
    fn health_snapshot(&self) -> ConnectionHealth {
        self.shared.health.snapshot()
    }
}

#[async_trait]
impl ProtocolAdapter for WebSocketAdapter {
    async fn connect(&self, target: &str) -> Result<(), LinkError> {
        let (stream, _response) = connect_async(target).await.map_err(|e| {
            let details = format!("{target}: {e}");
            self.shared.health.record_error(details.clone());
            LinkError::Connection {
                protocol: ProtocolType::WebSocket,
                details,
            }
        })?;

        self.stop_reader();
        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);
        *self.url.lock().unwrap_or_else(PoisonError::into_inner) = Some(target.to_string());
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.health.set_status(ConnectionStatus::Connected);

        let handle = tokio::spawn(read_loop(Arc::clone(&self.shared), source));
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!(url = target, "websocket connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.stop_reader();
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.health.set_status(ConnectionStatus::Disconnected);
        }
    }

    async fn send_command(&self, command: &Command) -> bool {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return false;
        }
        let frame = match (WireFrame::Command {
            command: command.clone(),
        })
        .encode()
        {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.health.record_error(e.to_string());
                return false;
            }
        };

        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return false;
        };
        match sink.send(Message::Text(frame.into())).await {
            Ok(()) => {
                self.shared.frames_out.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(command_id = %command.id(), error = %e, "websocket send failed");
                self.shared.health.record_error(format!("send error: {e}"));
                false
            }
        }
    }

    fn telemetry_stream(&self) -> BoxStream<'static, Telemetry> {
        self.shared.telemetry.stream()
    }

    fn health_stream(&self) -> BoxStream<'static, ConnectionHealth> {
        self.shared.health.stream()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::WebSocket
    }

    fn diagnostics(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("kind".to_string(), "websocket".to_string());
        if let Some(url) = self.url.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            map.insert("url".to_string(), url);
        }
        for (key, counter) in [
            ("frames_in", &self.shared.frames_in),
            ("frames_out", &self.shared.frames_out),
            ("frames_rejected", &self.shared.frames_rejected),
        ] {
            map.insert(key.to_string(), counter.load(Ordering::Relaxed).to_string());
        }
        map
    }
}
