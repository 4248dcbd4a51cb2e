//! WebSocket transport for monitor links.
//!
//! Downlink streams are individual WebSocket connections to
//! `{base_url}/downlink`. Status and uplink frames share one event socket to
//! `{base_url}/events`, opened on first use and reopened after a failure or a
//! credential change. The credential travels as a bearer token.
//!
//! Every connect is bounded by a timeout. While the event socket is being
//! opened, other status and uplink sends fail at once instead of queueing
//! behind the handshake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use lora_proto::{
    DownlinkMessage, GatewayId, GatewayStatus, MonitorFrame, MonitorReply, UplinkMessage,
};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{MonitorError, Result};
use crate::transport::{AckSource, DownlinkSink, DownlinkStream, MonitorTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Path of the downlink stream endpoint.
pub const DOWNLINK_PATH: &str = "downlink";
/// Path of the status and uplink endpoint.
pub const EVENTS_PATH: &str = "events";
/// Default bound on opening a WebSocket, handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct EventSocket {
    token: String,
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

/// Clears the event socket's connecting flag when the connect ends or is
/// abandoned.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// JSON-over-WebSocket monitor transport.
pub struct WsMonitorTransport {
    base_url: String,
    connect_timeout: Duration,
    events: tokio::sync::Mutex<Option<EventSocket>>,
    events_connecting: AtomicBool,
}

impl WsMonitorTransport {
    /// Create a transport for the monitor at `base_url` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            events: tokio::sync::Mutex::new(None),
            events_connecting: AtomicBool::new(false),
        }
    }

    /// Set the bound on opening a connection.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Base URL of the monitor.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn connect(&self, url: &str, token: &str) -> Result<WsStream> {
        let mut request = url
            .into_client_request()
            .map_err(|e| MonitorError::Connect(format!("invalid monitor url '{url}': {e}")))?;

        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| MonitorError::Connect(format!("invalid token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| {
                MonitorError::Connect(format!(
                    "timed out after {}ms connecting to '{url}'",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| MonitorError::Connect(e.to_string()))?;
        Ok(ws)
    }

    async fn send_event(&self, token: &str, frame: &MonitorFrame) -> Result<()> {
        let json = frame.to_json()?;
        let mut socket = self.events.lock().await;

        let stale = socket
            .as_ref()
            .is_some_and(|s| s.token != token || s.reader.is_finished());
        if stale {
            if let Some(mut old) = socket.take() {
                old.reader.abort();
                let _ = timeout(self.connect_timeout, old.sink.close()).await;
            }
        }

        if socket.is_none() {
            if self.events_connecting.swap(true, Ordering::SeqCst) {
                return Err(MonitorError::Connect(
                    "event socket connect already in progress".to_string(),
                ));
            }
            let connecting = ConnectingGuard(&self.events_connecting);
            drop(socket);

            let ws = self.connect(&self.endpoint(EVENTS_PATH), token).await?;
            let (sink, mut read) = ws.split();
            // Replies on the event socket are not used; keep reading so
            // control frames are processed and closure is noticed.
            let reader = tokio::spawn(async move { while let Some(Ok(_)) = read.next().await {} });
            debug!(url = %self.base_url, "opened monitor event socket");

            socket = self.events.lock().await;
            *socket = Some(EventSocket {
                token: token.to_string(),
                sink,
                reader,
            });
            drop(connecting);
        }

        let Some(open) = socket.as_mut() else {
            return Err(MonitorError::StreamClosed);
        };
        let sent = open.sink.send(Message::text(json)).await;
        if let Err(e) = sent {
            if let Some(old) = socket.take() {
                old.reader.abort();
            }
            return Err(MonitorError::Stream(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MonitorTransport for WsMonitorTransport {
    async fn open_downlink_stream(&self, token: &str) -> Result<DownlinkStream> {
        let ws = self.connect(&self.endpoint(DOWNLINK_PATH), token).await?;
        let (sink, source) = ws.split();
        Ok(DownlinkStream {
            sink: Box::new(WsDownlinkSink { sink }),
            acks: Box::new(WsAckSource { source }),
        })
    }

    async fn send_status(
        &self,
        token: &str,
        gateway_id: &GatewayId,
        status: &GatewayStatus,
    ) -> Result<()> {
        let frame = MonitorFrame::Status {
            gateway_id: gateway_id.clone(),
            status: status.clone(),
        };
        self.send_event(token, &frame).await
    }

    async fn send_uplink(&self, token: &str, uplink: &UplinkMessage) -> Result<()> {
        let frame = MonitorFrame::Uplink {
            uplink: uplink.clone(),
        };
        self.send_event(token, &frame).await
    }
}

struct WsDownlinkSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl DownlinkSink for WsDownlinkSink {
    async fn send(&mut self, downlink: &DownlinkMessage) -> Result<()> {
        let json = MonitorFrame::Downlink {
            downlink: downlink.clone(),
        }
        .to_json()?;
        self.sink
            .send(Message::text(json))
            .await
            .map_err(|e| MonitorError::Stream(e.to_string()))
    }

    async fn close_send(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| MonitorError::Stream(e.to_string()))
    }
}

struct WsAckSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl AckSource for WsAckSource {
    async fn recv(&mut self) -> Result<MonitorReply> {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Text(text))) => match MonitorReply::from_json(&text) {
                    Ok(reply) => return Ok(reply),
                    Err(e) => warn!(error = %e, "failed to parse monitor reply"),
                },
                Some(Ok(Message::Close(_))) | None => return Err(MonitorError::StreamClosed),
                Some(Err(e)) => return Err(MonitorError::Stream(e.to_string())),
                // Ping, Pong and Binary frames carry no replies.
                Some(Ok(_)) => {}
            }
        }
    }
}
