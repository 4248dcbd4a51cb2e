//! WebSocket transport integration tests.
//!
//! Runs monitor links over [`WsMonitorTransport`] against a mock monitor
//! server and checks endpoints, credentials and reconnection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lora_monitor::{
    BackoffConfig, LinkEvent, Monitor, MonitorError, MonitorLink, MonitorTransport,
    WsMonitorTransport,
};
use lora_proto::{DownlinkMessage, GatewayId, GatewayStatus, MonitorFrame, MonitorReply};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers - Mock Monitor Server
// ============================================================================

/// A connection accepted by the mock monitor.
struct Accepted {
    ws: WebSocketStream<TcpStream>,
    path: String,
    authorization: Option<String>,
}

/// A mock monitor server bound to an available port.
struct MockMonitor {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockMonitor {
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock monitor");
        let addr = listener.local_addr().expect("local addr");
        Self { listener, addr }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Accept one WebSocket connection, capturing its path and credential.
    async fn accept(&self) -> Accepted {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for connection")
            .expect("accept connection");

        let mut path = String::new();
        let mut authorization = None;
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            authorization = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        };
        let ws = accept_hdr_async(stream, callback)
            .await
            .expect("websocket handshake");

        Accepted {
            ws,
            path,
            authorization,
        }
    }
}

impl Accepted {
    /// Read the next frame from the router.
    async fn next_frame(&mut self) -> MonitorFrame {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection open")
                .expect("valid message");
            if let Message::Text(text) = msg {
                return MonitorFrame::from_json(&text).expect("valid frame");
            }
        }
    }

    async fn ack(&mut self) {
        let reply = MonitorReply::Ack.to_json().expect("encode reply");
        self.ws
            .send(Message::text(reply))
            .await
            .expect("send reply");
    }
}

/// Accepts TCP connections and never answers the WebSocket handshake.
/// Reports each accepted connection on the returned channel.
async fn silent_monitor() -> (String, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind silent monitor");
    let addr = listener.local_addr().expect("local addr");
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
            let _ = accepted_tx.send(());
        }
    });
    (format!("ws://{addr}"), accepted_rx)
}

fn gateway_id() -> GatewayId {
    GatewayId::parse("gw-1").expect("valid gateway id")
}

fn downlink(n: u8) -> DownlinkMessage {
    DownlinkMessage {
        gateway_id: gateway_id(),
        payload: vec![0x60, n],
        timestamp: 5_000_000 + u32::from(n),
        frequency: 869_525_000,
        power: 27,
    }
}

fn link_to(monitor: &MockMonitor) -> MonitorLink {
    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
    };
    MonitorLink::builder(
        "m1",
        gateway_id(),
        Arc::new(WsMonitorTransport::new(monitor.url())),
    )
    .backoff(Arc::new(backoff))
    .token("tok-A")
    .build()
}

async fn wait_for(events: &mut broadcast::Receiver<LinkEvent>, expected: &LinkEvent) {
    timeout(WAIT, async {
        loop {
            if events.recv().await.expect("event channel open") == *expected {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for link event");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_downlink_delivered_with_bearer_token() {
    let monitor = MockMonitor::new().await;
    let link = link_to(&monitor);

    link.enqueue(downlink(1)).expect("queued");
    let mut conn = monitor.accept().await;

    assert_eq!(conn.path, "/downlink");
    assert_eq!(conn.authorization.as_deref(), Some("Bearer tok-A"));
    assert_eq!(
        conn.next_frame().await,
        MonitorFrame::Downlink {
            downlink: downlink(1)
        }
    );
    conn.ack().await;

    link.close();
}

#[tokio::test]
async fn test_link_reconnects_after_server_drops_stream() {
    let monitor = MockMonitor::new().await;
    let link = link_to(&monitor);
    let mut events = link.subscribe();

    link.enqueue(downlink(1)).expect("queued");
    let mut first = monitor.accept().await;
    assert_eq!(
        first.next_frame().await,
        MonitorFrame::Downlink {
            downlink: downlink(1)
        }
    );

    wait_for(&mut events, &LinkEvent::Connected).await;

    drop(first);
    let mut second = monitor.accept().await;
    wait_for(&mut events, &LinkEvent::Connected).await;
    assert_eq!(second.path, "/downlink");

    link.enqueue(downlink(2)).expect("queued");
    assert_eq!(
        second.next_frame().await,
        MonitorFrame::Downlink {
            downlink: downlink(2)
        }
    );

    link.close();
}

#[tokio::test]
async fn test_status_uses_event_socket() {
    let monitor = MockMonitor::new().await;
    let link = link_to(&monitor);

    let status = GatewayStatus {
        rx_in: 3,
        rx_ok: 3,
        ..GatewayStatus::default()
    };
    let (sent, mut conn) = tokio::join!(
        Monitor::send_status(&link, status.clone()),
        monitor.accept()
    );
    sent.expect("status sent");

    assert_eq!(conn.path, "/events");
    assert_eq!(conn.authorization.as_deref(), Some("Bearer tok-A"));
    assert_eq!(
        conn.next_frame().await,
        MonitorFrame::Status {
            gateway_id: gateway_id(),
            status,
        }
    );
}

#[tokio::test]
async fn test_event_socket_reopened_after_token_change() {
    let monitor = MockMonitor::new().await;
    let transport = WsMonitorTransport::new(monitor.url());
    let gw = gateway_id();
    let status = GatewayStatus::default();

    let (sent, mut first) = tokio::join!(
        transport.send_status("tok-A", &gw, &status),
        monitor.accept()
    );
    sent.expect("status sent");
    assert_eq!(first.authorization.as_deref(), Some("Bearer tok-A"));
    first.next_frame().await;

    let (sent, second) = tokio::join!(
        transport.send_status("tok-B", &gw, &status),
        monitor.accept()
    );
    sent.expect("status sent");
    assert_eq!(second.authorization.as_deref(), Some("Bearer tok-B"));
}

#[tokio::test]
async fn test_event_send_fails_fast_while_connect_in_flight() {
    let (url, mut accepted) = silent_monitor().await;
    let transport = Arc::new(WsMonitorTransport::new(url).with_connect_timeout(WAIT));

    let first = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            transport
                .send_status("tok-A", &gateway_id(), &GatewayStatus::default())
                .await
        })
    };
    timeout(WAIT, accepted.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("listener alive");

    let second = timeout(
        Duration::from_millis(500),
        transport.send_status("tok-A", &gateway_id(), &GatewayStatus::default()),
    )
    .await
    .expect("second send should not wait for the handshake");
    assert!(
        matches!(&second, Err(MonitorError::Connect(msg)) if msg.contains("in progress")),
        "unexpected result: {second:?}"
    );
    assert!(!first.is_finished());
    first.abort();
}

#[tokio::test]
async fn test_event_connect_times_out() {
    let (url, _accepted) = silent_monitor().await;
    let transport = WsMonitorTransport::new(url).with_connect_timeout(Duration::from_millis(100));

    for _ in 0..2 {
        let result = timeout(
            WAIT,
            transport.send_status("tok-A", &gateway_id(), &GatewayStatus::default()),
        )
        .await
        .expect("connect should be bounded");
        assert!(
            matches!(&result, Err(MonitorError::Connect(msg)) if msg.contains("timed out")),
            "unexpected result: {result:?}"
        );
    }
}
