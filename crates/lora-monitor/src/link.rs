//! Monitor link with automatic reconnection.
//!
//! A [`MonitorLink`] keeps one downlink stream open to a monitor endpoint.
//! Downlinks go through a bounded queue that is drained into the stream by a
//! dedicated task; enqueueing never waits and sheds load when the queue is
//! full. The reconnect loop is started on first use and runs until
//! [`MonitorLink::close`]:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Backoff -> Connecting -> ...
//!                    \-> Backoff (open failed)
//! any state -> Closed (close)
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lora_proto::{DownlinkMessage, GatewayId, GatewayStatus, MonitorReply, UplinkMessage};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::{MonitorError, Result};
use crate::events::LinkEvent;
use crate::monitor::Monitor;
use crate::state::{LinkState, StateCell};
use crate::transport::{AckSource, DownlinkSink, DownlinkStream, MonitorTransport};

/// Default capacity of the outbound downlink queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Builder for [`MonitorLink`].
pub struct MonitorLinkBuilder {
    name: String,
    gateway_id: GatewayId,
    transport: Arc<dyn MonitorTransport>,
    backoff: Arc<dyn Backoff>,
    queue_capacity: usize,
    token: String,
}

impl MonitorLinkBuilder {
    /// Set the downlink queue capacity. Zero is raised to one.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the retry delay policy.
    #[must_use]
    pub fn backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the initial credential.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Build the link. Nothing runs until the first downlink is enqueued.
    #[must_use]
    pub fn build(self) -> MonitorLink {
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(LinkShared {
            name: self.name,
            gateway_id: self.gateway_id,
            transport: self.transport,
            backoff: self.backoff,
            token: RwLock::new(self.token),
            state: StateCell::new(LinkState::Idle),
            retries: AtomicU32::new(0),
            current_stream: Mutex::new(None),
            queue: tokio::sync::Mutex::new(queue_rx),
            events,
        });

        MonitorLink {
            shared,
            queue_tx,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }
}

enum Lifecycle {
    Idle,
    Running { shutdown: CancellationToken },
    Closed,
}

/// State shared between the link handle, its reconnect loop and drain task.
struct LinkShared {
    name: String,
    gateway_id: GatewayId,
    transport: Arc<dyn MonitorTransport>,
    backoff: Arc<dyn Backoff>,
    token: RwLock<String>,
    state: StateCell,
    retries: AtomicU32,
    /// Cancel handle of the current stream attempt. `Some` iff an attempt is
    /// open or being torn down. Only the reconnect loop sets or clears it.
    current_stream: Mutex<Option<CancellationToken>>,
    queue: tokio::sync::Mutex<mpsc::Receiver<DownlinkMessage>>,
    events: broadcast::Sender<LinkEvent>,
}

/// Why a stream attempt ended.
enum StreamOutcome {
    /// Cancelled before it opened.
    Abandoned,
    /// Could not be opened.
    OpenFailed,
    /// Opened, then failed or was cancelled.
    Ended(String),
}

/// Resilient outbound link to one monitor endpoint for one gateway.
pub struct MonitorLink {
    shared: Arc<LinkShared>,
    queue_tx: mpsc::Sender<DownlinkMessage>,
    lifecycle: Mutex<Lifecycle>,
}

impl MonitorLink {
    /// Start building a link named `name` for `gateway_id`.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        gateway_id: GatewayId,
        transport: Arc<dyn MonitorTransport>,
    ) -> MonitorLinkBuilder {
        MonitorLinkBuilder {
            name: name.into(),
            gateway_id,
            transport,
            backoff: Arc::new(BackoffConfig::default()),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            token: String::new(),
        }
    }

    /// Name of the monitor endpoint.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Gateway this link mirrors.
    #[must_use]
    pub fn gateway_id(&self) -> &GatewayId {
        &self.shared.gateway_id
    }

    /// Current state of the reconnect loop.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.shared.state.get()
    }

    /// Watch state transitions of the reconnect loop.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.watch()
    }

    /// Retry counter used for the next backoff delay.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.shared.retries.load(Ordering::SeqCst)
    }

    /// Credential used for the next stream.
    #[must_use]
    pub fn token(&self) -> String {
        self.shared.token.read().clone()
    }

    /// Number of downlinks waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Check whether the link has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Closed)
    }

    /// Replace the credential. An already open stream keeps its credential
    /// until it is reopened.
    pub fn set_token(&self, token: &str) {
        *self.shared.token.write() = token.to_string();
    }

    /// Queue a downlink for delivery without waiting.
    ///
    /// Starts the reconnect loop on first use.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::BufferFull`] when the queue is full (the
    /// downlink is dropped), [`MonitorError::Closed`] after [`close`], and
    /// [`MonitorError::NoRuntime`] when called outside a tokio runtime.
    ///
    /// [`close`]: MonitorLink::close
    pub fn enqueue(&self, downlink: DownlinkMessage) -> Result<()> {
        self.ensure_started()?;

        match self.queue_tx.try_send(downlink) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    gateway_id = %self.shared.gateway_id,
                    monitor = %self.shared.name,
                    "not sending downlink to monitor, buffer full"
                );
                let _ = self.shared.events.send(LinkEvent::Dropped);
                Err(MonitorError::BufferFull)
            }
            Err(TrySendError::Closed(_)) => Err(MonitorError::Closed),
        }
    }

    /// Tear down the current stream, if any. The loop backs off and reopens
    /// it with the current token; queued downlinks are kept.
    pub fn reconnect(&self) {
        if let Some(cancel) = self.shared.current_stream.lock().as_ref() {
            cancel.cancel();
        }
    }

    /// Close the link for good.
    ///
    /// Cancels any open stream and stops the reconnect loop. Queued downlinks
    /// are not drained. Safe to call repeatedly and before first use.
    pub fn close(&self) {
        let mut lifecycle = self.lifecycle.lock();
        match &*lifecycle {
            Lifecycle::Closed => return,
            Lifecycle::Running { shutdown } => shutdown.cancel(),
            Lifecycle::Idle => {}
        }
        *lifecycle = Lifecycle::Closed;
        drop(lifecycle);

        if let Some(cancel) = self.shared.current_stream.lock().as_ref() {
            cancel.cancel();
        }
        self.shared.state.set(LinkState::Closed);
        let _ = self.shared.events.send(LinkEvent::Closed);
        info!(
            gateway_id = %self.shared.gateway_id,
            monitor = %self.shared.name,
            "closed monitor link"
        );
    }

    fn ensure_started(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match &*lifecycle {
            Lifecycle::Running { .. } => Ok(()),
            Lifecycle::Closed => Err(MonitorError::Closed),
            Lifecycle::Idle => {
                let runtime =
                    Handle::try_current().map_err(|e| MonitorError::NoRuntime(e.to_string()))?;
                let shutdown = CancellationToken::new();
                runtime.spawn(LinkShared::run(Arc::clone(&self.shared), shutdown.clone()));
                *lifecycle = Lifecycle::Running { shutdown };
                Ok(())
            }
        }
    }
}

impl Drop for MonitorLink {
    fn drop(&mut self) {
        if let Lifecycle::Running { shutdown } = &*self.lifecycle.lock() {
            shutdown.cancel();
        }
    }
}

#[async_trait]
impl Monitor for MonitorLink {
    fn name(&self) -> &str {
        MonitorLink::name(self)
    }

    fn set_token(&self, token: &str) {
        MonitorLink::set_token(self, token);
    }

    async fn send_status(&self, status: GatewayStatus) -> Result<()> {
        if self.is_closed() {
            return Err(MonitorError::Closed);
        }
        let token = self.token();
        self.shared
            .transport
            .send_status(&token, &self.shared.gateway_id, &status)
            .await
            .inspect_err(|e| {
                warn!(
                    gateway_id = %self.shared.gateway_id,
                    monitor = %self.shared.name,
                    error = %e,
                    "failed to send status to monitor"
                );
            })
    }

    async fn send_uplink(&self, uplink: UplinkMessage) -> Result<()> {
        if self.is_closed() {
            return Err(MonitorError::Closed);
        }
        let token = self.token();
        self.shared
            .transport
            .send_uplink(&token, &uplink)
            .await
            .inspect_err(|e| {
                warn!(
                    gateway_id = %self.shared.gateway_id,
                    monitor = %self.shared.name,
                    error = %e,
                    "failed to send uplink to monitor"
                );
            })
    }

    async fn send_downlink(&self, downlink: DownlinkMessage) -> Result<()> {
        self.enqueue(downlink)
    }

    fn close(&self) {
        MonitorLink::close(self);
    }
}

impl LinkShared {
    /// The reconnect loop. Runs until `shutdown` is cancelled.
    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            let outcome = self.attempt_stream(&shutdown).await;
            self.clear_stream();

            match outcome {
                StreamOutcome::Abandoned => continue,
                StreamOutcome::OpenFailed => {}
                StreamOutcome::Ended(reason) => {
                    let _ = self.events.send(LinkEvent::Disconnected { reason });
                }
            }
            if shutdown.is_cancelled() {
                break;
            }

            let attempt = self.retries.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            let delay = self.backoff.delay(attempt);
            self.state.set(LinkState::Backoff);
            let _ = self.events.send(LinkEvent::Reconnecting { attempt, delay });
            debug!(
                gateway_id = %self.gateway_id,
                monitor = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off before reopening monitor downlink stream"
            );

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        self.clear_stream();
        self.state.set(LinkState::Closed);
        debug!(gateway_id = %self.gateway_id, monitor = %self.name, "monitor link stopped");
    }

    /// One pass through `Connecting` and, if the open succeeds, `Streaming`.
    async fn attempt_stream(self: &Arc<Self>, shutdown: &CancellationToken) -> StreamOutcome {
        let cancel = {
            let mut current = self.current_stream.lock();
            if shutdown.is_cancelled() {
                return StreamOutcome::Abandoned;
            }
            let cancel = shutdown.child_token();
            *current = Some(cancel.clone());
            cancel
        };

        self.state.set(LinkState::Connecting);
        let token = self.token.read().clone();

        let opened = tokio::select! {
            () = cancel.cancelled() => return StreamOutcome::Abandoned,
            result = self.transport.open_downlink_stream(&token) => result,
        };

        match opened {
            Ok(stream) => {
                self.retries.store(0, Ordering::SeqCst);
                self.state.set(LinkState::Streaming);
                let _ = self.events.send(LinkEvent::Connected);
                debug!(
                    gateway_id = %self.gateway_id,
                    monitor = %self.name,
                    "opened new monitor downlink stream"
                );
                StreamOutcome::Ended(self.stream(stream, cancel).await)
            }
            Err(e) => {
                warn!(
                    gateway_id = %self.gateway_id,
                    monitor = %self.name,
                    error = %e,
                    "failed to open new monitor downlink stream"
                );
                StreamOutcome::OpenFailed
            }
        }
    }

    /// Run an open stream until it fails or is cancelled, then tear it down.
    async fn stream(self: &Arc<Self>, stream: DownlinkStream, cancel: CancellationToken) -> String {
        let DownlinkStream { sink, mut acks } = stream;
        let drain = tokio::spawn(Self::drain(Arc::clone(self), sink, cancel.clone()));

        let reason = tokio::select! {
            () = cancel.cancelled() => "stream cancelled".to_string(),
            e = self.watch_acks(acks.as_mut()) => {
                warn!(
                    gateway_id = %self.gateway_id,
                    monitor = %self.name,
                    error = %e,
                    "received error on monitor downlink stream, closing"
                );
                e.to_string()
            }
        };

        cancel.cancel();
        match drain.await {
            Ok(mut sink) => match sink.close_send().await {
                Ok(()) => debug!(
                    gateway_id = %self.gateway_id,
                    monitor = %self.name,
                    "closed monitor downlink stream"
                ),
                Err(e) => debug!(
                    gateway_id = %self.gateway_id,
                    monitor = %self.name,
                    error = %e,
                    "failed to close monitor downlink stream"
                ),
            },
            Err(e) => warn!(
                gateway_id = %self.gateway_id,
                monitor = %self.name,
                error = %e,
                "monitor downlink drain task failed"
            ),
        }
        reason
    }

    /// Read acknowledgements until the stream fails.
    async fn watch_acks(&self, acks: &mut dyn AckSource) -> MonitorError {
        loop {
            match acks.recv().await {
                Ok(MonitorReply::Ack) => trace!(monitor = %self.name, "monitor acknowledged"),
                Ok(MonitorReply::Error { message }) => debug!(
                    gateway_id = %self.gateway_id,
                    monitor = %self.name,
                    message = %message,
                    "monitor rejected downlink"
                ),
                Err(e) => return e,
            }
        }
    }

    /// Move queued downlinks into the stream until cancelled. Returns the
    /// sink so the caller can close the send side.
    async fn drain(
        self: Arc<Self>,
        mut sink: Box<dyn DownlinkSink>,
        cancel: CancellationToken,
    ) -> Box<dyn DownlinkSink> {
        let mut queue = tokio::select! {
            () = cancel.cancelled() => return sink,
            queue = self.queue.lock() => queue,
        };

        loop {
            let downlink = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = queue.recv() => match next {
                    Some(downlink) => downlink,
                    None => break,
                },
            };

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = sink.send(&downlink) => result,
            };

            match sent {
                Ok(()) => debug!(
                    gateway_id = %self.gateway_id,
                    monitor = %self.name,
                    "sent downlink to monitor"
                ),
                Err(e) => {
                    // Stop here so the backlog waits for the next stream.
                    warn!(
                        gateway_id = %self.gateway_id,
                        monitor = %self.name,
                        error = %e,
                        "failed to send downlink to monitor"
                    );
                    cancel.cancel();
                    break;
                }
            }
        }
        sink
    }

    fn clear_stream(&self) {
        self.current_stream.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingTransport;

    #[async_trait]
    impl MonitorTransport for RefusingTransport {
        async fn open_downlink_stream(&self, _token: &str) -> Result<DownlinkStream> {
            Err(MonitorError::Connect("refused".to_string()))
        }

        async fn send_status(
            &self,
            _token: &str,
            _gateway_id: &GatewayId,
            _status: &GatewayStatus,
        ) -> Result<()> {
            Err(MonitorError::Connect("refused".to_string()))
        }

        async fn send_uplink(&self, _token: &str, _uplink: &UplinkMessage) -> Result<()> {
            Err(MonitorError::Connect("refused".to_string()))
        }
    }

    fn link() -> MonitorLink {
        MonitorLink::builder(
            "test",
            GatewayId::parse("gw-1").expect("valid id"),
            Arc::new(RefusingTransport),
        )
        .build()
    }

    #[test]
    fn test_link_starts_idle() {
        let link = link();
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(link.retries(), 0);
        assert_eq!(link.queued(), 0);
        assert!(!link.is_closed());
    }

    #[test]
    fn test_builder_raises_zero_capacity() {
        let link = MonitorLink::builder(
            "test",
            GatewayId::parse("gw-1").expect("valid id"),
            Arc::new(RefusingTransport),
        )
        .queue_capacity(0)
        .token("tok-A")
        .build();
        assert_eq!(link.queue_tx.max_capacity(), 1);
        assert_eq!(link.token(), "tok-A");
    }

    #[test]
    fn test_close_before_start() {
        let link = link();
        link.close();
        link.close();
        assert!(link.is_closed());
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_enqueue_outside_runtime_fails() {
        let link = link();
        let downlink = DownlinkMessage {
            gateway_id: GatewayId::parse("gw-1").expect("valid id"),
            payload: vec![1],
            timestamp: 0,
            frequency: 869_525_000,
            power: 14,
        };
        assert!(matches!(
            link.enqueue(downlink),
            Err(MonitorError::NoRuntime(_))
        ));
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_send_status_failure_is_returned() {
        let link = link();
        let err = Monitor::send_status(&link, GatewayStatus::default())
            .await
            .expect_err("transport refuses");
        assert!(matches!(err, MonitorError::Connect(_)));
    }
}
