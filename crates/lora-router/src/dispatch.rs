//! Fire-and-forget fan-out to monitors.
//!
//! Every send to a monitor runs as its own task on a [`TaskTracker`], so a
//! slow monitor never holds up gateway handling and shutdown can wait for
//! in-flight sends.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lora_monitor::MonitorError;
use lora_proto::GatewayId;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Spawns and tracks monitor sends for one gateway.
#[derive(Debug)]
pub struct Dispatcher {
    gateway_id: GatewayId,
    tracker: TaskTracker,
    failures: Arc<AtomicU64>,
}

impl Dispatcher {
    /// Create a dispatcher for `gateway_id`.
    #[must_use]
    pub fn new(gateway_id: GatewayId) -> Self {
        Self {
            gateway_id,
            tracker: TaskTracker::new(),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `send` in the background. Failures are logged and counted.
    ///
    /// Returns `false` if nothing was spawned because the dispatcher is shut
    /// down or there is no runtime.
    pub fn spawn<F>(&self, monitor: &str, what: &'static str, send: F) -> bool
    where
        F: Future<Output = Result<(), MonitorError>> + Send + 'static,
    {
        if self.tracker.is_closed() {
            debug!(gateway_id = %self.gateway_id, monitor, what, "dispatcher closed, not sending");
            return false;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(gateway_id = %self.gateway_id, monitor, what, "no runtime to send to monitor");
            self.failures.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let gateway_id = self.gateway_id.clone();
        let monitor = monitor.to_string();
        let failures = Arc::clone(&self.failures);
        self.tracker.spawn_on(
            async move {
                if let Err(e) = send.await {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        gateway_id = %gateway_id,
                        monitor = %monitor,
                        what,
                        error = %e,
                        "failed to send to monitor"
                    );
                }
            },
            &runtime,
        );
        true
    }

    /// Count a failed send that did not go through [`spawn`](Self::spawn).
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of failed sends so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Number of sends still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Check whether the dispatcher has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop accepting sends and wait up to `timeout` for running ones.
    ///
    /// Returns `true` if every send finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                gateway_id = %self.gateway_id,
                in_flight = self.tracker.len(),
                "monitor sends still running after shutdown timeout"
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(GatewayId::parse("gw-1").expect("valid id"))
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let dispatcher = dispatcher();
        assert!(dispatcher.spawn("m1", "status", async { Ok(()) }));
        assert!(dispatcher.spawn("m2", "status", async {
            Err(MonitorError::StreamClosed)
        }));

        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
        assert_eq!(dispatcher.failures(), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_spawn_after_shutdown_is_refused() {
        let dispatcher = dispatcher();
        assert!(dispatcher.shutdown(Duration::from_millis(10)).await);
        assert!(dispatcher.is_closed());
        assert!(!dispatcher.spawn("m1", "status", async { Ok(()) }));
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_send() {
        let dispatcher = dispatcher();
        dispatcher.spawn("m1", "uplink", std::future::pending());
        assert!(!dispatcher.shutdown(Duration::from_millis(20)).await);
        assert_eq!(dispatcher.in_flight(), 1);
    }

    #[test]
    fn test_spawn_without_runtime_counts_failure() {
        let dispatcher = dispatcher();
        assert!(!dispatcher.spawn("m1", "status", async { Ok(()) }));
        assert_eq!(dispatcher.failures(), 1);
    }
}
