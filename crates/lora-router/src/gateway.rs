//! Per-gateway state.
//!
//! A [`GatewayState`] sits between one gateway and the rest of the router.
//! It feeds status reports, uplinks and downlinks to the gateway's status
//! store, utilization and schedule, and mirrors accepted traffic to every
//! attached monitor. The gateway's credential is shared with its monitors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lora_monitor::Monitor;
use lora_proto::{DownlinkMessage, GatewayId, GatewayStatus, UplinkMessage};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::collaborators::{
    MemoryStatusStore, RxUtilization, Schedule, StatusStore, TimestampSchedule, Utilization,
};
use crate::dispatch::Dispatcher;
use crate::error::{Result, RouterError};
use crate::monitors::MonitorRegistry;

/// Fields guarded by the gateway lock.
#[derive(Default)]
struct Auth {
    token: String,
    authenticated: bool,
    monitors: MonitorRegistry,
}

/// State of one connected gateway.
pub struct GatewayState {
    id: GatewayId,
    status: Arc<dyn StatusStore>,
    utilization: Arc<dyn Utilization>,
    schedule: Arc<dyn Schedule>,
    auth: RwLock<Auth>,
    last_seen: RwLock<Option<DateTime<Utc>>>,
    dispatcher: Dispatcher,
    disconnected: AtomicBool,
}

impl GatewayState {
    /// Create state for `id` with in-memory collaborators.
    #[must_use]
    pub fn new(id: GatewayId) -> Self {
        Self::with_collaborators(
            id,
            Arc::new(MemoryStatusStore::new()),
            Arc::new(RxUtilization::new()),
            Arc::new(TimestampSchedule::new()),
        )
    }

    /// Create state for `id` with the given collaborators.
    #[must_use]
    pub fn with_collaborators(
        id: GatewayId,
        status: Arc<dyn StatusStore>,
        utilization: Arc<dyn Utilization>,
        schedule: Arc<dyn Schedule>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(id.clone()),
            id,
            status,
            utilization,
            schedule,
            auth: RwLock::new(Auth::default()),
            last_seen: RwLock::new(None),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Gateway ID.
    #[must_use]
    pub fn id(&self) -> &GatewayId {
        &self.id
    }

    /// Whether the current credential was validated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth.read().authenticated
    }

    /// Current credential.
    #[must_use]
    pub fn token(&self) -> String {
        self.auth.read().token.clone()
    }

    /// When the gateway last sent a status or uplink.
    #[must_use]
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        *self.last_seen.read()
    }

    /// Names of the attached monitors.
    #[must_use]
    pub fn monitor_names(&self) -> Vec<String> {
        self.auth.read().monitors.names()
    }

    /// The gateway's status store.
    #[must_use]
    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.status
    }

    /// Number of monitor sends that failed.
    #[must_use]
    pub fn dispatch_failures(&self) -> u64 {
        self.dispatcher.failures()
    }

    /// Check whether [`disconnect`](Self::disconnect) has been called.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Update the gateway's credential.
    ///
    /// `authenticated` is always stored. A changed token is handed to every
    /// attached monitor.
    pub fn set_auth(&self, token: &str, authenticated: bool) {
        let mut auth = self.auth.write();
        auth.authenticated = authenticated;
        if auth.token == token {
            return;
        }
        auth.token = token.to_string();
        for monitor in auth.monitors.monitors() {
            monitor.set_token(token);
        }
        debug!(
            gateway_id = %self.id,
            authenticated,
            monitors = auth.monitors.len(),
            "gateway token changed"
        );
    }

    /// Attach `monitor` under `name`, replacing and closing any monitor with
    /// the same name. The monitor receives the current token.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Disconnected`] after [`disconnect`], in which
    /// case `monitor` is closed.
    ///
    /// [`disconnect`]: Self::disconnect
    pub fn add_monitor(&self, name: &str, monitor: Arc<dyn Monitor>) -> Result<()> {
        let replaced = {
            let mut auth = self.auth.write();
            if self.is_disconnected() {
                drop(auth);
                monitor.close();
                return Err(RouterError::Disconnected);
            }
            monitor.set_token(&auth.token);
            auth.monitors.insert(name, monitor)
        };
        if let Some(old) = replaced {
            old.close();
        }
        debug!(gateway_id = %self.id, monitor = name, "attached monitor");
        Ok(())
    }

    /// Detach and close the monitor named `name`. Returns `false` if there
    /// was none.
    pub fn remove_monitor(&self, name: &str) -> bool {
        let removed = self.auth.write().monitors.remove(name);
        match removed {
            Some(monitor) => {
                monitor.close();
                debug!(gateway_id = %self.id, monitor = name, "detached monitor");
                true
            }
            None => false,
        }
    }

    /// Record a status report and mirror it to the monitors.
    ///
    /// The status is stamped with the gateway's trust flag.
    ///
    /// # Errors
    ///
    /// Returns the status store's error unchanged, or
    /// [`RouterError::Disconnected`].
    pub fn handle_status(&self, mut status: GatewayStatus) -> Result<()> {
        self.ensure_connected()?;

        let monitors = {
            let auth = self.auth.read();
            status.gateway_trusted = auth.authenticated;
            self.status.update(&status)?;
            self.touch();
            auth.monitors.snapshot()
        };

        for (name, monitor) in monitors {
            let status = status.clone();
            self.dispatcher
                .spawn(&name, "status", async move { monitor.send_status(status).await });
        }
        Ok(())
    }

    /// Account for an uplink and mirror it to the monitors.
    ///
    /// Syncs the schedule to the uplink's gateway timestamp, fills in the
    /// gateway location from the last status when the uplink has none, and
    /// stamps the trust flag.
    ///
    /// # Errors
    ///
    /// Returns the utilization error unchanged, or
    /// [`RouterError::Disconnected`].
    pub fn handle_uplink(&self, mut uplink: UplinkMessage) -> Result<()> {
        self.ensure_connected()?;

        self.utilization.add_rx(&uplink)?;
        self.schedule.sync(uplink.gateway_metadata.timestamp);
        self.touch();

        if uplink.gateway_metadata.location.is_none() {
            if let Ok(status) = self.status.get() {
                uplink.gateway_metadata.location = status.location;
            }
        }

        let monitors = {
            let auth = self.auth.read();
            uplink.gateway_metadata.gateway_trusted = auth.authenticated;
            auth.monitors.snapshot()
        };

        for (name, monitor) in monitors {
            let uplink = uplink.clone();
            self.dispatcher
                .spawn(&name, "uplink", async move { monitor.send_uplink(uplink).await });
        }
        Ok(())
    }

    /// Schedule a downlink and mirror it to the monitors.
    ///
    /// Monitor sends only queue the downlink, so they run inline to keep
    /// per-monitor order. Their failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns the schedule's error unchanged, or
    /// [`RouterError::Disconnected`].
    pub async fn handle_downlink(&self, identifier: &str, downlink: DownlinkMessage) -> Result<()> {
        self.ensure_connected()?;

        if let Err(e) = self.schedule.schedule(identifier, &downlink) {
            warn!(
                gateway_id = %self.id,
                identifier,
                error = %e,
                "could not schedule downlink"
            );
            return Err(e);
        }

        let monitors = self.auth.read().monitors.snapshot();
        for (name, monitor) in monitors {
            if let Err(e) = monitor.send_downlink(downlink.clone()).await {
                self.dispatcher.record_failure();
                warn!(
                    gateway_id = %self.id,
                    monitor = %name,
                    identifier,
                    error = %e,
                    "failed to send downlink to monitor"
                );
            }
        }
        Ok(())
    }

    /// Close every monitor and stop mirroring.
    ///
    /// Waits up to `timeout` for in-flight monitor sends. Returns `true` if
    /// they all finished. Later calls return immediately.
    pub async fn disconnect(&self, timeout: Duration) -> bool {
        let monitors = {
            let mut auth = self.auth.write();
            if self.disconnected.swap(true, Ordering::SeqCst) {
                return true;
            }
            auth.monitors.take_all()
        };

        for (_, monitor) in &monitors {
            monitor.close();
        }
        let drained = self.dispatcher.shutdown(timeout).await;
        info!(
            gateway_id = %self.id,
            monitors = monitors.len(),
            drained,
            "gateway disconnected"
        );
        drained
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_disconnected() {
            return Err(RouterError::Disconnected);
        }
        Ok(())
    }

    fn touch(&self) {
        *self.last_seen.write() = Some(Utc::now());
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("id", &self.id)
            .field("authenticated", &self.is_authenticated())
            .field("monitors", &self.monitor_names())
            .field("last_seen", &self.last_seen())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> GatewayState {
        GatewayState::new(GatewayId::parse("gw-1").expect("valid id"))
    }

    #[test]
    fn test_new_gateway_defaults() {
        let gw = state();
        assert_eq!(gw.id().as_str(), "gw-1");
        assert!(!gw.is_authenticated());
        assert!(gw.token().is_empty());
        assert!(gw.last_seen().is_none());
        assert!(gw.monitor_names().is_empty());
    }

    #[test]
    fn test_set_auth_stores_flag_even_if_token_unchanged() {
        let gw = state();
        gw.set_auth("tok-A", true);
        gw.set_auth("tok-A", false);
        assert_eq!(gw.token(), "tok-A");
        assert!(!gw.is_authenticated());
    }

    #[test]
    fn test_handle_status_without_monitors() {
        let gw = state();
        gw.set_auth("tok-A", true);
        gw.handle_status(GatewayStatus::default()).expect("status");

        let stored = gw.status_store().get().expect("stored");
        assert!(stored.gateway_trusted);
        assert!(gw.last_seen().is_some());
    }

    #[tokio::test]
    async fn test_handle_after_disconnect_fails() {
        let gw = state();
        assert!(gw.disconnect(Duration::from_millis(10)).await);
        assert!(gw.disconnect(Duration::from_millis(10)).await);
        assert!(matches!(
            gw.handle_status(GatewayStatus::default()),
            Err(RouterError::Disconnected)
        ));
    }
}
