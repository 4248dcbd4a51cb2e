//! Registry of connected gateways.
//!
//! Gateways are created on first contact. Each new gateway gets one monitor
//! per configured endpoint, built by a [`MonitorFactory`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lora_monitor::{Backoff, Monitor, MonitorLink, WsMonitorTransport};
use lora_proto::{GatewayId, RouterEvent};
use parking_lot::RwLock;
use tracing::info;

use crate::config::{MonitorEndpoint, RouterConfig};
use crate::error::Result;
use crate::gateway::GatewayState;

/// Builds the monitor attached to a gateway for one endpoint.
pub trait MonitorFactory: Send + Sync {
    /// Create a monitor mirroring `gateway_id` to `endpoint`.
    fn create(&self, endpoint: &MonitorEndpoint, gateway_id: &GatewayId) -> Arc<dyn Monitor>;
}

/// [`MonitorFactory`] producing WebSocket [`MonitorLink`]s.
pub struct LinkFactory {
    queue_capacity: usize,
    backoff: Arc<dyn Backoff>,
}

impl LinkFactory {
    /// Create a factory with the given link settings.
    #[must_use]
    pub fn new(queue_capacity: usize, backoff: Arc<dyn Backoff>) -> Self {
        Self {
            queue_capacity,
            backoff,
        }
    }

    /// Create a factory from the router configuration.
    #[must_use]
    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(
            config.queue_capacity,
            Arc::new(config.backoff.to_backoff_config()),
        )
    }
}

impl MonitorFactory for LinkFactory {
    fn create(&self, endpoint: &MonitorEndpoint, gateway_id: &GatewayId) -> Arc<dyn Monitor> {
        let transport = Arc::new(WsMonitorTransport::new(endpoint.url.as_str()));
        Arc::new(
            MonitorLink::builder(endpoint.name.as_str(), gateway_id.clone(), transport)
                .queue_capacity(self.queue_capacity)
                .backoff(Arc::clone(&self.backoff))
                .build(),
        )
    }
}

/// All gateways known to the router.
pub struct GatewayRegistry {
    gateways: RwLock<HashMap<GatewayId, Arc<GatewayState>>>,
    endpoints: Vec<MonitorEndpoint>,
    factory: Arc<dyn MonitorFactory>,
    disconnect_timeout: Duration,
}

impl GatewayRegistry {
    /// Create a registry attaching `endpoints` to every gateway.
    #[must_use]
    pub fn new(
        endpoints: Vec<MonitorEndpoint>,
        factory: Arc<dyn MonitorFactory>,
        disconnect_timeout: Duration,
    ) -> Self {
        Self {
            gateways: RwLock::new(HashMap::new()),
            endpoints,
            factory,
            disconnect_timeout,
        }
    }

    /// Create a registry with WebSocket monitor links from `config`.
    #[must_use]
    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(
            config.monitors.clone(),
            Arc::new(LinkFactory::from_config(config)),
            config.dispatch_shutdown_timeout(),
        )
    }

    /// Look up a gateway.
    #[must_use]
    pub fn get(&self, id: &GatewayId) -> Option<Arc<GatewayState>> {
        self.gateways.read().get(id).cloned()
    }

    /// Look up a gateway, creating it with its monitors on first contact.
    pub fn get_or_create(&self, id: &GatewayId) -> Result<Arc<GatewayState>> {
        if let Some(gateway) = self.get(id) {
            return Ok(gateway);
        }

        let mut gateways = self.gateways.write();
        if let Some(gateway) = gateways.get(id) {
            return Ok(Arc::clone(gateway));
        }

        let gateway = Arc::new(GatewayState::new(id.clone()));
        for endpoint in &self.endpoints {
            gateway.add_monitor(&endpoint.name, self.factory.create(endpoint, id))?;
        }
        gateways.insert(id.clone(), Arc::clone(&gateway));
        info!(
            gateway_id = %id,
            monitors = self.endpoints.len(),
            "gateway connected"
        );
        Ok(gateway)
    }

    /// Remove and disconnect a gateway. Returns `false` if it was unknown.
    pub async fn disconnect(&self, id: &GatewayId) -> bool {
        let removed = self.gateways.write().remove(id);
        match removed {
            Some(gateway) => {
                gateway.disconnect(self.disconnect_timeout).await;
                true
            }
            None => false,
        }
    }

    /// Apply one inbound event.
    ///
    /// # Errors
    ///
    /// Returns the error of the gateway operation the event maps to.
    pub async fn handle(&self, event: RouterEvent) -> Result<()> {
        match event {
            RouterEvent::Auth {
                gateway_id,
                token,
                authenticated,
            } => {
                self.get_or_create(&gateway_id)?
                    .set_auth(&token, authenticated);
                Ok(())
            }
            RouterEvent::Status { gateway_id, status } => {
                self.get_or_create(&gateway_id)?.handle_status(status)
            }
            RouterEvent::Uplink { uplink } => {
                let gateway = self.get_or_create(&uplink.gateway_metadata.gateway_id)?;
                gateway.handle_uplink(uplink)
            }
            RouterEvent::Downlink {
                identifier,
                downlink,
            } => {
                let gateway = self.get_or_create(&downlink.gateway_id)?;
                gateway.handle_downlink(&identifier, downlink).await
            }
            RouterEvent::Disconnect { gateway_id } => {
                self.disconnect(&gateway_id).await;
                Ok(())
            }
        }
    }

    /// IDs of all known gateways.
    #[must_use]
    pub fn gateway_ids(&self) -> Vec<GatewayId> {
        self.gateways.read().keys().cloned().collect()
    }

    /// Number of known gateways.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gateways.read().len()
    }

    /// Check whether no gateway is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gateways.read().is_empty()
    }

    /// Disconnect every gateway.
    pub async fn shutdown(&self) {
        let gateways: Vec<_> = self.gateways.write().drain().map(|(_, g)| g).collect();
        for gateway in gateways {
            gateway.disconnect(self.disconnect_timeout).await;
        }
        info!("gateway registry shut down");
    }
}
