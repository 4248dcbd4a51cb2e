//! Named monitors attached to a gateway.

use std::sync::Arc;

use lora_monitor::Monitor;

/// Monitors keyed by endpoint name, in insertion order.
///
/// Fan-out iterates over a [`snapshot`](MonitorRegistry::snapshot) so callers
/// never hold the gateway lock while talking to a monitor.
#[derive(Default)]
pub struct MonitorRegistry {
    entries: Vec<(String, Arc<dyn Monitor>)>,
}

impl MonitorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `monitor` under `name`, returning the monitor it replaces.
    /// A replaced monitor keeps its position.
    pub fn insert(&mut self, name: &str, monitor: Arc<dyn Monitor>) -> Option<Arc<dyn Monitor>> {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, monitor)),
            None => {
                self.entries.push((name.to_string(), monitor));
                None
            }
        }
    }

    /// Unregister the monitor named `name`.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Monitor>> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Look up a monitor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Monitor>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| Arc::clone(m))
    }

    /// All monitors with their names.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn Monitor>)> {
        self.entries.clone()
    }

    /// Registered names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Iterate over the registered monitors.
    pub fn monitors(&self) -> impl Iterator<Item = &Arc<dyn Monitor>> {
        self.entries.iter().map(|(_, m)| m)
    }

    /// Remove and return every monitor.
    pub fn take_all(&mut self) -> Vec<(String, Arc<dyn Monitor>)> {
        std::mem::take(&mut self.entries)
    }

    /// Number of registered monitors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no monitor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lora_monitor::Result;
    use lora_proto::{DownlinkMessage, GatewayStatus, UplinkMessage};

    struct NullMonitor(&'static str);

    #[async_trait]
    impl Monitor for NullMonitor {
        fn name(&self) -> &str {
            self.0
        }
        fn set_token(&self, _token: &str) {}
        async fn send_status(&self, _status: GatewayStatus) -> Result<()> {
            Ok(())
        }
        async fn send_uplink(&self, _uplink: UplinkMessage) -> Result<()> {
            Ok(())
        }
        async fn send_downlink(&self, _downlink: DownlinkMessage) -> Result<()> {
            Ok(())
        }
        fn close(&self) {}
    }

    #[test]
    fn test_insert_keeps_order_and_replaces_in_place() {
        let mut registry = MonitorRegistry::new();
        assert!(registry.insert("m1", Arc::new(NullMonitor("a"))).is_none());
        assert!(registry.insert("m2", Arc::new(NullMonitor("b"))).is_none());
        let old = registry
            .insert("m1", Arc::new(NullMonitor("c")))
            .expect("replaced");

        assert_eq!(old.name(), "a");
        assert_eq!(registry.names(), vec!["m1", "m2"]);
        assert_eq!(registry.get("m1").map(|m| m.name().to_string()).as_deref(), Some("c"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_and_take_all() {
        let mut registry = MonitorRegistry::new();
        registry.insert("m1", Arc::new(NullMonitor("a")));
        registry.insert("m2", Arc::new(NullMonitor("b")));

        assert!(registry.remove("missing").is_none());
        assert_eq!(registry.remove("m1").map(|m| m.name().to_string()).as_deref(), Some("a"));
        assert_eq!(registry.names(), vec!["m2"]);

        let all = registry.take_all();
        assert_eq!(all.len(), 1);
        assert!(registry.is_empty());
    }
}
