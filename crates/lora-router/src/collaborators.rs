//! Per-gateway collaborators: status store, utilization and schedule.
//!
//! [`GatewayState`](crate::GatewayState) only talks to these through traits so
//! deployments can plug in persistent or duty-cycle aware implementations.
//! The in-memory versions here are what [`GatewayState::new`] uses.
//!
//! [`GatewayState::new`]: crate::GatewayState::new

use std::collections::{BTreeMap, HashSet};

use lora_proto::{DownlinkMessage, GatewayStatus, UplinkMessage};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, RouterError};

/// Keeps the most recent status of a gateway.
pub trait StatusStore: Send + Sync {
    /// Record a new status.
    fn update(&self, status: &GatewayStatus) -> Result<()>;

    /// Latest recorded status.
    fn get(&self) -> Result<GatewayStatus>;
}

/// Tracks radio utilization of a gateway.
pub trait Utilization: Send + Sync {
    /// Account for a received frame.
    fn add_rx(&self, uplink: &UplinkMessage) -> Result<()>;
}

/// Downlink schedule of a gateway.
pub trait Schedule: Send + Sync {
    /// Align the schedule with the gateway's internal timestamp.
    fn sync(&self, timestamp: u32);

    /// Reserve a transmission slot for `downlink` under `identifier`.
    fn schedule(&self, identifier: &str, downlink: &DownlinkMessage) -> Result<()>;
}

/// In-memory [`StatusStore`].
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    latest: RwLock<Option<GatewayStatus>>,
}

impl MemoryStatusStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn update(&self, status: &GatewayStatus) -> Result<()> {
        *self.latest.write() = Some(status.clone());
        Ok(())
    }

    fn get(&self) -> Result<GatewayStatus> {
        self.latest.read().clone().ok_or(RouterError::NoStatus)
    }
}

/// In-memory [`Utilization`] counting received frames per frequency.
#[derive(Debug, Default)]
pub struct RxUtilization {
    rx: Mutex<BTreeMap<u64, u64>>,
}

impl RxUtilization {
    /// Create an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames received on `frequency`.
    #[must_use]
    pub fn rx_count(&self, frequency: u64) -> u64 {
        self.rx.lock().get(&frequency).copied().unwrap_or(0)
    }

    /// Frames received on all frequencies.
    #[must_use]
    pub fn total_rx(&self) -> u64 {
        self.rx.lock().values().sum()
    }
}

impl Utilization for RxUtilization {
    fn add_rx(&self, uplink: &UplinkMessage) -> Result<()> {
        let frequency = uplink.gateway_metadata.frequency;
        if frequency == 0 {
            return Err(RouterError::Utilization(
                "uplink has no frequency".to_string(),
            ));
        }
        let mut rx = self.rx.lock();
        let count = rx.entry(frequency).or_insert(0);
        *count = count.saturating_add(1);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ScheduleInner {
    synced: Option<u32>,
    identifiers: HashSet<String>,
    slots: BTreeMap<u32, String>,
}

/// Half of the gateway counter range. A slot more than this far ahead of the
/// synced timestamp is behind it, the counter having wrapped.
const HALF_COUNTER_RANGE: u32 = u32::MAX / 2;

/// In-memory [`Schedule`] keyed on gateway timestamps.
///
/// Rejects a reused identifier and a second downlink at an already reserved
/// timestamp. Each [`sync`](Schedule::sync) releases the slots the gateway
/// clock has passed, along with their identifiers, so entries live for at
/// most one counter period. There is no duty-cycle accounting.
#[derive(Debug, Default)]
pub struct TimestampSchedule {
    inner: Mutex<ScheduleInner>,
}

impl TimestampSchedule {
    /// Create an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last gateway timestamp passed to [`Schedule::sync`].
    #[must_use]
    pub fn synced(&self) -> Option<u32> {
        self.inner.lock().synced
    }

    /// Number of reserved slots.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

impl Schedule for TimestampSchedule {
    fn sync(&self, timestamp: u32) {
        let mut inner = self.inner.lock();
        let ScheduleInner {
            synced,
            identifiers,
            slots,
        } = &mut *inner;
        *synced = Some(timestamp);
        slots.retain(|&slot, identifier| {
            let passed = slot.wrapping_sub(timestamp) > HALF_COUNTER_RANGE;
            if passed {
                identifiers.remove(identifier.as_str());
            }
            !passed
        });
    }

    fn schedule(&self, identifier: &str, downlink: &DownlinkMessage) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.identifiers.contains(identifier) {
            return Err(RouterError::ScheduleConflict {
                identifier: identifier.to_string(),
                reason: "identifier already scheduled".to_string(),
            });
        }
        if let Some(other) = inner.slots.get(&downlink.timestamp) {
            return Err(RouterError::ScheduleConflict {
                identifier: identifier.to_string(),
                reason: format!("timestamp {} taken by {other}", downlink.timestamp),
            });
        }
        inner.identifiers.insert(identifier.to_string());
        inner
            .slots
            .insert(downlink.timestamp, identifier.to_string());
        Ok(())
    }
}
