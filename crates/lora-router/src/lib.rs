//! # lora-router
//!
//! Per-gateway state for a LoRaWAN router.
//!
//! This crate provides:
//!
//! - [`GatewayState`]: credentials, status, utilization and schedule of one
//!   gateway, with fan-out of its traffic to monitors
//! - [`GatewayRegistry`]: all connected gateways, each attached to the
//!   configured monitor endpoints
//! - [`RouterConfig`]: TOML configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod monitors;
pub mod registry;

pub use collaborators::{
    MemoryStatusStore, RxUtilization, Schedule, StatusStore, TimestampSchedule, Utilization,
};
pub use config::{BackoffSettings, LoggingConfig, MonitorEndpoint, RouterConfig};
pub use dispatch::Dispatcher;
pub use error::{Result, RouterError};
pub use gateway::GatewayState;
pub use monitors::MonitorRegistry;
pub use registry::{GatewayRegistry, LinkFactory, MonitorFactory};
