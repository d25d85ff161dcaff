//! # Beehive Node
//!
//! Service wrapper around the membership engine.
//!
//! - `HiveConfig` - layered TOML + environment configuration
//! - `MembershipEngine` - consumes `ActivateMember` / `UpgradeLevel` events
//!   and serves matrix, reward, balance and tier queries
//! - `HiveNode` - periodic expiry sweep, metrics endpoint and snapshot
//!   persistence until shutdown

pub mod config;
pub mod engine;
pub mod metrics;
pub mod node;

pub use config::HiveConfig;
pub use engine::{
    Activation, EventOutcome, InboundEvent, MembershipEngine, ReplaySummary, Upgrade,
};
pub use metrics::{HiveMetrics, MetricsServer};
pub use node::{HiveNode, NodeState};
