//! # Beehive Core
//!
//! Data model for the Beehive membership network.
//!
//! Every activated member owns a forced 3-ary matrix. New members are placed
//! breadth-first into their referrer's matrix; level upgrades pay the matrix
//! root sitting exactly `level` layers above the upgrading member, through a
//! reward claim that must be collected within 72 hours or is rolled up to the
//! next qualified upline.
//!
//! ```text
//!    activation ──► placement ──► upgrade ──► RewardClaim
//!                                                │
//!                      ┌────────── claim() ◄─────┤ (72h window)
//!                      ▼                         ▼
//!                  BalanceLedger           sweep: roll up / forfeit
//! ```
//!
//! This crate provides:
//! - `Member`, `MatrixSlot`, `RewardClaim`, `BalanceLedger` records
//! - `MatrixPosition` - typed `L.M.R` path inside a matrix
//! - `Tier` / `TierState` - activation-count phases that halve amounts
//! - level price and BCC unlock tables
//! - `Clock` - injectable wall-clock
//! - `HiveError` - the error taxonomy shared by every crate

pub mod clock;
pub mod error;
pub mod levels;
pub mod position;
pub mod tier;
pub mod types;

pub use clock::*;
pub use error::*;
pub use levels::*;
pub use position::*;
pub use tier::*;
pub use types::*;

/// Deepest matrix layer
pub const MAX_LAYERS: u8 = 19;

/// Highest membership level
pub const MAX_LEVEL: u8 = 19;

/// Network constants
pub mod constants {
    use crate::types::{units, Amount};

    /// Reward claim window in hours
    pub const REWARD_WINDOW_HOURS: i64 = 72;

    /// Referral hops walked before a reward is forfeited
    pub const ROLLUP_HOP_CAP: u32 = 10;

    /// Uplines whose matrices receive a new member
    pub const UPLINE_PROPAGATION_DEPTH: u32 = 19;

    /// Transferable BCC granted at activation
    pub const WELCOME_BCC: Amount = units(500);

    /// Expiring-soon reminder thresholds in hours
    pub const REMINDER_THRESHOLDS_HOURS: [i64; 2] = [24, 6];
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{HiveError, NotClaimableReason, Result};
    pub use crate::position::{Branch, MatrixPosition};
    pub use crate::tier::{Tier, TierState};
    pub use crate::types::*;
    pub use crate::{MAX_LAYERS, MAX_LEVEL};
}
