//! # Beehive Rewards
//!
//! Time-boxed matrix rewards.
//!
//! - `RewardLedger` - creates claims on level events, promotes them when the
//!   payee qualifies, pays them out exactly once, and releases BCC per level
//! - `ExpiryRollupScheduler` - forwards overdue claims up the referral chain
//!   or forfeits them
//! - `SweepRunner` - runs the sweep on an interval
//! - `EventBus` - broadcast of `HiveEvent`s for the notification layer

pub mod events;
pub mod ledger;
pub mod rollup;
pub mod scheduler;

pub use events::{EventBus, HiveEvent};
pub use ledger::{ClaimResult, ClaimView, RewardConfig, RewardLedger};
pub use rollup::{ExpiryRollupScheduler, SweepConfig, SweepReport};
pub use scheduler::{SweepRunner, SweepRunnerConfig, SweepStats};
