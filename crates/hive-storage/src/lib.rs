//! # Beehive Storage
//!
//! Row storage for members, matrix slots, reward claims and balances.
//!
//! The store is where uniqueness and atomicity live. Every method is one
//! short critical section, and the methods that decide races are written as
//! insert-if-absent or compare-and-set operations:
//!
//! | Operation | Guard |
//! |-----------|-------|
//! | `insert_slot` | unique `(root, occupant)` and `(root, position)` |
//! | `insert_claim` | unique `(payee, trigger, level)` unless rolled up |
//! | `transition_claim` | current status equals `from` |
//! | `claim_and_credit` | status is `claimable`, window open, payee matches |
//! | `roll_up` | original status is `expired` |
//! | `apply_level_unlock` | level not yet unlocked for the member |

pub mod memory;

pub use memory::{MemoryStore, StoreSnapshot};

use chrono::{DateTime, Utc};
use hive_core::{
    Address, Amount, BalanceLedger, ClaimId, ClaimStatus, MatrixPosition, MatrixSlot, Member,
    Result, RewardClaim,
};
use std::ops::Range;

/// Ledger storage interface
pub trait LedgerStore: Send + Sync {
    // ==================== Members ====================

    /// Create a member at level 1 with the next activation sequence.
    ///
    /// Returns the stored member and whether it was created by this call.
    /// Re-activation with the same referrer returns the existing row.
    fn activate_member(
        &self,
        address: &Address,
        referrer: Option<&Address>,
        at: DateTime<Utc>,
    ) -> Result<(Member, bool)>;

    fn get_member(&self, address: &Address) -> Result<Option<Member>>;

    /// Raise a member's level. Lower levels fail with `LevelRegression`.
    fn set_member_level(&self, address: &Address, level: u8) -> Result<Member>;

    /// All-time activation count
    fn activation_count(&self) -> Result<u64>;

    // ==================== Matrix slots ====================

    /// Insert a slot if both its occupant and its cell are free in the matrix
    fn insert_slot(&self, slot: MatrixSlot) -> Result<()>;

    /// Slot held by `occupant` in the matrix of `root`
    fn get_slot(&self, root: &Address, occupant: &Address) -> Result<Option<MatrixSlot>>;

    fn slot_at(&self, root: &Address, position: &MatrixPosition) -> Result<Option<MatrixSlot>>;

    /// Slots of one layer in position order
    fn slots_in_layer(&self, root: &Address, layer: u8) -> Result<Vec<MatrixSlot>>;

    fn layer_occupancy(&self, root: &Address, layer: u8) -> Result<u64>;

    /// Lowest free breadth-first index on a layer within `within`,
    /// `None` when that stretch is full
    fn first_vacant_index(&self, root: &Address, layer: u8, within: Range<u64>)
        -> Result<Option<u64>>;

    /// Every slot the member occupies, across all matrices
    fn slots_for_occupant(&self, occupant: &Address) -> Result<Vec<MatrixSlot>>;

    // ==================== Reward claims ====================

    /// Insert a claim. A claim that is not a rollup fails with
    /// `DuplicateReward` when its `(payee, trigger, level)` is taken.
    fn insert_claim(&self, claim: RewardClaim) -> Result<()>;

    fn get_claim(&self, id: &ClaimId) -> Result<Option<RewardClaim>>;

    /// Claims payable to `payee` in any of `statuses` (all when empty), oldest first
    fn claims_for_payee(&self, payee: &Address, statuses: &[ClaimStatus])
        -> Result<Vec<RewardClaim>>;

    /// Claims in any of `statuses`, oldest first
    fn claims_with_status(&self, statuses: &[ClaimStatus]) -> Result<Vec<RewardClaim>>;

    /// Open claims whose window closed before `now`, plus claims left in `expired`
    fn overdue_claims(&self, now: DateTime<Utc>) -> Result<Vec<RewardClaim>>;

    /// Compare-and-set on the claim status
    fn transition_claim(
        &self,
        id: &ClaimId,
        from: ClaimStatus,
        to: ClaimStatus,
        now: DateTime<Utc>,
    ) -> Result<RewardClaim>;

    /// `claimable -> claimed` plus the payee credit, in one step
    fn claim_and_credit(
        &self,
        id: &ClaimId,
        payee: &Address,
        now: DateTime<Utc>,
    ) -> Result<(RewardClaim, BalanceLedger)>;

    /// `expired -> rolled_up` on the original plus insertion of its replacement
    fn roll_up(
        &self,
        original: &ClaimId,
        replacement: RewardClaim,
        now: DateTime<Utc>,
    ) -> Result<RewardClaim>;

    /// Claim created by rolling up `id`
    fn forwarded_claim(&self, id: &ClaimId) -> Result<Option<RewardClaim>>;

    // ==================== Balances ====================

    /// Insert a ledger if none exists; returns the stored one
    fn open_balance(&self, ledger: BalanceLedger) -> Result<BalanceLedger>;

    fn get_balance(&self, address: &Address) -> Result<Option<BalanceLedger>>;

    /// Move up to `amount` from locked to transferable, once per level.
    ///
    /// Returns the amount moved, `None` if the level was already unlocked.
    fn apply_level_unlock(&self, address: &Address, level: u8, amount: Amount)
        -> Result<Option<Amount>>;

    // ==================== Stats ====================

    fn stats(&self) -> Result<StoreStats>;
}

/// Row counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub members: u64,
    pub slots: u64,
    pub claims: u64,
    pub open_claims: u64,
    pub balances: u64,
}
