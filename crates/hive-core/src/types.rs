//! Core type definitions for the Beehive membership network
//!
//! Members, matrix slots, reward claims and balance ledgers. All monetary
//! values are fixed-point [`Amount`]s in hundredths of a unit (USDT cents,
//! centi-BCC) so that tier halving stays exact down to tier 4.

use crate::position::MatrixPosition;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fixed-point amount in hundredths of a unit
pub type Amount = u64;

/// Hundredths per whole unit
pub const AMOUNT_SCALE: Amount = 100;

/// Whole units to fixed-point
pub const fn units(whole: u64) -> Amount {
    whole * AMOUNT_SCALE
}

/// Render an amount as `"150.00"`
pub fn format_amount(amount: Amount) -> String {
    format!("{}.{:02}", amount / AMOUNT_SCALE, amount % AMOUNT_SCALE)
}

/// Member wallet address, normalised to lowercase
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reward claim identifier; also the idempotency key of `claim()`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ClaimId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

impl fmt::Debug for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClaimId({})", &self.0.simple().to_string()[..12])
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An activated member of the network
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Wallet address
    pub address: Address,

    /// Membership level, 1..=19 once activated; never decreases
    pub current_level: u8,

    /// Global activation order, strictly increasing, starts at 1
    pub activation_sequence: u64,

    /// Direct referrer; `None` only for the genesis member
    pub referrer: Option<Address>,

    /// Activation timestamp
    pub activated_at: DateTime<Utc>,
}

impl Member {
    /// Whether the member may receive rewards that require `level`
    pub fn qualifies_for(&self, level: u8) -> bool {
        self.current_level >= level
    }
}

/// How an occupant arrived at a slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementType {
    /// Occupant is the root's direct referral, sitting on layer 1
    Direct,
    /// Occupant overflowed into this tree
    Spillover,
}

/// One occupied position in a member's matrix. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSlot {
    /// Whose matrix this slot belongs to
    pub matrix_root: Address,

    /// Member sitting in the slot
    pub occupant: Address,

    /// Path from the root
    pub position: MatrixPosition,

    /// Direct or spillover
    pub placement_type: PlacementType,

    /// Placement timestamp
    pub placed_at: DateTime<Utc>,
}

impl MatrixSlot {
    /// Layer of the slot, 1..=19
    pub fn layer(&self) -> u8 {
        self.position.layer()
    }
}

/// Reward claim lifecycle
///
/// ```text
/// pending ──► claimable ──► claimed
///    │            │
///    └────► expired ◄┘──► rolled_up | forfeited
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Payee has not reached the required level
    Pending,
    /// Gate satisfied, window open
    Claimable,
    /// Paid out (terminal)
    Claimed,
    /// Window closed; waiting for the sweep to forward or forfeit
    Expired,
    /// Forwarded to an upline (terminal)
    RolledUp,
    /// Nobody qualified (terminal)
    Forfeited,
}

impl ClaimStatus {
    /// Statuses the expiry sweep looks at
    pub const OPEN: [ClaimStatus; 2] = [ClaimStatus::Pending, ClaimStatus::Claimable];

    /// Still inside the 72-hour window lifecycle
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Claimable)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Claimed | Self::RolledUp | Self::Forfeited)
    }

    /// One-directional transition table
    pub fn can_transition_to(self, next: ClaimStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Claimable)
                | (Self::Pending, Self::Expired)
                | (Self::Claimable, Self::Claimed)
                | (Self::Claimable, Self::Expired)
                | (Self::Expired, Self::RolledUp)
                | (Self::Expired, Self::Forfeited)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimable => "claimable",
            Self::Claimed => "claimed",
            Self::Expired => "expired",
            Self::RolledUp => "rolled_up",
            Self::Forfeited => "forfeited",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Money owed to one matrix root from one triggering upgrade
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaim {
    /// Claim identifier
    pub id: ClaimId,

    /// Payee
    pub root_address: Address,

    /// Member whose upgrade caused the reward
    pub triggered_by: Address,

    /// Level reached by the trigger; also the payee's required level
    pub trigger_level: u8,

    /// Matrix layer of the trigger below the original payee
    pub layer: u8,

    /// Amount in USDT cents, tier multiplier already applied
    pub amount: Amount,

    /// Tier frozen at the triggering event
    pub tier: u8,

    /// Lifecycle status
    pub status: ClaimStatus,

    /// `created_at` + reward window; never extended
    pub expires_at: DateTime<Utc>,

    /// Claim this one was forwarded from
    pub rolled_up_from: Option<ClaimId>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Set on the transition into a terminal status
    pub processed_at: Option<DateTime<Utc>>,
}

impl RewardClaim {
    /// Create a claim whose window starts at `now`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root_address: Address,
        triggered_by: Address,
        trigger_level: u8,
        layer: u8,
        amount: Amount,
        tier: u8,
        status: ClaimStatus,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        Self {
            id: ClaimId::new(),
            root_address,
            triggered_by,
            trigger_level,
            layer,
            amount,
            tier,
            status,
            expires_at: now + window,
            rolled_up_from: None,
            created_at: now,
            processed_at: None,
        }
    }

    /// Level the payee must hold to claim
    pub fn required_level(&self) -> u8 {
        self.trigger_level
    }

    /// Fresh claimable copy for `new_root`, same amount and trigger, new window
    pub fn forwarded_to(&self, new_root: Address, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            id: ClaimId::new(),
            root_address: new_root,
            triggered_by: self.triggered_by.clone(),
            trigger_level: self.trigger_level,
            layer: self.layer,
            amount: self.amount,
            tier: self.tier,
            status: ClaimStatus::Claimable,
            expires_at: now + window,
            rolled_up_from: Some(self.id),
            created_at: now,
            processed_at: None,
        }
    }

    /// Window still open at `now`
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Open and past its window at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.expires_at < now
    }

    /// Whole hours left in the window, zero once closed
    pub fn hours_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_hours().max(0)
    }
}

/// Per-member running totals
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLedger {
    /// Owner
    pub address: Address,

    /// Spendable BCC
    pub transferable_bcc: Amount,

    /// BCC waiting for level unlocks
    pub locked_bcc: Amount,

    /// USDT credited by claimed rewards
    pub claimable_usdt_total: Amount,

    /// Levels whose BCC has been released
    pub unlocked_levels: BTreeSet<u8>,
}

impl BalanceLedger {
    pub fn new(address: Address, transferable_bcc: Amount, locked_bcc: Amount) -> Self {
        Self {
            address,
            transferable_bcc,
            locked_bcc,
            claimable_usdt_total: 0,
            unlocked_levels: BTreeSet::new(),
        }
    }

    pub fn is_level_unlocked(&self, level: u8) -> bool {
        self.unlocked_levels.contains(&level)
    }
}
