//! Error types for Beehive core operations

use crate::types::{Address, ClaimId, ClaimStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for Beehive operations
pub type Result<T> = std::result::Result<T, HiveError>;

/// Why a claim attempt was refused.
///
/// The UI renders a different message for each case, so callers must not
/// collapse these into a boolean.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotClaimableReason {
    /// Someone (possibly a concurrent request) already claimed it
    AlreadyClaimed,
    /// The 72-hour window closed
    Expired,
    /// Payee has not reached the required level yet
    NotYetEligible,
    /// Forwarded to another upline
    RolledUp,
    /// No qualified upline was found; the amount is gone
    Forfeited,
    /// Caller is not the payee of this claim
    WrongPayee,
}

impl NotClaimableReason {
    /// Map a non-claimable status to the reason shown to the payee
    pub fn from_status(status: ClaimStatus) -> Self {
        match status {
            ClaimStatus::Pending => Self::NotYetEligible,
            ClaimStatus::Claimed => Self::AlreadyClaimed,
            ClaimStatus::RolledUp => Self::RolledUp,
            ClaimStatus::Forfeited => Self::Forfeited,
            ClaimStatus::Claimable | ClaimStatus::Expired => Self::Expired,
        }
    }
}

impl fmt::Display for NotClaimableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AlreadyClaimed => "already claimed",
            Self::Expired => "claim window has expired",
            Self::NotYetEligible => "payee has not reached the required level",
            Self::RolledUp => "reward was rolled up to an upline",
            Self::Forfeited => "reward was forfeited",
            Self::WrongPayee => "caller is not the payee",
        };
        f.write_str(text)
    }
}

/// Errors that can occur in Beehive core operations
#[derive(Error, Debug, Clone)]
pub enum HiveError {
    // === Placement ===
    /// No free slot within the 19 matrix layers
    #[error("Matrix of {root} is exhausted (no free slot within {layers} layers)")]
    MatrixExhausted { root: Address, layers: u8 },

    /// Occupant already holds a slot in this matrix
    #[error("{occupant} is already placed in the matrix of {root}")]
    DuplicatePlacement { root: Address, occupant: Address },

    /// Lost the insert-if-absent race for a matrix cell
    #[error("Matrix cell {position} of {root} is already occupied")]
    CellOccupied { root: Address, position: String },

    /// A member cannot be placed in their own matrix
    #[error("{0} cannot be placed in their own matrix")]
    SelfPlacement(Address),

    /// Malformed position path
    #[error("Invalid matrix position: {0}")]
    InvalidPosition(String),

    // === Membership ===
    /// Member not found
    #[error("Member not found: {0}")]
    MemberNotFound(Address),

    /// Member already activated under a different referrer
    #[error("{address} is already activated under referrer {referrer:?}")]
    AlreadyActivated {
        address: Address,
        referrer: Option<Address>,
    },

    /// Referrer has never been activated
    #[error("Unknown referrer: {0}")]
    UnknownReferrer(Address),

    /// Only the genesis member may activate without a referrer
    #[error("{0} needs a referrer to activate")]
    MissingReferrer(Address),

    /// Level outside 1..=19
    #[error("Invalid level {0}, expected 1..=19")]
    InvalidLevel(u8),

    /// Upgrade event would lower the member's level
    #[error("{address} is at level {current}, cannot move to level {requested}")]
    LevelRegression {
        address: Address,
        current: u8,
        requested: u8,
    },

    // === Claims ===
    /// Claim not found
    #[error("Claim not found: {0}")]
    ClaimNotFound(ClaimId),

    /// Claim is not in a claimable state
    #[error("Claim {claim_id} is not claimable: {reason}")]
    NotClaimable {
        claim_id: ClaimId,
        reason: NotClaimableReason,
    },

    /// Rollup walk found nobody qualified
    #[error("No qualified upline for claim {claim_id} within {hops} hops")]
    NoQualifiedUpline { claim_id: ClaimId, hops: u32 },

    /// Conditional update observed a different status than expected
    #[error("Claim {claim_id} changed concurrently (found {found:?})")]
    ConcurrentModification {
        claim_id: ClaimId,
        found: ClaimStatus,
    },

    /// Status change not allowed by the claim lifecycle
    #[error("Claim {claim_id} cannot move from {from} to {to}")]
    InvalidTransition {
        claim_id: ClaimId,
        from: ClaimStatus,
        to: ClaimStatus,
    },

    /// A reward for this `(payee, trigger, level)` already exists
    #[error("{payee} already holds the level {level} reward triggered by {triggered_by}")]
    DuplicateReward {
        payee: Address,
        triggered_by: Address,
        level: u8,
    },

    // === Infrastructure ===
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HiveError {
    /// Stable numeric code for API responses
    pub fn code(&self) -> u32 {
        match self {
            Self::MatrixExhausted { .. } => 2001,
            Self::DuplicatePlacement { .. } => 2002,
            Self::CellOccupied { .. } => 2003,
            Self::SelfPlacement(_) | Self::InvalidPosition(_) => 2004,
            Self::MemberNotFound(_) => 3001,
            Self::AlreadyActivated { .. } => 3002,
            Self::UnknownReferrer(_) | Self::MissingReferrer(_) => 3003,
            Self::InvalidLevel(_) | Self::LevelRegression { .. } => 3004,
            Self::ClaimNotFound(_) => 4001,
            Self::NotClaimable { .. } => 4002,
            Self::NoQualifiedUpline { .. } => 4003,
            Self::ConcurrentModification { .. } => 4004,
            Self::InvalidTransition { .. } => 4005,
            Self::DuplicateReward { .. } => 4006,
            _ => 9999,
        }
    }

    /// Stable kind string, used as a metrics/log label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MatrixExhausted { .. } => "matrix_exhausted",
            Self::DuplicatePlacement { .. } => "duplicate_placement",
            Self::CellOccupied { .. } => "cell_occupied",
            Self::SelfPlacement(_) => "self_placement",
            Self::InvalidPosition(_) => "invalid_position",
            Self::MemberNotFound(_) => "member_not_found",
            Self::AlreadyActivated { .. } => "already_activated",
            Self::UnknownReferrer(_) => "unknown_referrer",
            Self::MissingReferrer(_) => "missing_referrer",
            Self::InvalidLevel(_) => "invalid_level",
            Self::LevelRegression { .. } => "level_regression",
            Self::ClaimNotFound(_) => "claim_not_found",
            Self::NotClaimable { .. } => "not_claimable",
            Self::NoQualifiedUpline { .. } => "no_qualified_upline",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::DuplicateReward { .. } => "duplicate_reward",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
        }
    }

    /// Only lost races are worth another attempt, and only by the sweep
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::CellOccupied { .. }
        )
    }

    /// Reason carried by a `NotClaimable` error
    pub fn not_claimable_reason(&self) -> Option<NotClaimableReason> {
        match self {
            Self::NotClaimable { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
