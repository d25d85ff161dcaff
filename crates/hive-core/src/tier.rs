//! # Activation Tiers
//!
//! Global phases that halve reward and unlock amounts as the network grows.
//! The tier of an event is decided by the activation sequence of the member
//! who triggered it and is frozen on the record it creates.
//!
//! | Tier | Activation sequence | Multiplier |
//! |------|---------------------|------------|
//! | 1 | 1 ..= 9,999 | 1.0 |
//! | 2 | 10,000 ..= 19,998 | 0.5 |
//! | 3 | 19,999 ..= 39,997 | 0.25 |
//! | 4 | 39,998 .. | 0.125 |

use crate::types::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Last activation sequence of tier 1
pub const TIER_1_MAX: u64 = 9_999;
/// Last activation sequence of tier 2
pub const TIER_2_MAX: u64 = 19_998;
/// Last activation sequence of tier 3
pub const TIER_3_MAX: u64 = 39_997;

/// Activation tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    One,
    Two,
    Three,
    Four,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::One, Tier::Two, Tier::Three, Tier::Four];

    /// Tier of the member activated with `sequence`
    pub fn from_sequence(sequence: u64) -> Self {
        if sequence <= TIER_1_MAX {
            Self::One
        } else if sequence <= TIER_2_MAX {
            Self::Two
        } else if sequence <= TIER_3_MAX {
            Self::Three
        } else {
            Self::Four
        }
    }

    /// Tier from its number, 1..=4
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            4 => Some(Self::Four),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }

    /// How many times amounts are halved in this tier
    pub fn halvings(self) -> u32 {
        self.number() as u32 - 1
    }

    /// Multiplier for display and reporting
    pub fn multiplier(self) -> f64 {
        1.0 / (1u32 << self.halvings()) as f64
    }

    /// Scale a fixed-point amount by the tier multiplier
    pub fn apply(self, amount: Amount) -> Amount {
        amount >> self.halvings()
    }

    /// Last sequence belonging to this tier, `None` for the open-ended tier 4
    pub fn last_sequence(self) -> Option<u64> {
        match self {
            Self::One => Some(TIER_1_MAX),
            Self::Two => Some(TIER_2_MAX),
            Self::Three => Some(TIER_3_MAX),
            Self::Four => None,
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {} (x{})", self.number(), self.multiplier())
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_number(value).ok_or_else(|| format!("invalid tier {}", value))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.number()
    }
}

/// `tierOf(activationSequence) -> (tier, multiplier)`
pub fn tier_of(activation_sequence: u64) -> (u8, f64) {
    let tier = Tier::from_sequence(activation_sequence);
    (tier.number(), tier.multiplier())
}

/// Network-wide tier, derived from the all-time activation count.
///
/// Recomputed from the count on every activation rather than cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierState {
    /// Tier the next activation falls into
    pub current_tier: Tier,

    /// Activations so far
    pub activation_count: u64,

    /// Activations left before the next tier starts
    pub remaining_in_tier: Option<u64>,
}

impl TierState {
    pub fn from_activation_count(activation_count: u64) -> Self {
        let next_sequence = activation_count + 1;
        let current_tier = Tier::from_sequence(next_sequence);
        let remaining_in_tier = current_tier
            .last_sequence()
            .map(|last| last + 1 - next_sequence);

        Self {
            current_tier,
            activation_count,
            remaining_in_tier,
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.current_tier.multiplier()
    }
}
