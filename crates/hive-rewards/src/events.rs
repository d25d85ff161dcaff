//! Events for the notification layer
//!
//! Everything that changes a member's matrix, a claim or the network tier is
//! published on a broadcast [`EventBus`]. Publishing never blocks and never
//! fails; with no subscriber the event is dropped.

use chrono::{DateTime, Utc};
use hive_core::{Address, Amount, ClaimId, ClaimStatus, MatrixPosition, PlacementType, Tier};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Domain events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HiveEvent {
    /// First activation of a member
    MemberActivated {
        address: Address,
        referrer: Option<Address>,
        activation_sequence: u64,
        tier: Tier,
    },
    /// Slot written in some matrix
    MemberPlaced {
        root: Address,
        occupant: Address,
        position: MatrixPosition,
        placement_type: PlacementType,
    },
    /// Level raised
    MemberUpgraded {
        address: Address,
        from_level: u8,
        to_level: u8,
    },
    RewardCreated {
        claim_id: ClaimId,
        root_address: Address,
        triggered_by: Address,
        amount: Amount,
        status: ClaimStatus,
        expires_at: DateTime<Utc>,
    },
    /// `pending -> claimable` after the payee upgraded
    RewardPromoted {
        claim_id: ClaimId,
        root_address: Address,
    },
    RewardClaimed {
        claim_id: ClaimId,
        root_address: Address,
        amount: Amount,
    },
    /// Window is closing; sent once per claim per threshold
    RewardExpiringSoon {
        claim_id: ClaimId,
        root_address: Address,
        amount: Amount,
        hours_left: i64,
        threshold_hours: i64,
    },
    RewardRolledUp {
        claim_id: ClaimId,
        new_claim_id: ClaimId,
        from: Address,
        to: Address,
        amount: Amount,
    },
    RewardForfeited {
        claim_id: ClaimId,
        root_address: Address,
        amount: Amount,
    },
    /// Activation count crossed a tier boundary
    TierAdvanced {
        from: Tier,
        to: Tier,
        activation_count: u64,
    },
}

impl HiveEvent {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MemberActivated { .. } => "member_activated",
            Self::MemberPlaced { .. } => "member_placed",
            Self::MemberUpgraded { .. } => "member_upgraded",
            Self::RewardCreated { .. } => "reward_created",
            Self::RewardPromoted { .. } => "reward_promoted",
            Self::RewardClaimed { .. } => "reward_claimed",
            Self::RewardExpiringSoon { .. } => "reward_expiring_soon",
            Self::RewardRolledUp { .. } => "reward_rolled_up",
            Self::RewardForfeited { .. } => "reward_forfeited",
            Self::TierAdvanced { .. } => "tier_advanced",
        }
    }
}

/// Broadcast channel for [`HiveEvent`]s
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<HiveEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HiveEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; returns how many received it
    pub fn publish(&self, event: HiveEvent) -> usize {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for {}", kind);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let delivered = bus.publish(HiveEvent::TierAdvanced {
            from: Tier::One,
            to: Tier::Two,
            activation_count: 9_999,
        });
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_subscriber_receives() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let event = HiveEvent::RewardPromoted {
            claim_id: ClaimId::new(),
            root_address: Address::new("a"),
        };
        assert_eq!(bus.publish(event.clone()), 1);
        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = HiveEvent::TierAdvanced {
            from: Tier::One,
            to: Tier::Two,
            activation_count: 9_999,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tier_advanced");
        assert_eq!(json["to"], 2);
        assert_eq!(event.kind(), "tier_advanced");
    }
}
