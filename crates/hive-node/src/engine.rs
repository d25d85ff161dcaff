//! # Membership Engine
//!
//! Entry point for the inbound event stream and the read API.
//!
//! ```text
//!   ActivateMember ─► member row ─► placement (referrer + uplines)
//!                                     │
//!                                     ├─► balance opened, level 1 BCC unlocked
//!                                     └─► level-1 rewards, tier recomputed
//!
//!   UpgradeLevel ───► level raised ─► BCC unlocked for crossed levels
//!                                     ├─► level-L rewards to layer-L roots
//!                                     └─► own pending claims promoted
//! ```
//!
//! Every step is idempotent, so a replayed or retried event resumes where a
//! failed attempt stopped instead of duplicating rows.

use hive_core::{
    validate_level, Address, Amount, BalanceLedger, ClaimId, Clock, HiveError, Member, MatrixSlot,
    Result, RewardClaim, Tier, TierState,
};
use hive_matrix::{MatrixPlacementEngine, MatrixStats};
use hive_rewards::{
    ClaimResult, ClaimView, EventBus, ExpiryRollupScheduler, HiveEvent, RewardLedger, SweepReport,
};
use hive_storage::{LedgerStore, StoreStats};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::HiveConfig;

/// Events consumed from the activation and payment subsystem
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    ActivateMember {
        address: Address,
        #[serde(default)]
        referrer: Option<Address>,
    },
    UpgradeLevel { address: Address, new_level: u8 },
}

/// Result of `activate`
#[derive(Clone, Debug)]
pub struct Activation {
    pub member: Member,
    /// False when the member already existed
    pub created: bool,
    /// Slots held by the member, new or existing
    pub placements: Vec<MatrixSlot>,
    pub rewards: Vec<RewardClaim>,
    pub bcc_unlocked: Amount,
}

/// Result of `upgrade`
#[derive(Clone, Debug)]
pub struct Upgrade {
    pub member: Member,
    pub from_level: u8,
    pub rewards: Vec<RewardClaim>,
    pub promoted: Vec<RewardClaim>,
    pub bcc_unlocked: Amount,
}

#[derive(Clone, Debug)]
pub enum EventOutcome {
    Activated(Activation),
    Upgraded(Upgrade),
}

/// Outcome of replaying an event list
#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub applied: usize,
    /// Index into the input and the error it produced
    pub failed: Vec<(usize, HiveError)>,
}

/// Placement, rewards and sweep behind one API
pub struct MembershipEngine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    placement: MatrixPlacementEngine,
    rewards: RewardLedger,
    sweeper: Arc<ExpiryRollupScheduler>,
    /// Last tier observed, for change detection only
    last_tier: RwLock<TierState>,
}

impl MembershipEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        config: &HiveConfig,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.engine.event_capacity);
        let tier = TierState::from_activation_count(store.activation_count()?);

        Ok(Self {
            placement: MatrixPlacementEngine::new(
                store.clone(),
                clock.clone(),
                config.placement_config(),
            ),
            rewards: RewardLedger::new(
                store.clone(),
                clock.clone(),
                events.clone(),
                config.reward_config(),
            ),
            sweeper: Arc::new(ExpiryRollupScheduler::new(
                store.clone(),
                clock.clone(),
                events.clone(),
                config.sweep_config(),
            )),
            store,
            clock,
            events,
            last_tier: RwLock::new(tier),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HiveEvent> {
        self.events.subscribe()
    }

    pub fn sweeper(&self) -> Arc<ExpiryRollupScheduler> {
        self.sweeper.clone()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ==================== Inbound events ====================

    pub fn apply(&self, event: &InboundEvent) -> Result<EventOutcome> {
        match event {
            InboundEvent::ActivateMember { address, referrer } => self
                .activate(address, referrer.as_ref())
                .map(EventOutcome::Activated),
            InboundEvent::UpgradeLevel { address, new_level } => self
                .upgrade(address, *new_level)
                .map(EventOutcome::Upgraded),
        }
    }

    /// Apply events in order. A failing event is recorded and skipped.
    pub fn replay(&self, events: &[InboundEvent]) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        for (index, event) in events.iter().enumerate() {
            match self.apply(event) {
                Ok(_) => summary.applied += 1,
                Err(err) => {
                    warn!("Event {} failed ({}): {}", index, err.kind(), err);
                    summary.failed.push((index, err));
                }
            }
        }
        summary
    }

    /// `ActivateMember(address, referrer)`
    pub fn activate(&self, address: &Address, referrer: Option<&Address>) -> Result<Activation> {
        let now = self.clock.now();
        let (member, created) = self.store.activate_member(address, referrer, now)?;
        if created {
            info!(
                "Activated {} (sequence {}, referrer {:?})",
                member.address, member.activation_sequence, member.referrer
            );
        } else {
            debug!("{} already activated, resuming activation", member.address);
        }

        let mut placements = Vec::new();
        if let Some(referrer) = member.referrer.as_ref() {
            for placement in self.placement.place_with_uplines(&member.address, referrer)? {
                if placement.created {
                    self.events.publish(HiveEvent::MemberPlaced {
                        root: placement.slot.matrix_root.clone(),
                        occupant: placement.slot.occupant.clone(),
                        position: placement.slot.position.clone(),
                        placement_type: placement.slot.placement_type,
                    });
                }
                placements.push(placement.slot);
            }
        }

        self.rewards.open_balance(&member)?;
        let bcc_unlocked = self.rewards.unlock_levels(&member, 0, member.current_level)?;
        let rewards = self.rewards.create_level_rewards(&member, 1)?;

        if created {
            self.events.publish(HiveEvent::MemberActivated {
                address: member.address.clone(),
                referrer: member.referrer.clone(),
                activation_sequence: member.activation_sequence,
                tier: Tier::from_sequence(member.activation_sequence),
            });
            self.refresh_tier()?;
        }

        Ok(Activation {
            member,
            created,
            placements,
            rewards,
            bcc_unlocked,
        })
    }

    /// `UpgradeLevel(address, new_level)`
    pub fn upgrade(&self, address: &Address, new_level: u8) -> Result<Upgrade> {
        validate_level(new_level)?;
        let current = self.member(address)?;
        if new_level == current.current_level {
            debug!("{} is already at level {}", address, new_level);
            return Ok(Upgrade {
                from_level: current.current_level,
                member: current,
                rewards: Vec::new(),
                promoted: Vec::new(),
                bcc_unlocked: 0,
            });
        }

        let member = self.store.set_member_level(address, new_level)?;
        let from_level = current.current_level;
        info!("{} upgraded from level {} to {}", address, from_level, new_level);

        let bcc_unlocked = self.rewards.unlock_levels(&member, from_level, new_level)?;
        let rewards = self.rewards.create_level_rewards(&member, new_level)?;
        let promoted = self.rewards.promote_pending(&member)?;

        self.events.publish(HiveEvent::MemberUpgraded {
            address: member.address.clone(),
            from_level,
            to_level: new_level,
        });

        Ok(Upgrade {
            member,
            from_level,
            rewards,
            promoted,
            bcc_unlocked,
        })
    }

    fn refresh_tier(&self) -> Result<TierState> {
        let next = TierState::from_activation_count(self.store.activation_count()?);

        let previous = {
            let mut last = self.last_tier.write();
            if next.activation_count <= last.activation_count {
                return Ok(*last);
            }
            std::mem::replace(&mut *last, next)
        };

        if previous.current_tier != next.current_tier {
            info!(
                "Network advanced to {} after {} activations",
                next.current_tier, next.activation_count
            );
            self.events.publish(HiveEvent::TierAdvanced {
                from: previous.current_tier,
                to: next.current_tier,
                activation_count: next.activation_count,
            });
        }
        Ok(next)
    }

    // ==================== Claims ====================

    pub fn claim(&self, claim_id: &ClaimId, payee: &Address) -> Result<ClaimResult> {
        self.rewards.claim(claim_id, payee)
    }

    /// One expiry pass
    pub fn sweep_once(&self) -> SweepReport {
        self.sweeper.sweep_once()
    }

    // ==================== Queries ====================

    pub fn member(&self, address: &Address) -> Result<Member> {
        self.store
            .get_member(address)?
            .ok_or_else(|| HiveError::MemberNotFound(address.clone()))
    }

    pub fn matrix_view(&self, root: &Address, layer: u8) -> Result<Vec<MatrixSlot>> {
        self.placement.matrix_view(root, layer)
    }

    pub fn matrix_stats(&self, root: &Address) -> Result<MatrixStats> {
        self.placement.matrix_stats(root)
    }

    /// Matrices the member sits in
    pub fn placements_of(&self, member: &Address) -> Result<Vec<MatrixSlot>> {
        self.placement.placements_of(member)
    }

    pub fn claimable_rewards(&self, address: &Address) -> Result<Vec<ClaimView>> {
        self.rewards.claimable_rewards(address)
    }

    pub fn pending_rewards(&self, address: &Address) -> Result<Vec<ClaimView>> {
        self.rewards.pending_rewards(address)
    }

    pub fn reward_history(&self, address: &Address, limit: usize) -> Result<Vec<RewardClaim>> {
        self.rewards.reward_history(address, limit)
    }

    pub fn rollup_chain(&self, claim_id: &ClaimId) -> Result<Vec<RewardClaim>> {
        self.rewards.rollup_chain(claim_id)
    }

    pub fn claim_record(&self, claim_id: &ClaimId) -> Result<RewardClaim> {
        self.store
            .get_claim(claim_id)?
            .ok_or(HiveError::ClaimNotFound(*claim_id))
    }

    pub fn balance(&self, address: &Address) -> Result<BalanceLedger> {
        self.rewards.balance(address)
    }

    /// Tier of the next activation, computed from the live count
    pub fn tier_state(&self) -> Result<TierState> {
        Ok(TierState::from_activation_count(
            self.store.activation_count()?,
        ))
    }

    pub fn store_stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hive_core::{units, ClaimStatus, ManualClock, PlacementType};
    use hive_storage::MemoryStore;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn engine() -> (ManualClock, MembershipEngine) {
        let clock = ManualClock::new(Utc::now());
        let engine = MembershipEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            &HiveConfig::default(),
        )
        .unwrap();
        (clock, engine)
    }

    #[test]
    fn test_activation_places_and_rewards() {
        let (_, engine) = engine();
        let genesis = engine.activate(&addr("g"), None).unwrap();
        assert!(genesis.created);
        assert!(genesis.placements.is_empty());

        let a = engine.activate(&addr("a"), Some(&addr("g"))).unwrap();
        assert_eq!(a.member.activation_sequence, 2);
        assert_eq!(a.placements.len(), 1);
        assert_eq!(a.placements[0].placement_type, PlacementType::Direct);

        // g is level 1 and a sits on g's layer 1
        assert_eq!(a.rewards.len(), 1);
        assert_eq!(a.rewards[0].root_address, addr("g"));
        assert_eq!(a.rewards[0].amount, units(100));
        assert_eq!(a.rewards[0].status, ClaimStatus::Claimable);

        let balance = engine.balance(&addr("a")).unwrap();
        assert_eq!(balance.transferable_bcc, units(500) + units(100));
        assert_eq!(balance.locked_bcc, units(10_450) - units(100));
    }

    #[test]
    fn test_reactivation_is_idempotent() {
        let (_, engine) = engine();
        engine.activate(&addr("g"), None).unwrap();
        engine.activate(&addr("a"), Some(&addr("g"))).unwrap();

        let again = engine.activate(&addr("a"), Some(&addr("g"))).unwrap();
        assert!(!again.created);
        assert!(again.rewards.is_empty());
        assert_eq!(again.bcc_unlocked, 0);
        assert_eq!(engine.store_stats().unwrap().slots, 1);

        let err = engine.activate(&addr("a"), Some(&addr("x"))).unwrap_err();
        assert_eq!(err.kind(), "already_activated");
    }

    #[test]
    fn test_upgrade_rules() {
        let (_, engine) = engine();
        engine.activate(&addr("g"), None).unwrap();

        let noop = engine.upgrade(&addr("g"), 1).unwrap();
        assert_eq!(noop.bcc_unlocked, 0);

        let up = engine.upgrade(&addr("g"), 4).unwrap();
        assert_eq!(up.from_level, 1);
        // levels 2, 3 and 4
        assert_eq!(up.bcc_unlocked, units(150) + units(200) + units(250));

        let err = engine.upgrade(&addr("g"), 3).unwrap_err();
        assert_eq!(err.kind(), "level_regression");
        assert!(matches!(
            engine.upgrade(&addr("g"), 20),
            Err(HiveError::InvalidLevel(20))
        ));
        assert!(matches!(
            engine.upgrade(&addr("nobody"), 2),
            Err(HiveError::MemberNotFound(_))
        ));
    }

    #[test]
    fn test_replay_skips_failures() {
        let (_, engine) = engine();
        let events: Vec<InboundEvent> = serde_json::from_str(
            r#"[
                {"type": "activate_member", "address": "g"},
                {"type": "activate_member", "address": "a", "referrer": "g"},
                {"type": "activate_member", "address": "b", "referrer": "ghost"},
                {"type": "upgrade_level", "address": "a", "new_level": 2}
            ]"#,
        )
        .unwrap();

        let summary = engine.replay(&events);
        assert_eq!(summary.applied, 3);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, 2);
        assert_eq!(summary.failed[0].1.kind(), "unknown_referrer");
        assert_eq!(engine.member(&addr("a")).unwrap().current_level, 2);
    }

    #[test]
    fn test_events_published() {
        let (_, engine) = engine();
        let mut rx = engine.subscribe();
        engine.activate(&addr("g"), None).unwrap();
        engine.activate(&addr("a"), Some(&addr("g"))).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "member_activated",
                "member_placed",
                "reward_created",
                "member_activated"
            ]
        );
    }
}
