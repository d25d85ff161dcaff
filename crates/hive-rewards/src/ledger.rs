//! # Reward Ledger
//!
//! Claim creation, promotion and payout, plus the BCC balance that goes with
//! membership levels.
//!
//! | Event | Effect |
//! |-------|--------|
//! | member reaches level L | one claim per matrix where the member sits on layer L |
//! | payee upgrades | own `pending` claims with satisfied level become `claimable` |
//! | `claim(id, payee)` | `claimable -> claimed`, USDT credited, exactly once |
//! | member crosses level L | BCC for L moves from locked to transferable |
//!
//! Amounts are scaled by the tier of the member whose event created them,
//! fixed at creation time.

use chrono::Duration;
use hive_core::{
    base_bcc_unlock, base_price, total_bcc_lockup, Address, Amount, BalanceLedger, ClaimId,
    ClaimStatus, Clock, HiveError, Member, Result, RewardClaim, Tier,
};
use hive_storage::LedgerStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::{EventBus, HiveEvent};

/// Reward ledger configuration
#[derive(Clone, Debug)]
pub struct RewardConfig {
    /// Claim window
    pub window: Duration,
    /// Transferable BCC granted at activation
    pub welcome_bcc: Amount,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            window: Duration::hours(hive_core::constants::REWARD_WINDOW_HOURS),
            welcome_bcc: hive_core::constants::WELCOME_BCC,
        }
    }
}

/// Outcome of a successful claim
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResult {
    pub success: bool,
    pub claim_id: ClaimId,
    /// Amount credited
    pub amount: Amount,
    /// Payee's `claimable_usdt_total` after the credit
    pub new_balance: Amount,
}

/// A claim with the whole hours left in its window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimView {
    #[serde(flatten)]
    pub claim: RewardClaim,
    pub hours_left: i64,
}

/// Reward claim state machine
pub struct RewardLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    config: RewardConfig,
}

impl RewardLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: RewardConfig,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            config,
        }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    // ==================== Balances ====================

    /// Open the member's balance: tier-scaled lockup plus the welcome grant
    pub fn open_balance(&self, member: &Member) -> Result<BalanceLedger> {
        let tier = Tier::from_sequence(member.activation_sequence);
        let ledger = BalanceLedger::new(
            member.address.clone(),
            self.config.welcome_bcc,
            tier.apply(total_bcc_lockup()),
        );
        self.store.open_balance(ledger)
    }

    /// Release BCC for every level in `(from_level, to_level]`
    pub fn unlock_levels(&self, member: &Member, from_level: u8, to_level: u8) -> Result<Amount> {
        let tier = Tier::from_sequence(member.activation_sequence);
        let mut released = 0;

        for level in (from_level + 1)..=to_level {
            let amount = tier.apply(base_bcc_unlock(level)?);
            if let Some(moved) = self.store.apply_level_unlock(&member.address, level, amount)? {
                debug!("Unlocked {} BCC for {} at level {}", moved, member.address, level);
                released += moved;
            }
        }
        Ok(released)
    }

    // ==================== Claim creation ====================

    /// Create the rewards owed because `member` reached `level`.
    ///
    /// Each matrix root with `member` on layer `level` gets one claim. The
    /// store refuses a second claim for the same `(root, member, level)`, so a
    /// replayed or concurrently delivered event creates nothing new.
    pub fn create_level_rewards(&self, member: &Member, level: u8) -> Result<Vec<RewardClaim>> {
        let tier = Tier::from_sequence(member.activation_sequence);
        let amount = tier.apply(base_price(level)?);
        let now = self.clock.now();

        let mut created = Vec::new();
        for slot in self.store.slots_for_occupant(&member.address)? {
            if slot.layer() != level {
                continue;
            }
            let payee = slot.matrix_root;

            let status = match self.store.get_member(&payee)? {
                Some(root) if root.qualifies_for(level) => ClaimStatus::Claimable,
                Some(_) => ClaimStatus::Pending,
                None => {
                    warn!("Matrix root {} is not a member, reward stays pending", payee);
                    ClaimStatus::Pending
                }
            };

            let claim = RewardClaim::new(
                payee,
                member.address.clone(),
                level,
                slot.position.layer(),
                amount,
                tier.number(),
                status,
                now,
                self.config.window,
            );
            match self.store.insert_claim(claim.clone()) {
                Ok(()) => {}
                Err(HiveError::DuplicateReward { payee, .. }) => {
                    debug!(
                        "{} already rewarded for {} reaching level {}",
                        payee, member.address, level
                    );
                    continue;
                }
                Err(err) => return Err(err),
            }

            info!(
                "Reward {} created: {} owes {} ({}, tier {}) to {}",
                claim.id,
                member.address,
                hive_core::format_amount(claim.amount),
                claim.status,
                claim.tier,
                claim.root_address
            );
            self.events.publish(HiveEvent::RewardCreated {
                claim_id: claim.id,
                root_address: claim.root_address.clone(),
                triggered_by: claim.triggered_by.clone(),
                amount: claim.amount,
                status: claim.status,
                expires_at: claim.expires_at,
            });
            created.push(claim);
        }
        Ok(created)
    }

    /// Promote the payee's own `pending` claims whose level is now satisfied.
    ///
    /// A claim whose window has closed is left for the sweep.
    pub fn promote_pending(&self, payee: &Member) -> Result<Vec<RewardClaim>> {
        let now = self.clock.now();
        let mut promoted = Vec::new();

        for claim in self
            .store
            .claims_for_payee(&payee.address, &[ClaimStatus::Pending])?
        {
            if !payee.qualifies_for(claim.required_level()) || !claim.is_within_window(now) {
                continue;
            }
            match self.store.transition_claim(
                &claim.id,
                ClaimStatus::Pending,
                ClaimStatus::Claimable,
                now,
            ) {
                Ok(claim) => {
                    info!("Reward {} is now claimable by {}", claim.id, payee.address);
                    self.events.publish(HiveEvent::RewardPromoted {
                        claim_id: claim.id,
                        root_address: claim.root_address.clone(),
                    });
                    promoted.push(claim);
                }
                Err(HiveError::ConcurrentModification { claim_id, found }) => {
                    debug!("Reward {} moved to {} before promotion", claim_id, found);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(promoted)
    }

    // ==================== Claim ====================

    /// Pay out a claimable reward to its payee, exactly once
    pub fn claim(&self, claim_id: &ClaimId, payee: &Address) -> Result<ClaimResult> {
        let now = self.clock.now();
        let (claim, balance) = self.store.claim_and_credit(claim_id, payee, now)?;

        info!(
            "Reward {} claimed by {}: {} USDT",
            claim.id,
            payee,
            hive_core::format_amount(claim.amount)
        );
        self.events.publish(HiveEvent::RewardClaimed {
            claim_id: claim.id,
            root_address: claim.root_address.clone(),
            amount: claim.amount,
        });

        Ok(ClaimResult {
            success: true,
            claim_id: claim.id,
            amount: claim.amount,
            new_balance: balance.claimable_usdt_total,
        })
    }

    // ==================== Queries ====================

    /// `claimable` rewards still inside their window
    pub fn claimable_rewards(&self, address: &Address) -> Result<Vec<ClaimView>> {
        let now = self.clock.now();
        Ok(self
            .store
            .claims_for_payee(address, &[ClaimStatus::Claimable])?
            .into_iter()
            .filter(|c| c.is_within_window(now))
            .map(|claim| ClaimView {
                hours_left: claim.hours_left(now),
                claim,
            })
            .collect())
    }

    /// `pending` rewards with the hours left to qualify
    pub fn pending_rewards(&self, address: &Address) -> Result<Vec<ClaimView>> {
        let now = self.clock.now();
        Ok(self
            .store
            .claims_for_payee(address, &[ClaimStatus::Pending])?
            .into_iter()
            .map(|claim| ClaimView {
                hours_left: claim.hours_left(now),
                claim,
            })
            .collect())
    }

    /// Every claim ever payable to `address`, newest first
    pub fn reward_history(&self, address: &Address, limit: usize) -> Result<Vec<RewardClaim>> {
        let mut claims = self.store.claims_for_payee(address, &[])?;
        claims.reverse();
        claims.truncate(limit);
        Ok(claims)
    }

    /// The original claim followed by each claim it was rolled up into
    pub fn rollup_chain(&self, claim_id: &ClaimId) -> Result<Vec<RewardClaim>> {
        let mut current = self
            .store
            .get_claim(claim_id)?
            .ok_or(HiveError::ClaimNotFound(*claim_id))?;

        let mut seen = HashSet::new();
        seen.insert(current.id);
        while let Some(parent) = current.rolled_up_from {
            match self.store.get_claim(&parent)? {
                Some(claim) if seen.insert(claim.id) => current = claim,
                _ => break,
            }
        }

        let mut chain = vec![current];
        while let Some(next) = self.store.forwarded_claim(&chain[chain.len() - 1].id)? {
            if !seen.insert(next.id) {
                break;
            }
            chain.push(next);
        }
        Ok(chain)
    }

    pub fn balance(&self, address: &Address) -> Result<BalanceLedger> {
        self.store
            .get_balance(address)?
            .ok_or_else(|| HiveError::MemberNotFound(address.clone()))
    }
}
