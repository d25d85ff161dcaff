//! # Expiry Rollup Scheduler
//!
//! One sweep pass over claims whose window has closed:
//!
//! ```text
//!   pending/claimable ──(expires_at < now)──► expired
//!                                               │
//!          walk direct referrers, at most N hops, for level >= trigger level
//!                       │                                  │
//!                    found                              not found
//!                       ▼                                  ▼
//!   original: rolled_up, new claimable claim      original: forfeited
//!   for the upline with a fresh window            (nobody is credited)
//! ```
//!
//! Every status change is a compare-and-set in the store. A claim that a
//! user claims concurrently makes the sweep's transition fail; the sweep
//! counts it as skipped and moves on. A claim stranded in `expired` by an
//! interrupted pass is picked up again by the next one.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashSet;
use hive_core::{Address, ClaimId, ClaimStatus, Clock, HiveError, Result, RewardClaim};
use hive_storage::LedgerStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, HiveEvent};

/// Sweep configuration
#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// Referral hops walked before forfeiting
    pub hop_cap: u32,
    /// Window of a rolled-up claim
    pub window: Duration,
    /// Expiring-soon reminder thresholds in hours
    pub reminder_thresholds: Vec<i64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            hop_cap: hive_core::constants::ROLLUP_HOP_CAP,
            window: Duration::hours(hive_core::constants::REWARD_WINDOW_HOURS),
            reminder_thresholds: hive_core::constants::REMINDER_THRESHOLDS_HOURS.to_vec(),
        }
    }
}

/// Result of one sweep pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Overdue claims examined
    pub scanned: u64,
    pub rolled_up: u64,
    pub forfeited: u64,
    /// Lost a race to a concurrent transition; retried next pass
    pub skipped: u64,
    /// Storage failures; retried next pass
    pub errors: u64,
    /// Expiring-soon reminders sent
    pub reminders: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.scanned == 0 && self.reminders == 0
    }
}

enum Outcome {
    RolledUp,
    Forfeited,
}

/// Periodic expiry and rollup of reward claims
pub struct ExpiryRollupScheduler {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    config: SweepConfig,
    /// (claim, threshold hours) pairs already reminded
    reminded: DashSet<(ClaimId, i64)>,
}

impl ExpiryRollupScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            config,
            reminded: DashSet::new(),
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run one sweep pass. Failures are logged and counted, never raised.
    pub fn sweep_once(&self) -> SweepReport {
        let started = Instant::now();
        let now = self.clock.now();
        let mut report = SweepReport {
            started_at: Some(now),
            ..Default::default()
        };

        match self.store.overdue_claims(now) {
            Ok(overdue) => {
                for claim in overdue {
                    report.scanned += 1;
                    match self.process_overdue(&claim, now) {
                        Ok(Outcome::RolledUp) => report.rolled_up += 1,
                        Ok(Outcome::Forfeited) => report.forfeited += 1,
                        Err(err) if err.is_retryable() => {
                            debug!("Skipping reward {}: {}", claim.id, err);
                            report.skipped += 1;
                        }
                        Err(err) => {
                            error!("Sweep failed on reward {}: {}", claim.id, err);
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(err) => {
                error!("Could not load overdue rewards: {}", err);
                report.errors += 1;
            }
        }

        match self.send_reminders(now) {
            Ok(sent) => report.reminders = sent,
            Err(err) => {
                error!("Could not scan rewards for reminders: {}", err);
                report.errors += 1;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        if !report.is_idle() {
            info!(
                "Sweep: {} overdue, {} rolled up, {} forfeited, {} skipped, {} reminders",
                report.scanned, report.rolled_up, report.forfeited, report.skipped, report.reminders
            );
        }
        report
    }

    fn process_overdue(&self, claim: &RewardClaim, now: DateTime<Utc>) -> Result<Outcome> {
        let expired = if claim.status == ClaimStatus::Expired {
            claim.clone()
        } else {
            self.store
                .transition_claim(&claim.id, claim.status, ClaimStatus::Expired, now)?
        };
        self.forget_reminders(&expired.id);

        match self.find_qualified_upline(&expired)? {
            Some(upline) => {
                let replacement = expired.forwarded_to(upline, now, self.config.window);
                let forwarded = self.store.roll_up(&expired.id, replacement, now)?;

                info!(
                    "Reward {} rolled up from {} to {} as {}",
                    expired.id, expired.root_address, forwarded.root_address, forwarded.id
                );
                self.events.publish(HiveEvent::RewardRolledUp {
                    claim_id: expired.id,
                    new_claim_id: forwarded.id,
                    from: expired.root_address.clone(),
                    to: forwarded.root_address.clone(),
                    amount: forwarded.amount,
                });
                Ok(Outcome::RolledUp)
            }
            None => {
                warn!(
                    "{}; forfeiting {}",
                    HiveError::NoQualifiedUpline {
                        claim_id: expired.id,
                        hops: self.config.hop_cap,
                    },
                    hive_core::format_amount(expired.amount)
                );
                self.store.transition_claim(
                    &expired.id,
                    ClaimStatus::Expired,
                    ClaimStatus::Forfeited,
                    now,
                )?;
                self.events.publish(HiveEvent::RewardForfeited {
                    claim_id: expired.id,
                    root_address: expired.root_address.clone(),
                    amount: expired.amount,
                });
                Ok(Outcome::Forfeited)
            }
        }
    }

    /// First direct-referrer ancestor of the claim's payee holding the
    /// trigger level, within the hop cap
    fn find_qualified_upline(&self, claim: &RewardClaim) -> Result<Option<Address>> {
        let mut next = match self.store.get_member(&claim.root_address)? {
            Some(payee) => payee.referrer,
            None => {
                warn!("Payee {} of reward {} is not a member", claim.root_address, claim.id);
                None
            }
        };

        let mut hops = 0;
        while let Some(address) = next {
            if hops >= self.config.hop_cap {
                break;
            }
            hops += 1;

            let ancestor = match self.store.get_member(&address)? {
                Some(member) => member,
                None => {
                    warn!("Referral chain of {} breaks at {}", claim.root_address, address);
                    break;
                }
            };
            if ancestor.qualifies_for(claim.trigger_level) {
                debug!("Reward {} qualifies {} after {} hops", claim.id, address, hops);
                return Ok(Some(address));
            }
            next = ancestor.referrer;
        }
        Ok(None)
    }

    /// Emit `RewardExpiringSoon` once per claim per crossed threshold
    fn send_reminders(&self, now: DateTime<Utc>) -> Result<u64> {
        if self.config.reminder_thresholds.is_empty() {
            return Ok(0);
        }

        let open = self.store.claims_with_status(&ClaimStatus::OPEN)?;
        // Claims paid out or closed since the last pass
        let open_ids: HashSet<ClaimId> = open.iter().map(|c| c.id).collect();
        self.reminded.retain(|(id, _)| open_ids.contains(id));

        let mut sent = 0;
        for claim in open {
            if !claim.is_within_window(now) {
                continue;
            }
            let left = claim.expires_at - now;

            let mut tightest = None;
            let mut fresh = false;
            for &threshold in &self.config.reminder_thresholds {
                if left > Duration::hours(threshold) {
                    continue;
                }
                fresh |= self.reminded.insert((claim.id, threshold));
                tightest = Some(tightest.map_or(threshold, |t: i64| t.min(threshold)));
            }

            if let (true, Some(threshold_hours)) = (fresh, tightest) {
                self.events.publish(HiveEvent::RewardExpiringSoon {
                    claim_id: claim.id,
                    root_address: claim.root_address.clone(),
                    amount: claim.amount,
                    hours_left: claim.hours_left(now),
                    threshold_hours,
                });
                sent += 1;
            }
        }
        Ok(sent)
    }

    fn forget_reminders(&self, claim_id: &ClaimId) {
        for &threshold in &self.config.reminder_thresholds {
            self.reminded.remove(&(*claim_id, threshold));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::{units, BalanceLedger, ManualClock, Member};
    use hive_storage::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: ManualClock,
        events: EventBus,
        sweeper: ExpiryRollupScheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc::now());
        let events = EventBus::default();
        let sweeper = ExpiryRollupScheduler::new(
            store.clone(),
            Arc::new(clock.clone()),
            events.clone(),
            SweepConfig::default(),
        );
        Fixture {
            store,
            clock,
            events,
            sweeper,
        }
    }

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    /// Referral chain m0 <- m1 <- ... <- m{len-1}, all at `level`
    fn chain(f: &Fixture, len: usize, level: u8) -> Vec<Member> {
        let now = f.clock.now();
        let mut members = Vec::new();
        for i in 0..len {
            let referrer = (i > 0).then(|| addr(&format!("m{}", i - 1)));
            let (member, _) = f
                .store
                .activate_member(&addr(&format!("m{}", i)), referrer.as_ref(), now)
                .unwrap();
            members.push(f.store.set_member_level(&member.address, level).unwrap());
        }
        members
    }

    fn open_claim(f: &Fixture, payee: &str, trigger_level: u8, status: ClaimStatus) -> RewardClaim {
        let claim = RewardClaim::new(
            addr(payee),
            addr("trigger"),
            trigger_level,
            trigger_level,
            units(150),
            1,
            status,
            f.clock.now(),
            Duration::hours(72),
        );
        f.store.insert_claim(claim.clone()).unwrap();
        claim
    }

    #[test]
    fn test_rolls_up_to_first_qualified_referrer() {
        let f = fixture();
        chain(&f, 4, 1);
        f.store.set_member_level(&addr("m1"), 3).unwrap();
        let claim = open_claim(&f, "m3", 3, ClaimStatus::Pending);

        f.clock.advance(Duration::hours(73));
        let report = f.sweeper.sweep_once();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.rolled_up, 1);

        let original = f.store.get_claim(&claim.id).unwrap().unwrap();
        assert_eq!(original.status, ClaimStatus::RolledUp);
        let forwarded = f.store.forwarded_claim(&claim.id).unwrap().unwrap();
        assert_eq!(forwarded.root_address, addr("m1"));
        assert_eq!(forwarded.status, ClaimStatus::Claimable);
        assert_eq!(forwarded.amount, claim.amount);
        assert_eq!(forwarded.triggered_by, claim.triggered_by);
        assert_eq!(forwarded.expires_at, f.clock.now() + Duration::hours(72));
    }

    #[test]
    fn test_forfeits_beyond_hop_cap() {
        let f = fixture();
        let members = chain(&f, 12, 1);
        // Only the root of the chain qualifies, 11 hops up
        f.store.set_member_level(&addr("m0"), 5).unwrap();
        for m in &members {
            f.store
                .open_balance(BalanceLedger::new(m.address.clone(), 0, 0))
                .unwrap();
        }
        let claim = open_claim(&f, "m11", 5, ClaimStatus::Claimable);

        f.clock.advance(Duration::hours(73));
        let report = f.sweeper.sweep_once();
        assert_eq!(report.forfeited, 1);

        let original = f.store.get_claim(&claim.id).unwrap().unwrap();
        assert_eq!(original.status, ClaimStatus::Forfeited);
        assert!(original.processed_at.is_some());
        for m in &members {
            let balance = f.store.get_balance(&m.address).unwrap().unwrap();
            assert_eq!(balance.claimable_usdt_total, 0);
        }
    }

    #[test]
    fn test_rolls_up_at_hop_cap() {
        let f = fixture();
        chain(&f, 12, 1);
        // m1 is exactly 10 hops above m11, m0 would be 11
        f.store.set_member_level(&addr("m1"), 5).unwrap();
        f.store.set_member_level(&addr("m0"), 5).unwrap();
        let claim = open_claim(&f, "m11", 5, ClaimStatus::Claimable);

        f.clock.advance(Duration::hours(73));
        let report = f.sweeper.sweep_once();
        assert_eq!(report.rolled_up, 1);
        assert_eq!(report.forfeited, 0);

        let forwarded = f.store.forwarded_claim(&claim.id).unwrap().unwrap();
        assert_eq!(forwarded.root_address, addr("m1"));
        assert_eq!(forwarded.amount, claim.amount);
    }

    #[test]
    fn test_boundary_is_strict() {
        let f = fixture();
        chain(&f, 2, 2);
        let claim = open_claim(&f, "m1", 2, ClaimStatus::Claimable);

        f.clock.set(claim.expires_at);
        assert_eq!(f.sweeper.sweep_once().scanned, 0);

        f.clock.advance(Duration::milliseconds(1));
        assert_eq!(f.sweeper.sweep_once().rolled_up, 1);
    }

    #[test]
    fn test_resumes_stranded_expired_claim() {
        let f = fixture();
        chain(&f, 2, 2);
        let claim = open_claim(&f, "m1", 2, ClaimStatus::Claimable);
        f.clock.advance(Duration::hours(80));
        f.store
            .transition_claim(&claim.id, ClaimStatus::Claimable, ClaimStatus::Expired, f.clock.now())
            .unwrap();

        let report = f.sweeper.sweep_once();
        assert_eq!(report.rolled_up, 1);
        // The forwarded claim has a fresh window
        assert_eq!(f.sweeper.sweep_once().scanned, 0);
    }

    #[test]
    fn test_rolled_up_claim_can_roll_again() {
        let f = fixture();
        chain(&f, 3, 2);
        let claim = open_claim(&f, "m2", 2, ClaimStatus::Claimable);

        f.clock.advance(Duration::hours(73));
        f.sweeper.sweep_once();
        f.clock.advance(Duration::hours(73));
        f.sweeper.sweep_once();

        let first = f.store.forwarded_claim(&claim.id).unwrap().unwrap();
        let second = f.store.forwarded_claim(&first.id).unwrap().unwrap();
        assert_eq!(first.root_address, addr("m1"));
        assert_eq!(second.root_address, addr("m0"));
        assert_eq!(second.amount, claim.amount);
    }

    #[test]
    fn test_reminders_once_per_threshold() {
        let f = fixture();
        chain(&f, 1, 1);
        open_claim(&f, "m0", 1, ClaimStatus::Claimable);
        let mut rx = f.events.subscribe();

        f.clock.advance(Duration::hours(40));
        assert_eq!(f.sweeper.sweep_once().reminders, 0);

        f.clock.advance(Duration::hours(10)); // 22h left
        assert_eq!(f.sweeper.sweep_once().reminders, 1);
        assert_eq!(f.sweeper.sweep_once().reminders, 0);

        f.clock.advance(Duration::hours(18)); // 4h left
        assert_eq!(f.sweeper.sweep_once().reminders, 1);

        let mut thresholds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let HiveEvent::RewardExpiringSoon {
                threshold_hours, ..
            } = event
            {
                thresholds.push(threshold_hours);
            }
        }
        assert_eq!(thresholds, vec![24, 6]);
    }

    #[test]
    fn test_reminders_dropped_once_claim_closes() {
        let f = fixture();
        chain(&f, 1, 1);
        let claim = open_claim(&f, "m0", 1, ClaimStatus::Claimable);

        f.clock.advance(Duration::hours(70));
        assert_eq!(f.sweeper.sweep_once().reminders, 1);
        assert_eq!(f.sweeper.reminded.len(), 2);

        f.store
            .claim_and_credit(&claim.id, &addr("m0"), f.clock.now())
            .unwrap();
        assert_eq!(f.sweeper.sweep_once().reminders, 0);
        assert!(f.sweeper.reminded.is_empty());
    }
}
