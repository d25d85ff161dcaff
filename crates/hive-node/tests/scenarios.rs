//! End-to-end scenarios through the membership engine

use chrono::{DateTime, Duration, Utc};
use hive_core::{
    units, Address, Amount, BalanceLedger, ClaimId, ClaimStatus, Clock, ManualClock,
    MatrixPosition, MatrixSlot, Member, NotClaimableReason, RewardClaim, Tier,
};
use hive_node::{HiveConfig, MembershipEngine};
use hive_rewards::HiveEvent;
use hive_storage::memory::SNAPSHOT_VERSION;
use hive_storage::{LedgerStore, MemoryStore, StoreSnapshot, StoreStats};
use std::ops::Range;
use std::sync::{Arc, Barrier};
use tempfile::TempDir;

fn addr(s: &str) -> Address {
    Address::new(s)
}

struct Network {
    store: Arc<MemoryStore>,
    clock: ManualClock,
    engine: Arc<MembershipEngine>,
}

impl Network {
    /// Empty network whose first activation gets `first_sequence`
    fn starting_at(first_sequence: u64) -> Self {
        let store = Arc::new(
            MemoryStore::from_snapshot(StoreSnapshot {
                version: SNAPSHOT_VERSION,
                activation_counter: first_sequence - 1,
                ..Default::default()
            })
            .unwrap(),
        );
        Self::over(store)
    }

    fn new() -> Self {
        Self::over(Arc::new(MemoryStore::new()))
    }

    fn over(store: Arc<MemoryStore>) -> Self {
        let clock = ManualClock::new(Utc::now());
        let engine = Arc::new(
            MembershipEngine::new(store.clone(), Arc::new(clock.clone()), &HiveConfig::default())
                .unwrap(),
        );
        Self {
            store,
            clock,
            engine,
        }
    }

    /// Activate `members` in order, each referred by the previous one
    fn chain(&self, members: &[&str]) {
        let mut referrer: Option<Address> = None;
        for member in members {
            self.engine
                .activate(&addr(member), referrer.as_ref())
                .unwrap();
            referrer = Some(addr(member));
        }
    }
}

/// Store whose placement lookups are slow, so concurrent activations of
/// one member all reach claim insertion together
struct SlowPlacementReads(MemoryStore);

impl LedgerStore for SlowPlacementReads {
    fn activate_member(
        &self,
        address: &Address,
        referrer: Option<&Address>,
        at: DateTime<Utc>,
    ) -> hive_core::Result<(Member, bool)> {
        self.0.activate_member(address, referrer, at)
    }

    fn get_member(&self, address: &Address) -> hive_core::Result<Option<Member>> {
        self.0.get_member(address)
    }

    fn set_member_level(&self, address: &Address, level: u8) -> hive_core::Result<Member> {
        self.0.set_member_level(address, level)
    }

    fn activation_count(&self) -> hive_core::Result<u64> {
        self.0.activation_count()
    }

    fn insert_slot(&self, slot: MatrixSlot) -> hive_core::Result<()> {
        self.0.insert_slot(slot)
    }

    fn get_slot(
        &self,
        root: &Address,
        occupant: &Address,
    ) -> hive_core::Result<Option<MatrixSlot>> {
        self.0.get_slot(root, occupant)
    }

    fn slot_at(
        &self,
        root: &Address,
        position: &MatrixPosition,
    ) -> hive_core::Result<Option<MatrixSlot>> {
        self.0.slot_at(root, position)
    }

    fn slots_in_layer(&self, root: &Address, layer: u8) -> hive_core::Result<Vec<MatrixSlot>> {
        self.0.slots_in_layer(root, layer)
    }

    fn layer_occupancy(&self, root: &Address, layer: u8) -> hive_core::Result<u64> {
        self.0.layer_occupancy(root, layer)
    }

    fn first_vacant_index(
        &self,
        root: &Address,
        layer: u8,
        within: Range<u64>,
    ) -> hive_core::Result<Option<u64>> {
        self.0.first_vacant_index(root, layer, within)
    }

    fn slots_for_occupant(&self, occupant: &Address) -> hive_core::Result<Vec<MatrixSlot>> {
        std::thread::sleep(std::time::Duration::from_millis(5));
        self.0.slots_for_occupant(occupant)
    }

    fn insert_claim(&self, claim: RewardClaim) -> hive_core::Result<()> {
        self.0.insert_claim(claim)
    }

    fn get_claim(&self, id: &ClaimId) -> hive_core::Result<Option<RewardClaim>> {
        self.0.get_claim(id)
    }

    fn claims_for_payee(
        &self,
        payee: &Address,
        statuses: &[ClaimStatus],
    ) -> hive_core::Result<Vec<RewardClaim>> {
        self.0.claims_for_payee(payee, statuses)
    }

    fn claims_with_status(&self, statuses: &[ClaimStatus]) -> hive_core::Result<Vec<RewardClaim>> {
        self.0.claims_with_status(statuses)
    }

    fn overdue_claims(&self, now: DateTime<Utc>) -> hive_core::Result<Vec<RewardClaim>> {
        self.0.overdue_claims(now)
    }

    fn transition_claim(
        &self,
        id: &ClaimId,
        from: ClaimStatus,
        to: ClaimStatus,
        now: DateTime<Utc>,
    ) -> hive_core::Result<RewardClaim> {
        self.0.transition_claim(id, from, to, now)
    }

    fn claim_and_credit(
        &self,
        id: &ClaimId,
        payee: &Address,
        now: DateTime<Utc>,
    ) -> hive_core::Result<(RewardClaim, BalanceLedger)> {
        self.0.claim_and_credit(id, payee, now)
    }

    fn roll_up(
        &self,
        original: &ClaimId,
        replacement: RewardClaim,
        now: DateTime<Utc>,
    ) -> hive_core::Result<RewardClaim> {
        self.0.roll_up(original, replacement, now)
    }

    fn forwarded_claim(&self, id: &ClaimId) -> hive_core::Result<Option<RewardClaim>> {
        self.0.forwarded_claim(id)
    }

    fn open_balance(&self, ledger: BalanceLedger) -> hive_core::Result<BalanceLedger> {
        self.0.open_balance(ledger)
    }

    fn get_balance(&self, address: &Address) -> hive_core::Result<Option<BalanceLedger>> {
        self.0.get_balance(address)
    }

    fn apply_level_unlock(
        &self,
        address: &Address,
        level: u8,
        amount: Amount,
    ) -> hive_core::Result<Option<Amount>> {
        self.0.apply_level_unlock(address, level, amount)
    }

    fn stats(&self) -> hive_core::Result<StoreStats> {
        self.0.stats()
    }
}

fn level_two_reward_amount(first_sequence: u64) -> (u64, u8) {
    let net = Network::starting_at(first_sequence - 2);
    net.chain(&["g", "a", "m"]);
    assert_eq!(
        net.engine.member(&addr("m")).unwrap().activation_sequence,
        first_sequence
    );

    net.engine.upgrade(&addr("g"), 2).unwrap();
    let upgrade = net.engine.upgrade(&addr("m"), 2).unwrap();

    assert_eq!(upgrade.rewards.len(), 1);
    let claim = &upgrade.rewards[0];
    assert_eq!(claim.root_address, addr("g"));
    assert_eq!(claim.layer, 2);
    assert_eq!(claim.status, ClaimStatus::Claimable);
    assert_eq!(claim.expires_at, claim.created_at + Duration::hours(72));
    (claim.amount, claim.tier)
}

#[test]
fn scenario_a_tier_one_pays_full_price() {
    assert_eq!(level_two_reward_amount(5_000), (units(150), 1));
}

#[test]
fn scenario_b_tier_two_pays_half() {
    assert_eq!(level_two_reward_amount(15_000), (units(75), 2));
}

/// g <- r <- a <- m; m reaching level 2 owes r, who is still level 1
fn pending_reward_network() -> (Network, hive_core::RewardClaim) {
    let net = Network::new();
    net.chain(&["g", "r", "a", "m"]);
    net.engine.upgrade(&addr("g"), 2).unwrap();

    let upgrade = net.engine.upgrade(&addr("m"), 2).unwrap();
    assert_eq!(upgrade.rewards.len(), 1);
    let claim = upgrade.rewards[0].clone();
    assert_eq!(claim.root_address, addr("r"));
    assert_eq!(claim.status, ClaimStatus::Pending);
    (net, claim)
}

#[test]
fn scenario_c_upgrade_just_before_expiry_allows_claim() {
    let (net, claim) = pending_reward_network();

    net.clock
        .advance(Duration::hours(72) - Duration::minutes(10));
    let upgrade = net.engine.upgrade(&addr("r"), 2).unwrap();
    assert_eq!(upgrade.promoted.len(), 1);
    assert_eq!(upgrade.promoted[0].id, claim.id);

    let result = net.engine.claim(&claim.id, &addr("r")).unwrap();
    assert!(result.success);
    assert_eq!(result.amount, units(150));
    assert_eq!(result.new_balance, units(150));
    assert_eq!(
        net.engine.claim_record(&claim.id).unwrap().status,
        ClaimStatus::Claimed
    );
}

#[test]
fn scenario_c_upgrade_just_after_expiry_rolls_up() {
    let (net, claim) = pending_reward_network();

    net.clock
        .advance(Duration::hours(72) + Duration::minutes(10));
    let upgrade = net.engine.upgrade(&addr("r"), 2).unwrap();
    assert!(upgrade.promoted.is_empty());

    let err = net.engine.claim(&claim.id, &addr("r")).unwrap_err();
    assert_eq!(err.kind(), "not_claimable");

    let report = net.engine.sweep_once();
    assert!(report.rolled_up >= 1);

    let chain = net.engine.rollup_chain(&claim.id).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].status, ClaimStatus::RolledUp);
    assert_eq!(chain[1].root_address, addr("g"));
    assert_eq!(chain[1].status, ClaimStatus::Claimable);
    assert_eq!(
        net.engine.balance(&addr("r")).unwrap().claimable_usdt_total,
        0
    );
}

#[test]
fn scenario_d_forfeit_credits_nobody() {
    let net = Network::new();
    let names: Vec<String> = std::iter::once("g".to_string())
        .chain((1..=12).map(|i| format!("c{}", i)))
        .chain(std::iter::once("m".to_string()))
        .collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    net.chain(&refs);

    // g qualifies but sits 11 referral hops above c11
    net.engine.upgrade(&addr("g"), 2).unwrap();
    let upgrade = net.engine.upgrade(&addr("m"), 2).unwrap();
    assert_eq!(upgrade.rewards.len(), 1);
    let claim = upgrade.rewards[0].clone();
    assert_eq!(claim.root_address, addr("c11"));

    net.clock.advance(Duration::hours(73));
    let report = net.engine.sweep_once();
    assert_eq!(report.errors, 0);

    assert_eq!(
        net.engine.claim_record(&claim.id).unwrap().status,
        ClaimStatus::Forfeited
    );
    assert_eq!(net.engine.rollup_chain(&claim.id).unwrap().len(), 1);
    for name in &names {
        assert_eq!(
            net.engine.balance(&addr(name)).unwrap().claimable_usdt_total,
            0
        );
    }
}

#[test]
fn rollup_chain_conserves_amount() {
    let net = Network::new();
    net.chain(&["g", "h", "r", "a", "m"]);
    net.engine.upgrade(&addr("g"), 2).unwrap();
    net.engine.upgrade(&addr("h"), 2).unwrap();
    let original = net.engine.upgrade(&addr("m"), 2).unwrap().rewards[0].clone();
    assert_eq!(original.root_address, addr("r"));

    net.clock.advance(Duration::hours(73));
    net.engine.sweep_once();
    net.clock.advance(Duration::hours(73));
    net.engine.sweep_once();

    let chain = net.engine.rollup_chain(&original.id).unwrap();
    let payees: Vec<&str> = chain.iter().map(|c| c.root_address.as_str()).collect();
    assert_eq!(payees, vec!["r", "h", "g"]);
    assert!(chain.iter().all(|c| c.amount == original.amount));
    assert!(chain.iter().all(|c| c.triggered_by == addr("m")));

    let last = chain.last().unwrap();
    assert_eq!(last.expires_at, net.clock.now() + Duration::hours(72));
    let result = net.engine.claim(&last.id, &addr("g")).unwrap();
    assert_eq!(result.amount, original.amount);
}

#[test]
fn placement_is_idempotent_across_replays() {
    let net = Network::new();
    net.chain(&["g", "a"]);
    let first = net.engine.activate(&addr("b"), Some(&addr("a"))).unwrap();
    let again = net.engine.activate(&addr("b"), Some(&addr("a"))).unwrap();

    assert!(first.created);
    assert!(!again.created);
    assert_eq!(first.placements, again.placements);
    // a's matrix and g's matrix
    assert_eq!(first.placements.len(), 2);
    assert_eq!(net.engine.placements_of(&addr("b")).unwrap().len(), 2);
}

#[test]
fn concurrent_activations_fill_distinct_cells() {
    let net = Network::new();
    net.engine.activate(&addr("g"), None).unwrap();

    std::thread::scope(|scope| {
        for t in 0..4 {
            let engine = net.engine.clone();
            scope.spawn(move || {
                for i in 0..10 {
                    engine
                        .activate(&addr(&format!("t{}-{}", t, i)), Some(&addr("g")))
                        .unwrap();
                }
            });
        }
    });

    let stats = net.engine.matrix_stats(&addr("g")).unwrap();
    assert_eq!(stats.team_size, 40);
    assert_eq!(stats.direct_referrals, 3);
    for layer in &stats.layers {
        assert!(layer.occupied <= layer.capacity);
    }
    assert_eq!(stats.layer(3).unwrap().occupied, 27);
    assert_eq!(stats.layer(4).unwrap().occupied, 1);
}

#[test]
fn concurrent_activation_retries_reward_once() {
    let store = Arc::new(SlowPlacementReads(MemoryStore::new()));
    let engine = MembershipEngine::new(
        store.clone(),
        Arc::new(ManualClock::new(Utc::now())),
        &HiveConfig::default(),
    )
    .unwrap();
    engine.activate(&addr("g"), None).unwrap();

    let barrier = Barrier::new(4);
    let rewarded: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    engine.activate(&addr("a"), Some(&addr("g"))).unwrap().rewards.len()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(rewarded, 1);
    let claims = store.claims_for_payee(&addr("g"), &[]).unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].amount, units(100));
    assert_eq!(engine.placements_of(&addr("a")).unwrap().len(), 1);
}

#[test]
fn concurrent_claims_pay_exactly_once() {
    let net = Network::new();
    net.chain(&["g", "a"]);
    let claim = net.engine.claimable_rewards(&addr("g")).unwrap()[0]
        .claim
        .clone();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = net.engine.clone();
                let id = claim.id;
                scope.spawn(move || engine.claim(&id, &addr("g")))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(
            err.not_claimable_reason(),
            Some(NotClaimableReason::AlreadyClaimed)
        );
    }
    assert_eq!(
        net.engine.balance(&addr("g")).unwrap().claimable_usdt_total,
        claim.amount
    );
}

#[test]
fn tier_advances_at_boundary() {
    let net = Network::starting_at(9_998);
    let mut events = net.engine.subscribe();
    net.chain(&["g", "a"]);

    assert_eq!(net.engine.tier_state().unwrap().current_tier, Tier::Two);
    let advanced: Vec<HiveEvent> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, HiveEvent::TierAdvanced { .. }))
        .collect();
    assert_eq!(
        advanced,
        vec![HiveEvent::TierAdvanced {
            from: Tier::One,
            to: Tier::Two,
            activation_count: 9_999,
        }]
    );

    // sequence 10_000 pays half
    let b = net.engine.activate(&addr("b"), Some(&addr("g"))).unwrap();
    assert_eq!(b.rewards[0].amount, units(50));
}

#[test]
fn snapshot_restores_claims_and_rollups() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");

    let net = Network::new();
    net.chain(&["g", "r", "a", "m"]);
    net.engine.upgrade(&addr("g"), 2).unwrap();
    let original = net.engine.upgrade(&addr("m"), 2).unwrap().rewards[0].clone();
    net.clock.advance(Duration::hours(73));
    net.engine.sweep_once();
    net.store.save(&path).unwrap();

    let restored = Network::over(Arc::new(MemoryStore::load(&path).unwrap()));
    let chain = restored.engine.rollup_chain(&original.id).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].root_address, addr("g"));
    assert_eq!(
        restored.engine.matrix_view(&addr("r"), 2).unwrap()[0].occupant,
        addr("m")
    );

    let next = restored
        .engine
        .activate(&addr("n"), Some(&addr("g")))
        .unwrap();
    assert_eq!(next.member.activation_sequence, 5);
}
