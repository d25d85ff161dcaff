//! In-memory ledger store with JSON snapshots
//!
//! All tables sit behind one `RwLock` so multi-row operations such as
//! `claim_and_credit` and `roll_up` commit as a unit.

use crate::{LedgerStore, StoreStats};
use chrono::{DateTime, Utc};
use hive_core::{
    layer_capacity, validate_level, Address, Amount, BalanceLedger, ClaimId, ClaimStatus,
    HiveError, MatrixPosition, MatrixSlot, Member, NotClaimableReason, Result, RewardClaim,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// One member's matrix
#[derive(Default)]
struct MatrixTable {
    cells: BTreeMap<MatrixPosition, MatrixSlot>,
    by_occupant: HashMap<Address, MatrixPosition>,
    layer_counts: HashMap<u8, u64>,
}

impl MatrixTable {
    fn layer(&self, layer: u8) -> Result<btree_map::Range<'_, MatrixPosition, MatrixSlot>> {
        let first = MatrixPosition::from_index(layer, 0)?;
        let last = MatrixPosition::from_index(layer, layer_capacity(layer) - 1)?;
        Ok(self.cells.range(first..=last))
    }

    fn occupancy(&self, layer: u8) -> u64 {
        self.layer_counts.get(&layer).copied().unwrap_or(0)
    }

    fn first_vacant_index(&self, layer: u8, within: Range<u64>) -> Result<Option<u64>> {
        // Validates the layer even when the stretch is empty
        MatrixPosition::from_index(layer, 0)?;
        let end = within.end.min(layer_capacity(layer));
        if within.start >= end {
            return Ok(None);
        }

        let first = MatrixPosition::from_index(layer, within.start)?;
        let last = MatrixPosition::from_index(layer, end - 1)?;
        let mut expected = within.start;
        for position in self.cells.range(first..=last).map(|(position, _)| position) {
            if position.index() != expected {
                return Ok(Some(expected));
            }
            expected += 1;
        }
        Ok((expected < end).then_some(expected))
    }
}

#[derive(Default)]
struct Tables {
    activation_counter: u64,
    members: HashMap<Address, Member>,
    matrices: HashMap<Address, MatrixTable>,
    /// occupant -> roots of the matrices they sit in
    placements: HashMap<Address, Vec<Address>>,
    claims: HashMap<ClaimId, RewardClaim>,
    claims_by_payee: HashMap<Address, Vec<ClaimId>>,
    /// original claim -> claim it was rolled up into
    forwarded: HashMap<ClaimId, ClaimId>,
    /// (payee, trigger, level) of every claim that is not a rollup
    reward_keys: HashSet<(Address, Address, u8)>,
    balances: HashMap<Address, BalanceLedger>,
}

impl Tables {
    fn insert_slot_row(&mut self, slot: MatrixSlot) -> Result<()> {
        if slot.position.is_root() {
            return Err(HiveError::InvalidPosition(
                "the root position cannot hold a slot".into(),
            ));
        }
        if slot.occupant == slot.matrix_root {
            return Err(HiveError::SelfPlacement(slot.occupant));
        }

        let matrix = self.matrices.entry(slot.matrix_root.clone()).or_default();
        if matrix.by_occupant.contains_key(&slot.occupant) {
            return Err(HiveError::DuplicatePlacement {
                root: slot.matrix_root,
                occupant: slot.occupant,
            });
        }
        if matrix.cells.contains_key(&slot.position) {
            return Err(HiveError::CellOccupied {
                root: slot.matrix_root,
                position: slot.position.to_string(),
            });
        }

        *matrix.layer_counts.entry(slot.layer()).or_insert(0) += 1;
        matrix
            .by_occupant
            .insert(slot.occupant.clone(), slot.position.clone());
        self.placements
            .entry(slot.occupant.clone())
            .or_default()
            .push(slot.matrix_root.clone());
        matrix.cells.insert(slot.position.clone(), slot);
        Ok(())
    }

    fn insert_claim_row(&mut self, claim: RewardClaim) -> Result<()> {
        if self.claims.contains_key(&claim.id) {
            return Err(HiveError::Storage(format!("duplicate claim id {}", claim.id)));
        }
        match claim.rolled_up_from {
            Some(from) => {
                self.forwarded.insert(from, claim.id);
            }
            None => {
                let key = (
                    claim.root_address.clone(),
                    claim.triggered_by.clone(),
                    claim.trigger_level,
                );
                if !self.reward_keys.insert(key) {
                    return Err(HiveError::DuplicateReward {
                        payee: claim.root_address,
                        triggered_by: claim.triggered_by,
                        level: claim.trigger_level,
                    });
                }
            }
        }
        self.claims_by_payee
            .entry(claim.root_address.clone())
            .or_default()
            .push(claim.id);
        self.claims.insert(claim.id, claim);
        Ok(())
    }

    fn open_claims(&self) -> u64 {
        self.claims.values().filter(|c| c.status.is_open()).count() as u64
    }
}

fn oldest_first(mut claims: Vec<RewardClaim>) -> Vec<RewardClaim> {
    claims.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    claims
}

fn status_matches(status: ClaimStatus, statuses: &[ClaimStatus]) -> bool {
    statuses.is_empty() || statuses.contains(&status)
}

/// Serialisable copy of every table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub taken_at: Option<DateTime<Utc>>,
    pub activation_counter: u64,
    pub members: Vec<Member>,
    pub slots: Vec<MatrixSlot>,
    pub claims: Vec<RewardClaim>,
    pub balances: Vec<BalanceLedger>,
}

/// In-memory [`LedgerStore`]
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every table into a snapshot
    pub fn snapshot(&self) -> StoreSnapshot {
        let tables = self.tables.read();

        let mut members: Vec<Member> = tables.members.values().cloned().collect();
        members.sort_by_key(|m| m.activation_sequence);

        let mut slots: Vec<MatrixSlot> = tables
            .matrices
            .values()
            .flat_map(|matrix| matrix.cells.values().cloned())
            .collect();
        slots.sort_by(|a, b| {
            a.matrix_root
                .cmp(&b.matrix_root)
                .then_with(|| a.position.cmp(&b.position))
        });

        let mut balances: Vec<BalanceLedger> = tables.balances.values().cloned().collect();
        balances.sort_by(|a, b| a.address.cmp(&b.address));

        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: Some(Utc::now()),
            activation_counter: tables.activation_counter,
            members,
            slots,
            claims: oldest_first(tables.claims.values().cloned().collect()),
            balances,
        }
    }

    /// Rebuild a store and its indexes from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(HiveError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut tables = Tables::default();
        let highest_sequence = snapshot
            .members
            .iter()
            .map(|m| m.activation_sequence)
            .max()
            .unwrap_or(0);
        tables.activation_counter = snapshot.activation_counter.max(highest_sequence);

        for member in snapshot.members {
            tables.members.insert(member.address.clone(), member);
        }
        for slot in snapshot.slots {
            tables.insert_slot_row(slot)?;
        }
        // Originals sort before their rollups, but the index does not depend on it
        for claim in snapshot.claims {
            tables.insert_claim_row(claim)?;
        }
        for balance in snapshot.balances {
            tables.balances.insert(balance.address.clone(), balance);
        }

        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Write a JSON snapshot, replacing `path` atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| HiveError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| HiveError::Storage(e.to_string()))?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| HiveError::Storage(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| HiveError::Storage(e.to_string()))?;

        info!(
            "Saved snapshot to {} ({} members, {} claims)",
            path.display(),
            snapshot.members.len(),
            snapshot.claims.len()
        );
        Ok(())
    }

    /// Load a JSON snapshot
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| HiveError::Storage(e.to_string()))?;
        let snapshot: StoreSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| HiveError::Serialization(e.to_string()))?;
        debug!("Loaded snapshot from {}", path.display());
        Self::from_snapshot(snapshot)
    }

    /// Load `path` if it exists, otherwise start empty
    pub fn open(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No snapshot at {}, starting with an empty ledger", path.display());
            Ok(Self::new())
        }
    }
}

impl LedgerStore for MemoryStore {
    // ==================== Members ====================

    fn activate_member(
        &self,
        address: &Address,
        referrer: Option<&Address>,
        at: DateTime<Utc>,
    ) -> Result<(Member, bool)> {
        let mut tables = self.tables.write();

        if let Some(existing) = tables.members.get(address) {
            if existing.referrer.as_ref() == referrer {
                return Ok((existing.clone(), false));
            }
            return Err(HiveError::AlreadyActivated {
                address: address.clone(),
                referrer: existing.referrer.clone(),
            });
        }

        match referrer {
            Some(referrer) if !tables.members.contains_key(referrer) => {
                return Err(HiveError::UnknownReferrer(referrer.clone()));
            }
            None if !tables.members.is_empty() => {
                return Err(HiveError::MissingReferrer(address.clone()));
            }
            _ => {}
        }

        tables.activation_counter += 1;
        let member = Member {
            address: address.clone(),
            current_level: 1,
            activation_sequence: tables.activation_counter,
            referrer: referrer.cloned(),
            activated_at: at,
        };
        tables.members.insert(address.clone(), member.clone());
        Ok((member, true))
    }

    fn get_member(&self, address: &Address) -> Result<Option<Member>> {
        Ok(self.tables.read().members.get(address).cloned())
    }

    fn set_member_level(&self, address: &Address, level: u8) -> Result<Member> {
        validate_level(level)?;
        let mut tables = self.tables.write();
        let member = tables
            .members
            .get_mut(address)
            .ok_or_else(|| HiveError::MemberNotFound(address.clone()))?;

        if level < member.current_level {
            return Err(HiveError::LevelRegression {
                address: address.clone(),
                current: member.current_level,
                requested: level,
            });
        }
        member.current_level = level;
        Ok(member.clone())
    }

    fn activation_count(&self) -> Result<u64> {
        Ok(self.tables.read().activation_counter)
    }

    // ==================== Matrix slots ====================

    fn insert_slot(&self, slot: MatrixSlot) -> Result<()> {
        self.tables.write().insert_slot_row(slot)
    }

    fn get_slot(&self, root: &Address, occupant: &Address) -> Result<Option<MatrixSlot>> {
        let tables = self.tables.read();
        Ok(tables.matrices.get(root).and_then(|matrix| {
            matrix
                .by_occupant
                .get(occupant)
                .and_then(|position| matrix.cells.get(position))
                .cloned()
        }))
    }

    fn slot_at(&self, root: &Address, position: &MatrixPosition) -> Result<Option<MatrixSlot>> {
        let tables = self.tables.read();
        Ok(tables
            .matrices
            .get(root)
            .and_then(|matrix| matrix.cells.get(position))
            .cloned())
    }

    fn slots_in_layer(&self, root: &Address, layer: u8) -> Result<Vec<MatrixSlot>> {
        let tables = self.tables.read();
        match tables.matrices.get(root) {
            Some(matrix) => Ok(matrix.layer(layer)?.map(|(_, slot)| slot.clone()).collect()),
            None => Ok(Vec::new()),
        }
    }

    fn layer_occupancy(&self, root: &Address, layer: u8) -> Result<u64> {
        let tables = self.tables.read();
        Ok(tables
            .matrices
            .get(root)
            .map(|matrix| matrix.occupancy(layer))
            .unwrap_or(0))
    }

    fn first_vacant_index(
        &self,
        root: &Address,
        layer: u8,
        within: Range<u64>,
    ) -> Result<Option<u64>> {
        let tables = self.tables.read();
        match tables.matrices.get(root) {
            Some(matrix) => matrix.first_vacant_index(layer, within),
            None => MatrixTable::default().first_vacant_index(layer, within),
        }
    }

    fn slots_for_occupant(&self, occupant: &Address) -> Result<Vec<MatrixSlot>> {
        let tables = self.tables.read();
        let roots = match tables.placements.get(occupant) {
            Some(roots) => roots,
            None => return Ok(Vec::new()),
        };
        Ok(roots
            .iter()
            .filter_map(|root| {
                let matrix = tables.matrices.get(root)?;
                let position = matrix.by_occupant.get(occupant)?;
                matrix.cells.get(position).cloned()
            })
            .collect())
    }

    // ==================== Reward claims ====================

    fn insert_claim(&self, claim: RewardClaim) -> Result<()> {
        self.tables.write().insert_claim_row(claim)
    }

    fn get_claim(&self, id: &ClaimId) -> Result<Option<RewardClaim>> {
        Ok(self.tables.read().claims.get(id).cloned())
    }

    fn claims_for_payee(
        &self,
        payee: &Address,
        statuses: &[ClaimStatus],
    ) -> Result<Vec<RewardClaim>> {
        let tables = self.tables.read();
        let claims = tables
            .claims_by_payee
            .get(payee)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.claims.get(id))
                    .filter(|c| status_matches(c.status, statuses))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(oldest_first(claims))
    }

    fn claims_with_status(&self, statuses: &[ClaimStatus]) -> Result<Vec<RewardClaim>> {
        let tables = self.tables.read();
        let claims = tables
            .claims
            .values()
            .filter(|c| status_matches(c.status, statuses))
            .cloned()
            .collect();
        Ok(oldest_first(claims))
    }

    fn overdue_claims(&self, now: DateTime<Utc>) -> Result<Vec<RewardClaim>> {
        let tables = self.tables.read();
        let claims = tables
            .claims
            .values()
            .filter(|c| c.is_overdue(now) || c.status == ClaimStatus::Expired)
            .cloned()
            .collect();
        Ok(oldest_first(claims))
    }

    fn transition_claim(
        &self,
        id: &ClaimId,
        from: ClaimStatus,
        to: ClaimStatus,
        now: DateTime<Utc>,
    ) -> Result<RewardClaim> {
        if !from.can_transition_to(to) {
            return Err(HiveError::InvalidTransition {
                claim_id: *id,
                from,
                to,
            });
        }

        let mut tables = self.tables.write();
        let claim = tables
            .claims
            .get_mut(id)
            .ok_or(HiveError::ClaimNotFound(*id))?;

        if claim.status != from {
            return Err(HiveError::ConcurrentModification {
                claim_id: *id,
                found: claim.status,
            });
        }
        claim.status = to;
        if to.is_terminal() {
            claim.processed_at = Some(now);
        }
        Ok(claim.clone())
    }

    fn claim_and_credit(
        &self,
        id: &ClaimId,
        payee: &Address,
        now: DateTime<Utc>,
    ) -> Result<(RewardClaim, BalanceLedger)> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        let claim = tables
            .claims
            .get_mut(id)
            .ok_or(HiveError::ClaimNotFound(*id))?;

        let refusal = if &claim.root_address != payee {
            Some(NotClaimableReason::WrongPayee)
        } else if claim.status != ClaimStatus::Claimable {
            Some(NotClaimableReason::from_status(claim.status))
        } else if !claim.is_within_window(now) {
            Some(NotClaimableReason::Expired)
        } else {
            None
        };
        if let Some(reason) = refusal {
            return Err(HiveError::NotClaimable {
                claim_id: *id,
                reason,
            });
        }

        let balance = tables
            .balances
            .entry(payee.clone())
            .or_insert_with(|| BalanceLedger::new(payee.clone(), 0, 0));
        balance.claimable_usdt_total += claim.amount;

        claim.status = ClaimStatus::Claimed;
        claim.processed_at = Some(now);
        Ok((claim.clone(), balance.clone()))
    }

    fn roll_up(
        &self,
        original: &ClaimId,
        replacement: RewardClaim,
        now: DateTime<Utc>,
    ) -> Result<RewardClaim> {
        if replacement.rolled_up_from != Some(*original) {
            return Err(HiveError::Storage(format!(
                "replacement {} does not point at {}",
                replacement.id, original
            )));
        }

        let mut tables = self.tables.write();
        if tables.claims.contains_key(&replacement.id) {
            return Err(HiveError::Storage(format!(
                "duplicate claim id {}",
                replacement.id
            )));
        }

        let claim = tables
            .claims
            .get_mut(original)
            .ok_or(HiveError::ClaimNotFound(*original))?;
        if claim.status != ClaimStatus::Expired {
            return Err(HiveError::ConcurrentModification {
                claim_id: *original,
                found: claim.status,
            });
        }
        claim.status = ClaimStatus::RolledUp;
        claim.processed_at = Some(now);

        tables.insert_claim_row(replacement.clone())?;
        Ok(replacement)
    }

    fn forwarded_claim(&self, id: &ClaimId) -> Result<Option<RewardClaim>> {
        let tables = self.tables.read();
        Ok(tables
            .forwarded
            .get(id)
            .and_then(|next| tables.claims.get(next))
            .cloned())
    }

    // ==================== Balances ====================

    fn open_balance(&self, ledger: BalanceLedger) -> Result<BalanceLedger> {
        let mut tables = self.tables.write();
        Ok(tables
            .balances
            .entry(ledger.address.clone())
            .or_insert(ledger)
            .clone())
    }

    fn get_balance(&self, address: &Address) -> Result<Option<BalanceLedger>> {
        Ok(self.tables.read().balances.get(address).cloned())
    }

    fn apply_level_unlock(
        &self,
        address: &Address,
        level: u8,
        amount: Amount,
    ) -> Result<Option<Amount>> {
        validate_level(level)?;
        let mut tables = self.tables.write();
        let ledger = tables
            .balances
            .get_mut(address)
            .ok_or_else(|| HiveError::MemberNotFound(address.clone()))?;

        if !ledger.unlocked_levels.insert(level) {
            return Ok(None);
        }
        let moved = amount.min(ledger.locked_bcc);
        ledger.locked_bcc -= moved;
        ledger.transferable_bcc += moved;
        Ok(Some(moved))
    }

    // ==================== Stats ====================

    fn stats(&self) -> Result<StoreStats> {
        let tables = self.tables.read();
        Ok(StoreStats {
            members: tables.members.len() as u64,
            slots: tables
                .matrices
                .values()
                .map(|matrix| matrix.cells.len() as u64)
                .sum(),
            claims: tables.claims.len() as u64,
            open_claims: tables.open_claims(),
            balances: tables.balances.len() as u64,
        })
    }
}
