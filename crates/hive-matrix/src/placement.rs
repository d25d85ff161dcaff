//! Matrix Placement Engine
//!
//! Places a new member breadth-first into a matrix, filling `L`, `M`, `R`
//! in order. In the referrer's own matrix the scan starts at the root. In an
//! upline's matrix it starts at the referrer's slot, so the new member lands
//! in the referrer's subtree one or more layers below them.
//!
//! The store's unique cell constraint decides races: when a concurrent
//! placement takes the chosen cell first, the scan is repeated.

use hive_core::{
    Address, Clock, HiveError, MatrixPosition, MatrixSlot, PlacementType, Result, MAX_LAYERS,
};
use hive_storage::LedgerStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Placement configuration
#[derive(Clone, Debug)]
pub struct PlacementConfig {
    /// Deepest layer the scan may use
    pub max_layers: u8,
    /// Rescans allowed after losing a cell race
    pub race_retries: u32,
    /// Matrices a new member joins: the referrer's plus further uplines
    pub upline_depth: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            max_layers: MAX_LAYERS,
            race_retries: 64,
            upline_depth: hive_core::constants::UPLINE_PROPAGATION_DEPTH,
        }
    }
}

/// Outcome of a `place` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub slot: MatrixSlot,
    /// False when the member already held this slot
    pub created: bool,
}

/// Places members into matrices
pub struct MatrixPlacementEngine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: PlacementConfig,
}

impl MatrixPlacementEngine {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: PlacementConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Place `new_member` into the matrix of `referrer`.
    ///
    /// Idempotent per `(referrer, new_member)`: a repeated call returns the
    /// existing slot with `created == false`.
    pub fn place(&self, referrer: &Address, new_member: &Address) -> Result<Placement> {
        self.place_in(referrer, new_member, referrer)
    }

    /// Place `new_member`, referred by `referrer`, into the matrix of `root`
    pub fn place_in(
        &self,
        root: &Address,
        new_member: &Address,
        referrer: &Address,
    ) -> Result<Placement> {
        if root == new_member {
            return Err(HiveError::SelfPlacement(new_member.clone()));
        }
        if let Some(slot) = self.store.get_slot(root, new_member)? {
            debug!("{} already placed at {} in matrix of {}", new_member, slot.position, root);
            return Ok(Placement {
                slot,
                created: false,
            });
        }

        let anchor = self.anchor_for(root, referrer)?;
        let mut lost_races = 0u32;

        loop {
            let position = self.find_vacancy(root, &anchor)?;
            let placement_type = if root == referrer && position.layer() == 1 {
                PlacementType::Direct
            } else {
                PlacementType::Spillover
            };
            let slot = MatrixSlot {
                matrix_root: root.clone(),
                occupant: new_member.clone(),
                position,
                placement_type,
                placed_at: self.clock.now(),
            };

            match self.store.insert_slot(slot.clone()) {
                Ok(()) => {
                    info!(
                        "Placed {} at {} (layer {}, {:?}) in matrix of {}",
                        new_member,
                        slot.position,
                        slot.layer(),
                        slot.placement_type,
                        root
                    );
                    return Ok(Placement {
                        slot,
                        created: true,
                    });
                }
                Err(HiveError::DuplicatePlacement { .. }) => {
                    // A concurrent call placed the same member first
                    let slot = self.store.get_slot(root, new_member)?.ok_or_else(|| {
                        HiveError::Storage(format!(
                            "{} reported placed in matrix of {} but not found",
                            new_member, root
                        ))
                    })?;
                    return Ok(Placement {
                        slot,
                        created: false,
                    });
                }
                Err(err @ HiveError::CellOccupied { .. }) => {
                    lost_races += 1;
                    if lost_races > self.config.race_retries {
                        warn!("Giving up placing {} in matrix of {}: {}", new_member, root, err);
                        return Err(err);
                    }
                    debug!("Lost cell race in matrix of {}, rescanning", root);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Place `new_member` into the referrer's matrix, then into the matrices
    /// of the referrer's own uplines.
    ///
    /// Exhaustion of the referrer's matrix is returned to the caller; an
    /// exhausted upline matrix is skipped.
    pub fn place_with_uplines(
        &self,
        new_member: &Address,
        referrer: &Address,
    ) -> Result<Vec<Placement>> {
        let mut placements = vec![self.place(referrer, new_member)?];

        let mut next = self.store.get_member(referrer)?.and_then(|m| m.referrer);
        let mut joined = 1u32;
        while let Some(upline) = next {
            if joined >= self.config.upline_depth {
                break;
            }
            if &upline == new_member {
                warn!("Referral cycle through {}, stopping upline placement", new_member);
                break;
            }

            match self.place_in(&upline, new_member, referrer) {
                Ok(placement) => placements.push(placement),
                Err(HiveError::MatrixExhausted { root, .. }) => {
                    warn!("Matrix of {} is exhausted, skipping upline placement", root);
                }
                Err(err) => return Err(err),
            }

            next = self.store.get_member(&upline)?.and_then(|m| m.referrer);
            joined += 1;
        }

        Ok(placements)
    }

    /// Where the breadth-first scan starts in `root`'s matrix
    fn anchor_for(&self, root: &Address, referrer: &Address) -> Result<MatrixPosition> {
        if root == referrer {
            return Ok(MatrixPosition::root());
        }
        Ok(self
            .store
            .get_slot(root, referrer)?
            .map(|slot| slot.position)
            .unwrap_or_else(MatrixPosition::root))
    }

    /// First free position below `anchor`, layer by layer, `L -> M -> R`
    fn find_vacancy(&self, root: &Address, anchor: &MatrixPosition) -> Result<MatrixPosition> {
        let start = anchor.layer() + 1;
        for layer in start..=self.config.max_layers {
            if anchor.is_root()
                && self.store.layer_occupancy(root, layer)? >= hive_core::layer_capacity(layer)
            {
                continue;
            }
            let within = anchor.descendant_range(layer - anchor.layer());
            if let Some(index) = self.store.first_vacant_index(root, layer, within)? {
                return MatrixPosition::from_index(layer, index);
            }
        }

        Err(HiveError::MatrixExhausted {
            root: root.clone(),
            layers: self.config.max_layers,
        })
    }
}
