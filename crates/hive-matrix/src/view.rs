//! Read-side queries over a matrix: layer views, team statistics and
//! neighbourhood lookups for dashboard rendering.

use crate::placement::MatrixPlacementEngine;
use hive_core::{
    layer_capacity, Address, Branch, HiveError, MatrixPosition, MatrixSlot, PlacementType, Result,
};
use serde::{Deserialize, Serialize};

/// Occupancy of one layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub layer: u8,
    pub occupied: u64,
    pub capacity: u64,
}

impl LayerSummary {
    pub fn is_full(&self) -> bool {
        self.occupied >= self.capacity
    }
}

/// Team statistics for one matrix root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixStats {
    pub root: Address,
    /// Members anywhere in the matrix
    pub team_size: u64,
    /// Layer-1 members referred by the root
    pub direct_referrals: u64,
    /// Non-empty layers, shallowest first
    pub layers: Vec<LayerSummary>,
}

impl MatrixStats {
    /// Deepest non-empty layer, 0 for an empty matrix
    pub fn deepest_layer(&self) -> u8 {
        self.layers.last().map(|l| l.layer).unwrap_or(0)
    }

    pub fn layer(&self, layer: u8) -> Option<&LayerSummary> {
        self.layers.iter().find(|l| l.layer == layer)
    }
}

impl MatrixPlacementEngine {
    /// `GetMatrixView(root, layer)`: slots of one layer in position order
    pub fn matrix_view(&self, root: &Address, layer: u8) -> Result<Vec<MatrixSlot>> {
        if layer == 0 || layer > self.config().max_layers {
            return Err(HiveError::InvalidPosition(format!(
                "layer {} outside 1..={}",
                layer,
                self.config().max_layers
            )));
        }
        self.store().slots_in_layer(root, layer)
    }

    /// Team size, direct referrals and per-layer counts
    pub fn matrix_stats(&self, root: &Address) -> Result<MatrixStats> {
        let mut layers = Vec::new();
        let mut team_size = 0;

        for layer in 1..=self.config().max_layers {
            let occupied = self.store().layer_occupancy(root, layer)?;
            if occupied == 0 {
                continue;
            }
            team_size += occupied;
            layers.push(LayerSummary {
                layer,
                occupied,
                capacity: layer_capacity(layer),
            });
        }

        let direct_referrals = self
            .store()
            .slots_in_layer(root, 1)?
            .iter()
            .filter(|slot| slot.placement_type == PlacementType::Direct)
            .count() as u64;

        Ok(MatrixStats {
            root: root.clone(),
            team_size,
            direct_referrals,
            layers,
        })
    }

    /// Occupied children of `position`, in `L, M, R` order
    pub fn children(&self, root: &Address, position: &MatrixPosition) -> Result<Vec<MatrixSlot>> {
        let mut children = Vec::with_capacity(3);
        if position.layer() >= self.config().max_layers {
            return Ok(children);
        }
        for branch in Branch::ALL {
            if let Some(slot) = self.store().slot_at(root, &position.child(branch)?)? {
                children.push(slot);
            }
        }
        Ok(children)
    }

    /// Member directly above `occupant` in `root`'s matrix
    pub fn matrix_parent(&self, root: &Address, occupant: &Address) -> Result<Option<Address>> {
        let slot = match self.store().get_slot(root, occupant)? {
            Some(slot) => slot,
            None => return Ok(None),
        };
        match slot.position.parent() {
            Some(parent) if parent.is_root() => Ok(Some(root.clone())),
            Some(parent) => Ok(self
                .store()
                .slot_at(root, &parent)?
                .map(|slot| slot.occupant)),
            None => Ok(None),
        }
    }

    /// Every slot `member` holds, across all matrices
    pub fn placements_of(&self, member: &Address) -> Result<Vec<MatrixSlot>> {
        self.store().slots_for_occupant(member)
    }

    /// Roots of the matrices in which `member` sits exactly on `layer`
    pub fn roots_with_member_at_layer(&self, member: &Address, layer: u8) -> Result<Vec<Address>> {
        Ok(self
            .store()
            .slots_for_occupant(member)?
            .into_iter()
            .filter(|slot| slot.layer() == layer)
            .map(|slot| slot.matrix_root)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::placement::{MatrixPlacementEngine, PlacementConfig};
    use chrono::Utc;
    use hive_core::{Address, HiveError, ManualClock};
    use hive_storage::{LedgerStore, MemoryStore};
    use std::sync::Arc;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn network() -> MatrixPlacementEngine {
        let store = Arc::new(MemoryStore::new());
        let engine = MatrixPlacementEngine::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            PlacementConfig::default(),
        );
        let now = Utc::now();
        store.activate_member(&addr("g"), None, now).unwrap();
        for i in 0..5 {
            let member = addr(&format!("d{}", i));
            store.activate_member(&member, Some(&addr("g")), now).unwrap();
            engine.place_with_uplines(&member, &addr("g")).unwrap();
        }
        store.activate_member(&addr("x"), Some(&addr("d0")), now).unwrap();
        engine.place_with_uplines(&addr("x"), &addr("d0")).unwrap();
        engine
    }

    #[test]
    fn test_matrix_stats() {
        let engine = network();
        let stats = engine.matrix_stats(&addr("g")).unwrap();

        assert_eq!(stats.team_size, 6);
        assert_eq!(stats.direct_referrals, 3);
        assert_eq!(stats.deepest_layer(), 2);
        assert!(stats.layer(1).unwrap().is_full());
        assert_eq!(stats.layer(2).unwrap().occupied, 3);
    }

    #[test]
    fn test_matrix_view_and_navigation() {
        let engine = network();
        let g = addr("g");

        let layer2: Vec<String> = engine
            .matrix_view(&g, 2)
            .unwrap()
            .iter()
            .map(|s| format!("{}@{}", s.occupant, s.position))
            .collect();
        // d3 and d4 spill under d0, x follows its referrer d0
        assert_eq!(layer2, vec!["d3@L.L", "d4@L.M", "x@L.R"]);

        let d0 = engine.store().get_slot(&g, &addr("d0")).unwrap().unwrap();
        assert_eq!(engine.children(&g, &d0.position).unwrap().len(), 3);
        assert_eq!(engine.matrix_parent(&g, &addr("x")).unwrap(), Some(addr("d0")));
        assert_eq!(engine.matrix_parent(&g, &addr("d1")).unwrap(), Some(g.clone()));

        assert_eq!(
            engine.roots_with_member_at_layer(&addr("x"), 2).unwrap(),
            vec![g.clone()]
        );
        assert_eq!(engine.placements_of(&addr("x")).unwrap().len(), 2);

        assert!(matches!(
            engine.matrix_view(&g, 0),
            Err(HiveError::InvalidPosition(_))
        ));
    }
}
