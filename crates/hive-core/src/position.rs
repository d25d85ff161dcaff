//! Matrix positions as typed ternary paths
//!
//! A position is the walk from a matrix root down to a slot: one `L`/`M`/`R`
//! choice per layer, written `"L.M.R"`. The path length is the layer, and
//! reading the choices as base-3 digits gives the slot's breadth-first index
//! within its layer, so `L < M < R` ordering and BFS ordering coincide.
//!
//! ```text
//!                    root
//!          ┌──────────┼──────────┐
//!          L          M          R          layer 1 (3 slots)
//!       ┌──┼──┐    ┌──┼──┐    ┌──┼──┐
//!      L.L L.M L.R M.L M.M M.R R.L R.M R.R  layer 2 (9 slots)
//! ```

use crate::error::{HiveError, Result};
use crate::MAX_LAYERS;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// One ternary choice in a matrix path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Branch {
    L,
    M,
    R,
}

impl Branch {
    /// Fill order used by the placement scan
    pub const ALL: [Branch; 3] = [Branch::L, Branch::M, Branch::R];

    /// Base-3 digit of this branch
    pub fn digit(self) -> u64 {
        match self {
            Self::L => 0,
            Self::M => 1,
            Self::R => 2,
        }
    }

    fn from_digit(digit: u64) -> Self {
        match digit {
            0 => Self::L,
            1 => Self::M,
            _ => Self::R,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::L => 'L',
            Self::M => 'M',
            Self::R => 'R',
        }
    }
}

/// Number of slots on a layer: 3^layer
pub fn layer_capacity(layer: u8) -> u64 {
    3u64.pow(layer as u32)
}

/// Path from a matrix root to a slot
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatrixPosition {
    path: Vec<Branch>,
}

impl MatrixPosition {
    /// The root itself (layer 0). Never stored as a slot.
    pub fn root() -> Self {
        Self { path: Vec::new() }
    }

    /// Build from explicit branches
    pub fn from_branches(path: Vec<Branch>) -> Result<Self> {
        if path.len() > MAX_LAYERS as usize {
            return Err(HiveError::InvalidPosition(format!(
                "path of {} layers exceeds {}",
                path.len(),
                MAX_LAYERS
            )));
        }
        Ok(Self { path })
    }

    /// Position of the `index`-th slot (breadth-first, 0-based) on `layer`
    pub fn from_index(layer: u8, index: u64) -> Result<Self> {
        if layer == 0 || layer > MAX_LAYERS {
            return Err(HiveError::InvalidPosition(format!("layer {} out of range", layer)));
        }
        if index >= layer_capacity(layer) {
            return Err(HiveError::InvalidPosition(format!(
                "index {} exceeds capacity of layer {}",
                index, layer
            )));
        }

        let mut path = vec![Branch::L; layer as usize];
        let mut rest = index;
        for slot in path.iter_mut().rev() {
            *slot = Branch::from_digit(rest % 3);
            rest /= 3;
        }
        Ok(Self { path })
    }

    /// Depth below the root
    pub fn layer(&self) -> u8 {
        self.path.len() as u8
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Breadth-first index within the layer
    pub fn index(&self) -> u64 {
        self.path.iter().fold(0, |acc, b| acc * 3 + b.digit())
    }

    pub fn branches(&self) -> &[Branch] {
        &self.path
    }

    /// Last choice made, `None` for the root
    pub fn last_branch(&self) -> Option<Branch> {
        self.path.last().copied()
    }

    /// Enclosing position one layer up
    pub fn parent(&self) -> Option<Self> {
        if self.path.is_empty() {
            return None;
        }
        Some(Self {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Position `distance` layers up; `distance == layer()` yields the root
    pub fn ancestor(&self, distance: u8) -> Option<Self> {
        let distance = distance as usize;
        if distance > self.path.len() {
            return None;
        }
        Some(Self {
            path: self.path[..self.path.len() - distance].to_vec(),
        })
    }

    /// Child position under this one
    pub fn child(&self, branch: Branch) -> Result<Self> {
        let mut path = self.path.clone();
        path.push(branch);
        Self::from_branches(path)
    }

    /// Breadth-first indices, on layer `layer() + depth`, of this position's
    /// descendants `depth` layers down
    pub fn descendant_range(&self, depth: u8) -> Range<u64> {
        let width = layer_capacity(depth);
        let start = self.index() * width;
        start..start + width
    }

    /// Whether `self` lies in the subtree rooted at `other`
    pub fn is_descendant_of(&self, other: &Self) -> bool {
        self.path.len() > other.path.len() && self.path.starts_with(&other.path)
    }
}

impl Ord for MatrixPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.layer()
            .cmp(&other.layer())
            .then_with(|| self.index().cmp(&other.index()))
    }
}

impl PartialOrd for MatrixPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MatrixPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            return f.write_str("root");
        }
        for (i, branch) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", branch.as_char())?;
        }
        Ok(())
    }
}

impl fmt::Debug for MatrixPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatrixPosition({})", self)
    }
}

impl FromStr for MatrixPosition {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("root") {
            return Ok(Self::root());
        }

        let path = s
            .split('.')
            .map(|part| match part.trim() {
                "L" | "l" => Ok(Branch::L),
                "M" | "m" => Ok(Branch::M),
                "R" | "r" => Ok(Branch::R),
                other => Err(HiveError::InvalidPosition(format!(
                    "unexpected segment '{}' in '{}'",
                    other, s
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_branches(path)
    }
}

impl TryFrom<String> for MatrixPosition {
    type Error = HiveError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MatrixPosition> for String {
    fn from(position: MatrixPosition) -> Self {
        position.to_string()
    }
}
