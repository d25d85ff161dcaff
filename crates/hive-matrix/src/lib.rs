//! # Beehive Matrix
//!
//! Forced 3-ary matrix placement.
//!
//! ```text
//!                      referrer (root of their own matrix)
//!              ┌──────────────┼──────────────┐
//!              L              M              R        layer 1: direct
//!          ┌───┼───┐      ┌───┼───┐      ┌───┼───┐
//!         L.L L.M L.R    M.L M.M M.R    R.L R.M R.R   layer 2: spillover
//! ```
//!
//! Each layer `n` holds at most `3^n` members and the scan stops at layer 19.

pub mod placement;
pub mod view;

pub use placement::{MatrixPlacementEngine, Placement, PlacementConfig};
pub use view::{LayerSummary, MatrixStats};
