//! The "EXPANSION" Engine - Radius-Connectivity Cluster Peeling
//!
//! Consumes one owner's distance matrix and peels off one
//! density-connected cluster at a time. A cluster is the full
//! connectivity closure at radius `eps`: starting from a seed, any
//! still-unassigned point strictly closer than `eps` to ANY member joins,
//! until a whole frontier pass adds nothing. This is single-linkage
//! clustering with a distance threshold, not DBSCAN - there is no
//! core-point/min-samples rule here; minimum size only matters for the
//! downstream noise classification.
//!
//! Seeds are always the lowest remaining index, which makes cluster
//! emission order (and therefore synthesized cluster ids) reproducible
//! across runs on identical input.

use nalgebra::DMatrix;
use std::collections::{BTreeSet, VecDeque};

/// Default radius threshold, in truncated distance units.
pub const DEFAULT_EPS: i32 = 20;

/// Indices of one owner's points not yet assigned to any cluster.
///
/// Owned exclusively by a single clustering pass; shrinks monotonically
/// to empty as clusters are peeled off.
#[derive(Debug, Clone)]
pub struct RemainingMask {
    remaining: BTreeSet<usize>,
}

impl RemainingMask {
    /// Creates a mask covering indices `0..n`.
    pub fn new(n: usize) -> Self {
        Self {
            remaining: (0..n).collect(),
        }
    }

    /// True once every index has been assigned.
    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Number of indices still unassigned.
    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    /// Removes and returns the lowest remaining index.
    fn pop_lowest(&mut self) -> Option<usize> {
        let lowest = self.remaining.iter().next().copied()?;
        self.remaining.remove(&lowest);
        Some(lowest)
    }
}

/// Peels density-connected clusters off a remaining mask.
#[derive(Debug, Clone)]
pub struct ClusterExpansion {
    /// Strict upper bound for a pair to be density-connected
    eps: i32,
}

impl ClusterExpansion {
    /// Creates an expansion engine with the given radius threshold.
    pub fn new(eps: i32) -> Self {
        Self { eps }
    }

    /// Peels the next cluster off the mask.
    ///
    /// Returns the member indices in discovery order, or `None` once the
    /// mask is exhausted. A single isolated point yields a valid
    /// cluster of size 1.
    ///
    /// Membership uses strict `< eps` against the truncated integer
    /// distances: a pair at exactly `eps` is NOT connected.
    pub fn next_cluster(
        &self,
        mask: &mut RemainingMask,
        distances: &DMatrix<i32>,
    ) -> Option<Vec<usize>> {
        let seed = mask.pop_lowest()?;

        let mut members = vec![seed];
        let mut frontier = VecDeque::from([seed]);

        // Breadth-first closure: every member's row is scanned against the
        // still-remaining indices exactly once; fixed point when the
        // frontier drains.
        while let Some(row) = frontier.pop_front() {
            let found: Vec<usize> = mask
                .remaining
                .iter()
                .copied()
                .filter(|&column| distances[(row, column)] < self.eps)
                .collect();

            for index in found {
                mask.remaining.remove(&index);
                members.push(index);
                frontier.push_back(index);
            }
        }

        Some(members)
    }
}

impl Default for ClusterExpansion {
    fn default() -> Self {
        Self::new(DEFAULT_EPS)
    }
}
