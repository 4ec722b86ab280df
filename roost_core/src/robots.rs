//! Coordinate-bin dominance heuristic for automated accounts.
//!
//! Accounts that post from a fixed device (shops, weather stations, job
//! boards) concentrate a huge share of their history in one tiny spot.
//! This detector bins an owner's coordinates into a square grid and flags
//! owners whose densest bin holds a dominant share of a large history.
//!
//! It feeds the run-level exclusion set consumed by the batch
//! orchestrator; it is a pre-filter heuristic only and takes no part in
//! the clustering pass itself.

use crate::points::GeoPoint;
use std::collections::HashMap;

/// Flags owners whose history is dominated by one coordinate bin.
#[derive(Debug, Clone)]
pub struct BucketDominanceDetector {
    /// Histories at or below this size are never flagged
    pub min_history: usize,

    /// Side length of a square bin, in distance units
    pub bin_size: f64,

    /// Share of the history a single bin must exceed to flag the owner
    pub dominance_ratio: f64,
}

impl Default for BucketDominanceDetector {
    fn default() -> Self {
        Self {
            min_history: 1000,
            bin_size: 2.0,
            dominance_ratio: 0.2,
        }
    }
}

impl BucketDominanceDetector {
    /// True when the owner's densest bin exceeds the dominance ratio of a
    /// sufficiently large history.
    pub fn is_dominated(&self, points: &[GeoPoint]) -> bool {
        if points.len() <= self.min_history {
            return false;
        }

        let mut buckets: HashMap<(i64, i64), usize> = HashMap::new();
        for point in points {
            let key = (
                (point.coordinate.x / self.bin_size).floor() as i64,
                (point.coordinate.y / self.bin_size).floor() as i64,
            );
            *buckets.entry(key).or_insert(0) += 1;
        }

        let densest = buckets.values().copied().max().unwrap_or(0);
        densest as f64 > self.dominance_ratio * points.len() as f64
    }
}
