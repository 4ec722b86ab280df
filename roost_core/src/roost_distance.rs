//! The "DISTANCE" Engine - Blocked Pairwise Distance Matrices
//!
//! Clustering consumes a full n x n integer distance matrix per owner.
//! For prolific owners that matrix dominates peak memory, so the engine
//! computes it in column blocks: each block covers the distances from all
//! n points to a window of `block_size` points and is written straight
//! into the corresponding matrix columns. The block width is the only
//! memory-control knob of the pipeline.
//!
//! Numeric contract: cell (i, j) is the Euclidean distance between points
//! i and j truncated toward zero to an `i32`. Truncation (not rounding)
//! fixes the tie behavior of the radius comparison downstream: a pair at
//! exactly `eps` stays apart under the strict `< eps` test.

use crate::points::GeoPoint;
use nalgebra::DMatrix;

/// Default column-block width; owners below this size skip blocking.
pub const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Computes symmetric integer distance matrices for one owner's points.
#[derive(Debug, Clone)]
pub struct DistanceMatrixEngine {
    /// Column-block width bounding peak memory of one computation
    block_size: usize,
}

impl DistanceMatrixEngine {
    /// Creates an engine with the given block size.
    ///
    /// A block size of zero is treated as 1.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    /// Computes the full n x n truncated-Euclidean distance matrix.
    ///
    /// Pure function of the point list: diagonal is zero, matrix is
    /// symmetric and never mutated after construction. Point sets below
    /// the block threshold are computed in one pairwise expansion; larger
    /// sets go column-block by column-block.
    pub fn compute(&self, points: &[GeoPoint]) -> DMatrix<i32> {
        let n = points.len();

        if n < self.block_size {
            return pairwise_columns(points, points);
        }

        let mut matrix = DMatrix::zeros(n, n);
        for block_start in (0..n).step_by(self.block_size) {
            let block_end = (block_start + self.block_size).min(n);
            let block = pairwise_columns(points, &points[block_start..block_end]);
            matrix
                .view_mut((0, block_start), (n, block_end - block_start))
                .copy_from(&block);
        }

        matrix
    }
}

impl Default for DistanceMatrixEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

/// Distances from every point in `rows` to every point in `columns`,
/// truncated toward zero.
fn pairwise_columns(rows: &[GeoPoint], columns: &[GeoPoint]) -> DMatrix<i32> {
    DMatrix::from_fn(rows.len(), columns.len(), |i, j| {
        let delta = rows[i].coordinate - columns[j].coordinate;
        delta.norm() as i32
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn point(x: f64, y: f64) -> GeoPoint {
        GeoPoint {
            id: Uuid::new_v4(),
            owner_id: 1,
            coordinate: Vector2::new(x, y),
        }
    }

    #[test]
    fn test_empty_and_single_point() {
        let engine = DistanceMatrixEngine::default();

        let empty = engine.compute(&[]);
        assert_eq!(empty.shape(), (0, 0));

        let single = engine.compute(&[point(3.0, 4.0)]);
        assert_eq!(single.shape(), (1, 1));
        assert_eq!(single[(0, 0)], 0);
    }

    #[test]
    fn test_truncates_toward_zero() {
        let points = vec![point(0.0, 0.0), point(0.0, 19.9999)];
        let matrix = DistanceMatrixEngine::default().compute(&points);

        // 19.9999 truncates to 19, never rounds up to 20
        assert_eq!(matrix[(0, 1)], 19);
        assert_eq!(matrix[(1, 0)], 19);
    }

    #[test]
    fn test_known_distances() {
        let points = vec![point(0.0, 0.0), point(3.0, 4.0), point(0.0, 10.0)];
        let matrix = DistanceMatrixEngine::default().compute(&points);

        assert_eq!(matrix[(0, 1)], 5);
        assert_eq!(matrix[(0, 2)], 10);
        // (3,4) to (0,10): sqrt(9 + 36) = 6.708... -> 6
        assert_eq!(matrix[(1, 2)], 6);
    }

    #[test]
    fn test_blocked_path_covers_ragged_final_block() {
        // 7 points with block size 3: blocks of width 3, 3, 1
        let points: Vec<GeoPoint> = (0..7).map(|i| point(i as f64 * 2.5, 0.0)).collect();

        let direct = DistanceMatrixEngine::new(1000).compute(&points);
        let blocked = DistanceMatrixEngine::new(3).compute(&points);

        assert_eq!(direct, blocked);
    }

    proptest! {
        #[test]
        fn prop_blocked_equals_direct(
            coords in prop::collection::vec((-5000.0f64..5000.0, -5000.0f64..5000.0), 0..60),
            block_size in 1usize..20,
        ) {
            let points: Vec<GeoPoint> =
                coords.iter().map(|&(x, y)| point(x, y)).collect();

            let direct = DistanceMatrixEngine::new(usize::MAX).compute(&points);
            let blocked = DistanceMatrixEngine::new(block_size).compute(&points);

            prop_assert_eq!(direct, blocked);
        }

        #[test]
        fn prop_symmetric_with_zero_diagonal(
            coords in prop::collection::vec((-5000.0f64..5000.0, -5000.0f64..5000.0), 1..40),
        ) {
            let points: Vec<GeoPoint> =
                coords.iter().map(|&(x, y)| point(x, y)).collect();
            let matrix = DistanceMatrixEngine::default().compute(&points);

            for i in 0..points.len() {
                prop_assert_eq!(matrix[(i, i)], 0);
                for j in 0..points.len() {
                    prop_assert!(matrix[(i, j)] >= 0);
                    prop_assert_eq!(matrix[(i, j)], matrix[(j, i)]);
                }
            }
        }
    }
}
