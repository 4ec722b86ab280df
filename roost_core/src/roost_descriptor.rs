//! The "DESCRIPTOR" Engine - Cluster Summaries and Address Resolution
//!
//! Once the expansion engine hands over a completed cluster, this module
//! derives everything the persistence collaborator stores about it: the
//! centroid, dispersion statistics, the cluster-vs-noise classification,
//! and the nearest known address around the centroid. Address resolution
//! is the only fallible step in the whole pipeline and its outcomes form
//! a four-way taxonomy that downstream diagnostics depend on:
//!
//! - `Resolved` - an address within the search radius
//! - `NoneWithinRadius` - no address that close; an expected outcome
//! - `Unavailable` - the directory stayed down through every retry
//! - `NotApplicable` - noise clusters never query the directory

use crate::directory::{AddressDirectory, AddressRecord};
use crate::points::GeoPoint;
use crate::retry::RetryPolicy;
use nalgebra::Vector2;
use roost_env::Clock;
use serde::{Deserialize, Serialize};

/// Default minimum member count for the `cluster` classification.
pub const DEFAULT_MIN_POINTS: usize = 3;

/// Default search radius for nearest-address lookups, in distance units.
pub const DEFAULT_ADDRESS_RADIUS: f64 = 300.0;

/// Classification of a completed cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    /// At least `min_points` members
    Cluster,
    /// Below `min_points`; never address-resolved
    Noise,
}

/// Dispersion of cluster members around the centroid, each value rounded
/// to 3 decimal places for the persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub max_distance: f64,
    pub mean_distance: f64,
    pub standard_deviation_distance: f64,
}

/// Outcome of resolving a cluster centroid against the address base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AddressOutcome {
    /// Nearest address within the search radius, plus its distance from
    /// the centroid (3 decimals)
    Resolved {
        record: AddressRecord,
        distance: f64,
    },

    /// No address within the search radius; a normal result
    NoneWithinRadius,

    /// Directory stayed unreachable or kept failing through all retries;
    /// distinct from `NoneWithinRadius` for diagnostics
    Unavailable,

    /// Noise cluster; resolution was never attempted
    NotApplicable,
}

impl AddressOutcome {
    /// Place token used in synthesized cluster identifiers.
    fn place_token(&self) -> String {
        match self {
            AddressOutcome::Resolved { record, .. } => record.postcode.replace(' ', "_"),
            AddressOutcome::NoneWithinRadius => "NA".to_string(),
            AddressOutcome::Unavailable => "FAILURE".to_string(),
            AddressOutcome::NotApplicable => "noise".to_string(),
        }
    }
}

/// The persisted summary of one cluster. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    /// `{owner_id}_{place}_{sequence}`; stable for identical input and
    /// outcome, so re-runs overwrite rather than duplicate
    pub cluster_id: String,

    /// Owner whose points formed the cluster
    pub owner_id: i64,

    /// Member count
    pub count: usize,

    /// Componentwise mean of member coordinates, full precision
    pub centroid: [f64; 2],

    /// Cluster-vs-noise classification
    pub kind: ClusterKind,

    /// Dispersion around the centroid
    pub stats: ClusterStats,

    /// Address resolution outcome
    pub address: AddressOutcome,
}

/// Builds [`ClusterDescriptor`]s, resolving addresses with bounded
/// retries.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    /// Minimum members for the `cluster` classification
    pub min_points: usize,

    /// Nearest-address search radius around the centroid
    pub address_radius: f64,

    /// Retry policy for directory failures
    pub retry: RetryPolicy,
}

impl Default for DescriptorBuilder {
    fn default() -> Self {
        Self {
            min_points: DEFAULT_MIN_POINTS,
            address_radius: DEFAULT_ADDRESS_RADIUS,
            retry: RetryPolicy::default(),
        }
    }
}

impl DescriptorBuilder {
    /// Builds the descriptor for one completed cluster, along with each
    /// member's distance to the centroid in member order.
    ///
    /// `sequence` disambiguates the owner's clusters and must follow
    /// emission order for identifiers to stay stable across runs.
    /// `members` must be non-empty; the expansion engine never emits an
    /// empty cluster.
    ///
    /// A directory that stays down only marks this one descriptor
    /// `Unavailable`; the error never propagates.
    pub async fn build(
        &self,
        members: &[GeoPoint],
        sequence: usize,
        directory: &dyn AddressDirectory,
        clock: &dyn Clock,
    ) -> (ClusterDescriptor, Vec<f64>) {
        debug_assert!(!members.is_empty(), "clusters are never empty");

        let owner_id = members[0].owner_id;
        let count = members.len();

        let centroid = members
            .iter()
            .fold(Vector2::zeros(), |sum, point| sum + point.coordinate)
            / count as f64;

        let distances: Vec<f64> = members
            .iter()
            .map(|point| (point.coordinate - centroid).norm())
            .collect();

        let stats = dispersion_stats(&distances);

        let kind = if count >= self.min_points {
            ClusterKind::Cluster
        } else {
            ClusterKind::Noise
        };

        let centroid = [centroid.x, centroid.y];
        let address = match kind {
            ClusterKind::Cluster => self.resolve_address(centroid, directory, clock).await,
            ClusterKind::Noise => AddressOutcome::NotApplicable,
        };

        let cluster_id = format!("{}_{}_{}", owner_id, address.place_token(), sequence);

        let descriptor = ClusterDescriptor {
            cluster_id,
            owner_id,
            count,
            centroid,
            kind,
            stats,
            address,
        };

        (descriptor, distances)
    }

    /// Queries the directory for the nearest address, retrying transient
    /// failures before degrading to `Unavailable`.
    async fn resolve_address(
        &self,
        centroid: [f64; 2],
        directory: &dyn AddressDirectory,
        clock: &dyn Clock,
    ) -> AddressOutcome {
        let lookup = self
            .retry
            .run(clock, "nearest-address lookup", || {
                directory.nearest(centroid, self.address_radius)
            })
            .await;

        match lookup {
            Ok(Some(record)) => {
                let offset = Vector2::new(
                    record.coordinates[0] - centroid[0],
                    record.coordinates[1] - centroid[1],
                );
                AddressOutcome::Resolved {
                    distance: round3(offset.norm()),
                    record,
                }
            }
            Ok(None) => AddressOutcome::NoneWithinRadius,
            Err(error) => {
                tracing::warn!(%error, "address base unavailable, marking cluster");
                AddressOutcome::Unavailable
            }
        }
    }
}

/// Max, mean and population standard deviation of the member distances,
/// rounded to 3 decimals.
fn dispersion_stats(distances: &[f64]) -> ClusterStats {
    let count = distances.len() as f64;
    let max = distances.iter().fold(0.0f64, |max, &d| max.max(d));
    let mean = distances.iter().sum::<f64>() / count;
    let variance = distances
        .iter()
        .map(|&d| (d - mean) * (d - mean))
        .sum::<f64>()
        / count;

    ClusterStats {
        max_distance: round3(max),
        mean_distance: round3(mean),
        standard_deviation_distance: round3(variance.sqrt()),
    }
}

/// Round to 3 decimal places, the precision of persisted statistics.
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
