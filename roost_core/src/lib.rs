//! Roost Core - Per-Owner Spatial Clustering with Address Enrichment
//!
//! This library assigns geo-tagged posts to per-owner spatial clusters
//! (likely home/work locations) and enriches each cluster with the
//! nearest known address:
//! 1. **Distance Engine**: blocked pairwise integer distance matrices
//! 2. **Expansion Engine**: radius-connectivity cluster peeling
//! 3. **Descriptor Engine**: centroid/dispersion stats + nearest-address
//!    resolution with bounded retries

pub mod batch_runtime;
pub mod directory;
pub mod points;
pub mod retry;
pub mod robots;
pub mod roost_descriptor;
pub mod roost_distance;
pub mod roost_expansion;

// Re-export key types for convenience
pub use batch_runtime::{BatchConfig, BatchOrchestrator, BatchSummary, PointUpdate, UpdateSink};
pub use directory::{AddressDirectory, AddressRecord, DirectoryError, DirectoryPool};
pub use points::{group_by_owner, GeoPoint, RawEvent};
pub use roost_descriptor::{AddressOutcome, ClusterDescriptor, ClusterKind, DescriptorBuilder};
pub use roost_distance::DistanceMatrixEngine;
pub use roost_expansion::{ClusterExpansion, RemainingMask};
