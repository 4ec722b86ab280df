//! Batch Runtime - Orchestrates the clustering engines over a batch.
//!
//! This module is the integration layer between the pure engines
//! (distance, expansion, descriptor) and the outside world: it groups a
//! partition's raw events by owner, runs the per-owner clustering pass,
//! and aggregates everything into update instructions for the
//! persistence collaborator.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      BatchOrchestrator                        │
//! │                                                               │
//! │  partition events ──► group_by_owner ──► per-owner pass       │
//! │                                                               │
//! │  ┌──────────┐   ┌───────────┐   ┌────────────────────────┐    │
//! │  │ DISTANCE │ ─►│ EXPANSION │ ─►│ DESCRIPTOR (+ address) │    │
//! │  └──────────┘   └───────────┘   └────────────────────────┘    │
//! │                                                               │
//! │  updates + summary ──► UpdateSink collaborator                │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The orchestrator is also the failure-isolation boundary. A directory
//! outage degrades the affected descriptors and a robot-sized owner is
//! skipped; neither aborts sibling units.

use crate::directory::{AddressDirectory, DirectoryPool};
use crate::points::{group_by_owner, GeoPoint, RawEvent};
use crate::retry::RetryPolicy;
use crate::roost_descriptor::{AddressOutcome, ClusterDescriptor, ClusterKind, DescriptorBuilder};
use crate::roost_distance::{DistanceMatrixEngine, DEFAULT_BLOCK_SIZE};
use crate::roost_expansion::{ClusterExpansion, RemainingMask, DEFAULT_EPS};
use async_trait::async_trait;
use roost_env::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Default point count above which an owner is treated as an automated
/// account and skipped entirely, shielding the quadratic expansion pass.
pub const DEFAULT_ROBOT_THRESHOLD: usize = 30_000;

/// Configuration for a batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Radius threshold for density connectivity (default: 20)
    pub eps: i32,

    /// Minimum members for the `cluster` classification (default: 3)
    pub min_points: usize,

    /// Column-block width of the distance engine (default: 1000)
    pub block_size: usize,

    /// Nearest-address search radius (default: 300)
    pub address_radius: f64,

    /// Owner point count above which clustering is skipped (default: 30000)
    pub robot_threshold: usize,

    /// Retry policy for the address directory
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            eps: DEFAULT_EPS,
            min_points: crate::roost_descriptor::DEFAULT_MIN_POINTS,
            block_size: DEFAULT_BLOCK_SIZE,
            address_radius: crate::roost_descriptor::DEFAULT_ADDRESS_RADIUS,
            robot_threshold: DEFAULT_ROBOT_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }
}

/// One per-point update instruction for the persistence collaborator.
#[derive(Debug, Clone)]
pub struct PointUpdate {
    /// Persistence-side identifier of the event to update
    pub point_id: Uuid,

    /// The cluster the point was assigned to
    pub descriptor: Arc<ClusterDescriptor>,

    /// The point's distance from its cluster centroid
    pub distance_from_centroid: f64,

    /// Total validated points for the owner in this batch unit
    pub owner_point_count: usize,
}

/// Failure applying a batch of updates.
#[derive(Debug, Clone, Error)]
#[error("update sink failed: {0}")]
pub struct SinkError(pub String);

/// Persistence sink collaborator.
///
/// Applies update instructions against the persisted event records with
/// at-least-once semantics; the core never deduplicates.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn apply(&self, updates: &[PointUpdate]) -> Result<(), SinkError>;
}

/// Audit record for one owner within a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerOutcome {
    /// The owner went through the full clustering pass
    Clustered {
        owner_id: i64,
        point_count: usize,
        clusters: usize,
        noise: usize,
        address_failures: usize,
    },

    /// The owner exceeded the robot threshold and was skipped
    Excluded { owner_id: i64, point_count: usize },
}

/// Counts the orchestrator's caller sees instead of a crash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Owners seen, whether clustered or excluded
    pub owners: usize,

    /// Descriptors classified `cluster`
    pub clusters: usize,

    /// Descriptors classified `noise`
    pub noise: usize,

    /// Descriptors whose address resolution exhausted its retries
    pub address_failures: usize,

    /// Owners skipped by the robot threshold
    pub excluded_owners: usize,

    /// Events dropped for missing or non-finite coordinates
    pub malformed_events: usize,
}

impl BatchSummary {
    /// Folds another summary into this one.
    pub fn merge(&mut self, other: &BatchSummary) {
        self.owners += other.owners;
        self.clusters += other.clusters;
        self.noise += other.noise;
        self.address_failures += other.address_failures;
        self.excluded_owners += other.excluded_owners;
        self.malformed_events += other.malformed_events;
    }
}

/// Everything one partition produced.
#[derive(Debug)]
pub struct PartitionResult {
    /// Update instructions for every point of every processed owner
    pub updates: Vec<PointUpdate>,

    /// Per-owner audit trail, in owner-id order
    pub owner_outcomes: Vec<OwnerOutcome>,

    /// Aggregated counts
    pub summary: BatchSummary,
}

/// Result of one owner's clustering pass.
struct OwnerResult {
    updates: Vec<PointUpdate>,
    outcome: OwnerOutcome,
}

/// Drives the per-owner and per-partition clustering iteration.
pub struct BatchOrchestrator {
    config: BatchConfig,
    distance_engine: DistanceMatrixEngine,
    expansion: ClusterExpansion,
    builder: DescriptorBuilder,
    clock: Arc<dyn Clock>,
}

impl BatchOrchestrator {
    /// Creates an orchestrator from a batch configuration.
    pub fn new(config: BatchConfig, clock: Arc<dyn Clock>) -> Self {
        let distance_engine = DistanceMatrixEngine::new(config.block_size);
        let expansion = ClusterExpansion::new(config.eps);
        let builder = DescriptorBuilder {
            min_points: config.min_points,
            address_radius: config.address_radius,
            retry: config.retry.clone(),
        };

        Self {
            config,
            distance_engine,
            expansion,
            builder,
            clock,
        }
    }

    /// Runs the clustering pass for a single owner.
    ///
    /// Owners above the robot threshold are skipped before any distance
    /// computation happens; that guard is what keeps a 40 000-point
    /// automated account from costing an n-squared matrix.
    async fn cluster_owner(
        &self,
        owner_id: i64,
        points: &[GeoPoint],
        directory: &dyn AddressDirectory,
    ) -> OwnerResult {
        let point_count = points.len();

        if point_count > self.config.robot_threshold {
            tracing::info!(
                owner_id,
                point_count,
                threshold = self.config.robot_threshold,
                "owner exceeds robot threshold, skipping clustering"
            );
            return OwnerResult {
                updates: Vec::new(),
                outcome: OwnerOutcome::Excluded {
                    owner_id,
                    point_count,
                },
            };
        }

        let matrix = self.distance_engine.compute(points);
        let mut mask = RemainingMask::new(point_count);

        let mut updates = Vec::with_capacity(point_count);
        let mut clusters = 0;
        let mut noise = 0;
        let mut address_failures = 0;
        let mut sequence = 0;

        while let Some(member_indices) = self.expansion.next_cluster(&mut mask, &matrix) {
            let members: Vec<GeoPoint> = member_indices
                .iter()
                .map(|&index| points[index].clone())
                .collect();

            let (descriptor, distances) = self
                .builder
                .build(&members, sequence, directory, self.clock.as_ref())
                .await;

            match descriptor.kind {
                ClusterKind::Cluster => clusters += 1,
                ClusterKind::Noise => noise += 1,
            }
            if descriptor.address == AddressOutcome::Unavailable {
                address_failures += 1;
            }

            let descriptor = Arc::new(descriptor);
            for (member_offset, &index) in member_indices.iter().enumerate() {
                updates.push(PointUpdate {
                    point_id: points[index].id,
                    descriptor: Arc::clone(&descriptor),
                    distance_from_centroid: distances[member_offset],
                    owner_point_count: point_count,
                });
            }

            sequence += 1;
        }

        OwnerResult {
            updates,
            outcome: OwnerOutcome::Clustered {
                owner_id,
                point_count,
                clusters,
                noise,
                address_failures,
            },
        }
    }

    /// Processes one partition's events: owners are clustered
    /// sequentially, in ascending owner-id order.
    pub async fn cluster_partition(
        &self,
        events: Vec<RawEvent>,
        excluded_owners: &HashSet<i64>,
        directory: &dyn AddressDirectory,
    ) -> PartitionResult {
        let owner_map = group_by_owner(events, excluded_owners);
        if owner_map.denylisted_events > 0 {
            tracing::debug!(
                denylisted_events = owner_map.denylisted_events,
                "dropped events from denylisted owners"
            );
        }

        let mut updates = Vec::with_capacity(owner_map.point_count());
        let mut owner_outcomes = Vec::with_capacity(owner_map.owners.len());
        let mut summary = BatchSummary {
            malformed_events: owner_map.malformed_events,
            ..BatchSummary::default()
        };

        for (&owner_id, points) in &owner_map.owners {
            let result = self.cluster_owner(owner_id, points, directory).await;

            summary.owners += 1;
            match &result.outcome {
                OwnerOutcome::Clustered {
                    clusters,
                    noise,
                    address_failures,
                    ..
                } => {
                    summary.clusters += clusters;
                    summary.noise += noise;
                    summary.address_failures += address_failures;
                }
                OwnerOutcome::Excluded { .. } => summary.excluded_owners += 1,
            }

            updates.extend(result.updates);
            owner_outcomes.push(result.outcome);
        }

        PartitionResult {
            updates,
            owner_outcomes,
            summary,
        }
    }

    /// Fans independent partitions out over the runtime, hands each
    /// partition's updates to the sink as it completes, and returns the
    /// merged summary.
    ///
    /// Partitions draw directory replicas from the pool round-robin.
    /// A sink failure is logged and costs that partition's updates their
    /// delivery (the sink is at-least-once, a re-run repairs it); it
    /// never stops the remaining partitions.
    pub async fn cluster_partitions(
        self: Arc<Self>,
        partitions: Vec<Vec<RawEvent>>,
        excluded_owners: HashSet<i64>,
        pool: Arc<DirectoryPool>,
        sink: Arc<dyn UpdateSink>,
    ) -> BatchSummary {
        let excluded_owners = Arc::new(excluded_owners);
        let mut tasks = JoinSet::new();

        for (partition_index, events) in partitions.into_iter().enumerate() {
            let orchestrator = Arc::clone(&self);
            let excluded_owners = Arc::clone(&excluded_owners);
            let directory = pool.checkout();
            let sink = Arc::clone(&sink);

            tasks.spawn(async move {
                let result = orchestrator
                    .cluster_partition(events, &excluded_owners, directory.as_ref())
                    .await;

                if let Err(error) = sink.apply(&result.updates).await {
                    tracing::error!(
                        partition_index,
                        %error,
                        "failed to hand partition updates to the persistence sink"
                    );
                }

                result.summary
            });
        }

        let mut total = BatchSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => total.merge(&summary),
                Err(error) => tracing::error!(%error, "partition task failed"),
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{
        AddressClassification, AddressRecord, AdminLevels, DirectoryError,
    };
    use roost_env::InstantClock;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn event(owner_id: i64, x: f64, y: f64) -> RawEvent {
        RawEvent {
            id: Uuid::new_v4(),
            owner_id,
            coordinate: Some([x, y]),
        }
    }

    /// Seven-point layout: five mutually-connected points, two isolated.
    fn seven_point_partition(owner_id: i64) -> Vec<RawEvent> {
        vec![
            event(owner_id, 0.0, 0.0),
            event(owner_id, 10.0, 0.0),
            event(owner_id, 10.0, 10.0),
            event(owner_id, 0.0, 10.0),
            event(owner_id, 5.0, 5.0),
            event(owner_id, 500.0, 500.0),
            event(owner_id, 900.0, 100.0),
        ]
    }

    fn sample_address() -> AddressRecord {
        AddressRecord {
            uprn: "10002283332".to_string(),
            coordinates: [6.0, 5.0],
            postcode: "NP20 1AA".to_string(),
            levels: AdminLevels {
                oa11: "W00000001".to_string(),
                msoa11: "W02000001".to_string(),
                lsoa11: "W01000001".to_string(),
                oslaua: "W06000001".to_string(),
                osward: "W05000001".to_string(),
                wz11: "W33000001".to_string(),
            },
            classification: AddressClassification {
                full: "RD02".to_string(),
                abbreviated: "RD".to_string(),
            },
        }
    }

    struct ScriptedDirectory {
        reply: Result<Option<AddressRecord>, DirectoryError>,
    }

    #[async_trait]
    impl AddressDirectory for ScriptedDirectory {
        async fn nearest(
            &self,
            _centroid: [f64; 2],
            _max_radius: f64,
        ) -> Result<Option<AddressRecord>, DirectoryError> {
            self.reply.clone()
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<Vec<PointUpdate>>>,
    }

    #[async_trait]
    impl UpdateSink for CollectingSink {
        async fn apply(&self, updates: &[PointUpdate]) -> Result<(), SinkError> {
            self.batches.lock().unwrap().push(updates.to_vec());
            Ok(())
        }
    }

    fn orchestrator(config: BatchConfig) -> BatchOrchestrator {
        BatchOrchestrator::new(config, Arc::new(InstantClock::new()))
    }

    #[test]
    fn test_batch_config_default() {
        let config = BatchConfig::default();
        assert_eq!(config.eps, 20);
        assert_eq!(config.min_points, 3);
        assert_eq!(config.block_size, 1000);
        assert_eq!(config.address_radius, 300.0);
        assert_eq!(config.robot_threshold, 30_000);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_seven_point_scenario() {
        let directory = ScriptedDirectory { reply: Ok(None) };
        let orchestrator = orchestrator(BatchConfig::default());

        let result = orchestrator
            .cluster_partition(seven_point_partition(31), &HashSet::new(), &directory)
            .await;

        assert_eq!(result.summary.owners, 1);
        assert_eq!(result.summary.clusters, 1);
        assert_eq!(result.summary.noise, 2);
        assert_eq!(result.summary.address_failures, 0);

        // every point got exactly one update
        assert_eq!(result.updates.len(), 7);
        let unique_points: HashSet<Uuid> =
            result.updates.iter().map(|update| update.point_id).collect();
        assert_eq!(unique_points.len(), 7);

        for update in &result.updates {
            assert_eq!(update.owner_point_count, 7);
        }

        // the size-5 cluster comes first (seeded from index 0) and is a
        // real cluster; the isolated points are noise
        let first = &result.updates[0].descriptor;
        assert_eq!(first.count, 5);
        assert_eq!(first.kind, ClusterKind::Cluster);
        assert_eq!(first.cluster_id, "31_NA_0");

        let last = &result.updates[6].descriptor;
        assert_eq!(last.count, 1);
        assert_eq!(last.kind, ClusterKind::Noise);
        assert_eq!(last.cluster_id, "31_noise_2");
    }

    #[tokio::test]
    async fn test_robot_owner_excluded_with_zero_descriptors() {
        let directory = ScriptedDirectory { reply: Ok(None) };
        let config = BatchConfig {
            robot_threshold: 10,
            ..BatchConfig::default()
        };
        let orchestrator = orchestrator(config);

        let events: Vec<RawEvent> = (0..11).map(|i| event(8, i as f64, 0.0)).collect();
        let result = orchestrator
            .cluster_partition(events, &HashSet::new(), &directory)
            .await;

        assert!(result.updates.is_empty());
        assert_eq!(result.summary.excluded_owners, 1);
        assert_eq!(result.summary.clusters, 0);
        assert_eq!(
            result.owner_outcomes,
            vec![OwnerOutcome::Excluded {
                owner_id: 8,
                point_count: 11
            }]
        );
    }

    #[tokio::test]
    async fn test_directory_outage_degrades_without_aborting_owners() {
        let directory = ScriptedDirectory {
            reply: Err(DirectoryError::Unreachable("refused".to_string())),
        };
        let orchestrator = orchestrator(BatchConfig::default());

        // two owners, each with one real cluster
        let mut events = seven_point_partition(1);
        events.extend(seven_point_partition(2));

        let result = orchestrator
            .cluster_partition(events, &HashSet::new(), &directory)
            .await;

        // both owners fully processed despite every lookup failing
        assert_eq!(result.summary.owners, 2);
        assert_eq!(result.summary.clusters, 2);
        assert_eq!(result.summary.address_failures, 2);
        assert_eq!(result.updates.len(), 14);

        let failed = &result.updates[0].descriptor;
        assert_eq!(failed.address, AddressOutcome::Unavailable);
        assert!(failed.cluster_id.contains("FAILURE"));
    }

    #[tokio::test]
    async fn test_malformed_events_are_skipped_not_fatal() {
        let directory = ScriptedDirectory { reply: Ok(None) };
        let orchestrator = orchestrator(BatchConfig::default());

        let mut events = vec![event(5, 0.0, 0.0), event(5, 3.0, 0.0)];
        events.push(RawEvent {
            id: Uuid::new_v4(),
            owner_id: 5,
            coordinate: None,
        });

        let result = orchestrator
            .cluster_partition(events, &HashSet::new(), &directory)
            .await;

        assert_eq!(result.summary.malformed_events, 1);
        assert_eq!(result.updates.len(), 2);
    }

    #[tokio::test]
    async fn test_resolved_addresses_flow_into_updates() {
        let directory = ScriptedDirectory {
            reply: Ok(Some(sample_address())),
        };
        let orchestrator = orchestrator(BatchConfig::default());

        let result = orchestrator
            .cluster_partition(seven_point_partition(12), &HashSet::new(), &directory)
            .await;

        let first = &result.updates[0].descriptor;
        match &first.address {
            AddressOutcome::Resolved { record, distance } => {
                assert_eq!(record.postcode, "NP20 1AA");
                // centroid (5, 5), address (6, 5)
                assert_eq!(*distance, 1.0);
            }
            other => panic!("expected resolved address, got {other:?}"),
        }
        assert_eq!(first.cluster_id, "12_NP20_1AA_0");
    }

    #[tokio::test]
    async fn test_partitions_fan_out_and_merge_summaries() {
        let orchestrator = Arc::new(orchestrator(BatchConfig::default()));
        let pool = Arc::new(DirectoryPool::new(vec![
            Arc::new(ScriptedDirectory { reply: Ok(None) }) as Arc<dyn AddressDirectory>,
            Arc::new(ScriptedDirectory { reply: Ok(None) }) as Arc<dyn AddressDirectory>,
        ]));
        let sink = Arc::new(CollectingSink::default());

        let partitions = vec![
            seven_point_partition(100),
            seven_point_partition(200),
            seven_point_partition(300),
        ];

        let summary = Arc::clone(&orchestrator)
            .cluster_partitions(
                partitions,
                HashSet::new(),
                pool,
                Arc::clone(&sink) as Arc<dyn UpdateSink>,
            )
            .await;

        assert_eq!(summary.owners, 3);
        assert_eq!(summary.clusters, 3);
        assert_eq!(summary.noise, 6);

        // one sink handoff per partition, each carrying its 7 updates
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        for batch in batches.iter() {
            assert_eq!(batch.len(), 7);
        }

        // updates are keyed by point id, unordered across partitions
        let mut per_owner: HashMap<i64, usize> = HashMap::new();
        for batch in batches.iter() {
            for update in batch {
                *per_owner.entry(update.descriptor.owner_id).or_insert(0) += 1;
            }
        }
        assert_eq!(per_owner[&100], 7);
        assert_eq!(per_owner[&200], 7);
        assert_eq!(per_owner[&300], 7);
    }

    #[tokio::test]
    async fn test_denylisted_owner_never_reaches_clustering() {
        let directory = ScriptedDirectory { reply: Ok(None) };
        let orchestrator = orchestrator(BatchConfig::default());

        let excluded: HashSet<i64> = [66].into_iter().collect();
        let mut events = seven_point_partition(66);
        events.extend(vec![event(9, 0.0, 0.0)]);

        let result = orchestrator
            .cluster_partition(events, &excluded, &directory)
            .await;

        assert_eq!(result.summary.owners, 1);
        assert_eq!(result.updates.len(), 1);
        assert!(result
            .updates
            .iter()
            .all(|update| update.descriptor.owner_id == 9));
    }
}
