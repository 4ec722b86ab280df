//! Point model and per-owner grouping.
//!
//! Raw geo-events arrive from the input feed with whatever quality the
//! upstream importer produced: coordinates may be missing entirely or
//! non-finite after a failed projection. This module validates each event
//! individually and groups the survivors into owned, contiguous per-owner
//! point lists that the clustering pass consumes.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// A geo-event as supplied by the input feed, before validation.
///
/// The `id` is opaque to the core; it belongs to the persistence
/// collaborator and is only echoed back in update instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Persistence-side identifier of the event
    pub id: Uuid,

    /// Owning user of the event
    pub owner_id: i64,

    /// Planar projected coordinate (eastings/northings), if the importer
    /// managed to produce one
    pub coordinate: Option<[f64; 2]>,
}

/// A validated, immutable point in the planar reference system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Persistence-side identifier of the event
    pub id: Uuid,

    /// Owning user of the point
    pub owner_id: i64,

    /// Planar projected coordinate
    pub coordinate: Vector2<f64>,
}

/// Result of grouping one partition's events by owner.
///
/// Owner iteration order is ascending owner id, so a partition always
/// processes its owners in the same order across runs.
#[derive(Debug, Default)]
pub struct OwnerMap {
    /// Validated points, grouped by owner, input order preserved
    pub owners: BTreeMap<i64, Vec<GeoPoint>>,

    /// Events dropped for missing or non-finite coordinates
    pub malformed_events: usize,

    /// Events dropped because their owner is on the standing exclusion set
    pub denylisted_events: usize,
}

impl OwnerMap {
    /// Total number of validated points across all owners.
    pub fn point_count(&self) -> usize {
        self.owners.values().map(Vec::len).sum()
    }
}

/// Group a partition's raw events into per-owner point lists.
///
/// Malformed events (no coordinate, or a NaN/infinite component) fail
/// individually: they are logged, counted and skipped, never aborting the
/// partition. Owners on `excluded_owners` - the run-level set of known
/// automated accounts, built once and threaded through explicitly - are
/// dropped before any points accumulate for them.
pub fn group_by_owner(
    events: impl IntoIterator<Item = RawEvent>,
    excluded_owners: &HashSet<i64>,
) -> OwnerMap {
    let mut map = OwnerMap::default();

    for event in events {
        if excluded_owners.contains(&event.owner_id) {
            map.denylisted_events += 1;
            continue;
        }

        let coordinate = match event.coordinate {
            Some([x, y]) if x.is_finite() && y.is_finite() => Vector2::new(x, y),
            _ => {
                tracing::warn!(
                    event_id = %event.id,
                    owner_id = event.owner_id,
                    "dropping event with missing or non-finite coordinate"
                );
                map.malformed_events += 1;
                continue;
            }
        };

        map.owners
            .entry(event.owner_id)
            .or_insert_with(Vec::new)
            .push(GeoPoint {
                id: event.id,
                owner_id: event.owner_id,
                coordinate,
            });
    }

    map
}
