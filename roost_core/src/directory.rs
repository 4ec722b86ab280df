//! Address directory collaborator interface.
//!
//! The directory is the one shared external resource of a batch run: a
//! read-only, geo-indexed address base answering nearest-neighbor queries
//! around cluster centroids. It may be served by several interchangeable
//! read replicas; [`DirectoryPool`] hands them out round-robin so
//! concurrent partitions spread their load without any coordination.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Administrative-level codes attached to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminLevels {
    pub oa11: String,
    pub msoa11: String,
    pub lsoa11: String,
    pub oslaua: String,
    pub osward: String,
    pub wz11: String,
}

/// Usage classification of an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressClassification {
    /// Full classification code
    pub full: String,

    /// Abbreviated classification code
    pub abbreviated: String,
}

/// One record of the external address base. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Unique property reference number
    pub uprn: String,

    /// Planar projected coordinate of the address
    pub coordinates: [f64; 2],

    /// Postcode, as stored (may contain a space)
    pub postcode: String,

    /// Administrative-level codes
    pub levels: AdminLevels,

    /// Usage classification
    pub classification: AddressClassification,
}

/// Failures of the address directory.
///
/// The two classes are signaled separately so callers can tell a replica
/// that never answered from one that answered with an error; both are
/// transient and retried under the same bounded policy.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    /// Could not establish a connection to the directory endpoint
    #[error("address directory unreachable: {0}")]
    Unreachable(String),

    /// Connected, but the nearest-neighbor query itself failed
    #[error("address directory query failed: {0}")]
    Query(String),
}

/// Nearest-address lookup collaborator.
///
/// Implementations must tolerate concurrent read-only queries from many
/// partition workers.
#[async_trait]
pub trait AddressDirectory: Send + Sync {
    /// Returns the single nearest address within `max_radius` distance
    /// units of `centroid`, or `None` when no address is that close -
    /// an expected, common outcome, not an error.
    async fn nearest(
        &self,
        centroid: [f64; 2],
        max_radius: f64,
    ) -> Result<Option<AddressRecord>, DirectoryError>;
}

/// Round-robin pool of interchangeable directory replicas.
pub struct DirectoryPool {
    endpoints: Vec<Arc<dyn AddressDirectory>>,
    next: AtomicUsize,
}

impl DirectoryPool {
    /// Creates a pool over the given replicas.
    ///
    /// # Panics
    ///
    /// Panics if `endpoints` is empty; a batch run cannot resolve
    /// addresses without at least one directory.
    pub fn new(endpoints: Vec<Arc<dyn AddressDirectory>>) -> Self {
        assert!(
            !endpoints.is_empty(),
            "directory pool requires at least one endpoint"
        );
        Self {
            endpoints,
            next: AtomicUsize::new(0),
        }
    }

    /// Hands out the next replica, cycling through the pool.
    pub fn checkout(&self) -> Arc<dyn AddressDirectory> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&self.endpoints[index % self.endpoints.len()])
    }

    /// Number of replicas in the pool.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false; the constructor rejects empty pools.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedDirectory(&'static str);

    #[async_trait]
    impl AddressDirectory for NamedDirectory {
        async fn nearest(
            &self,
            _centroid: [f64; 2],
            _max_radius: f64,
        ) -> Result<Option<AddressRecord>, DirectoryError> {
            Err(DirectoryError::Query(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn test_pool_cycles_round_robin() {
        let pool = DirectoryPool::new(vec![
            Arc::new(NamedDirectory("a")),
            Arc::new(NamedDirectory("b")),
        ]);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let endpoint = pool.checkout();
            match endpoint.nearest([0.0, 0.0], 300.0).await {
                Err(DirectoryError::Query(name)) => seen.push(name),
                other => panic!("unexpected result: {other:?}"),
            }
        }

        assert_eq!(seen, vec!["a", "b", "a", "b"]);
    }

    #[test]
    #[should_panic(expected = "at least one endpoint")]
    fn test_empty_pool_rejected() {
        DirectoryPool::new(Vec::new());
    }
}
