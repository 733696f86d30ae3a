//! Shared DNS state: the currently published [`RecordTable`].
//!
//! The discovery cycle is the single writer; every query is a reader. Readers
//! take an `Arc` snapshot of the table and keep using it for the rest of the
//! query, so a concurrent swap never hands them a mix of two generations.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::container::ContainerRecord;
use crate::metrics;
use crate::records::{DuplicatePolicy, RecordTable};

/// Thread-safe handle to the active record table.
#[derive(Debug, Clone)]
pub struct DnsState {
    inner: Arc<DnsStateInner>,
}

#[derive(Debug)]
struct DnsStateInner {
    table: ArcSwap<RecordTable>,
    generation: AtomicU64,
    policy: DuplicatePolicy,
}

impl Default for DnsState {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

impl DnsState {
    /// Create a state holding an empty table.
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            inner: Arc::new(DnsStateInner {
                table: ArcSwap::from_pointee(RecordTable::default()),
                generation: AtomicU64::new(0),
                policy,
            }),
        }
    }

    /// Replace the table with one compiled from `containers`.
    ///
    /// `containers` is the complete current set, not a delta. Queries
    /// dispatched after this returns observe the new table.
    pub fn update(&self, containers: &[ContainerRecord]) -> Arc<RecordTable> {
        let table = RecordTable::compile(containers, self.inner.policy);
        self.publish(table)
    }

    /// Publish an already compiled table.
    pub fn publish(&self, table: RecordTable) -> Arc<RecordTable> {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let table = Arc::new(table.with_generation(generation));

        debug!(
            generation,
            domains = table.domains_count(),
            records = table.records_count(),
            "publishing record table"
        );

        self.inner.table.store(Arc::clone(&table));
        metrics::record_table_swap(table.domains_count(), table.records_count());
        table
    }

    /// Stable snapshot of the current table.
    pub fn snapshot(&self) -> Arc<RecordTable> {
        self.inner.table.load_full()
    }

    /// Policy applied when compiling tables.
    pub fn policy(&self) -> DuplicatePolicy {
        self.inner.policy
    }

    /// Generation of the current table (0 before the first update).
    pub fn generation(&self) -> u64 {
        self.inner.table.load().generation()
    }

    /// Get count of domains in the current table.
    pub fn domains_count(&self) -> usize {
        self.inner.table.load().domains_count()
    }

    /// Get count of records in the current table.
    pub fn records_count(&self) -> usize {
        self.inner.table.load().records_count()
    }

    /// Emit current state metrics.
    pub fn emit_metrics(&self) {
        let table = self.inner.table.load();
        metrics::record_state_counts(table.domains_count(), table.records_count());
        metrics::record_generation(table.generation());
    }
}
