//! Multi-field coordinator
//!
//! Owns one per-field index per registered field slot, the asynchronous
//! write pipeline (bounded mutation queue + worker), the reclamation queue
//! and worker, and the conjunction of per-field search results.

mod intersect;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::field::FieldRangeIndex;
use crate::metrics::IndexMetrics;
use crate::models::{DocId, FieldId, FieldOperation, FieldType, FilterInfo};
use crate::profile::Profile;
use crate::reclaim::{spawn_reclaimer, ReclaimQueue};
use crate::result::{MultiRangeQueryResults, RangeQueryResult};
use crate::Result;

use worker::{spawn_mutation_worker, FieldRegistry};

/// What a filter search concluded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    /// No usable filter constrained the query; the caller should treat the
    /// candidate set as universal
    Unconstrained,
    /// The conjunction is provably empty
    Empty,
    /// Matches were produced; the count is an upper bound, the result
    /// bitmaps are the truth
    Hits(usize),
}

/// Memory held by posting buffers across all fields
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub dense_bytes: u64,
    pub sparse_bytes: u64,
    pub node_bytes: u64,
}

/// The attribute-filtering coordinator.
///
/// Request threads call [`add`](Self::add) / [`delete`](Self::delete)
/// (asynchronous, applied by the mutation worker in enqueue order) and
/// [`search`](Self::search) (synchronous, reads the live index without a
/// snapshot). Dropping the coordinator stops the pipeline, drains both
/// queues, and releases every field.
pub struct MultiFieldIndex {
    config: IndexConfig,
    fields: FieldRegistry,
    mutation_tx: Option<Sender<FieldOperation>>,
    reclaim: Option<ReclaimQueue>,
    running: Arc<AtomicBool>,
    enqueued: Arc<AtomicU64>,
    applied: Arc<AtomicU64>,
    mutation_worker: Option<JoinHandle<()>>,
    reclaim_worker: Option<JoinHandle<()>>,
    metrics: Arc<IndexMetrics>,
}

impl MultiFieldIndex {
    /// Build the coordinator and start both workers. The field registry is
    /// sized from the profile; slots are filled by
    /// [`add_field`](Self::add_field).
    pub fn new(profile: Arc<dyn Profile>, config: IndexConfig) -> Result<Self> {
        let metrics = Arc::new(IndexMetrics::new()?);
        let fields: FieldRegistry = Arc::new(RwLock::new(vec![None; profile.field_count()]));

        let (mutation_tx, mutation_rx) = bounded(config.mutation_queue_depth);
        let reclaim = ReclaimQueue::new(config.reclaim_grace);

        let running = Arc::new(AtomicBool::new(true));
        let writer_running = Arc::new(AtomicBool::new(true));
        let enqueued = Arc::new(AtomicU64::new(0));
        let applied = Arc::new(AtomicU64::new(0));

        let mutation_worker = spawn_mutation_worker(
            mutation_rx,
            fields.clone(),
            profile,
            reclaim.handle(),
            running.clone(),
            writer_running.clone(),
            applied.clone(),
            metrics.clone(),
        );
        let reclaim_worker = spawn_reclaimer(reclaim.receiver(), running.clone(), writer_running);

        Ok(Self {
            config,
            fields,
            mutation_tx: Some(mutation_tx),
            reclaim: Some(reclaim),
            running,
            enqueued,
            applied,
            mutation_worker: Some(mutation_worker),
            reclaim_worker: Some(reclaim_worker),
            metrics,
        })
    }

    /// Register a field index at `field_id` with the configured defaults
    pub fn add_field(&self, field_id: FieldId, field_type: FieldType) -> Result<()> {
        let mut fields = self.fields.write();
        let slot = fields
            .get_mut(field_id)
            .ok_or(IndexError::UnknownField(field_id))?;
        *slot = Some(Arc::new(FieldRangeIndex::new(
            &self.config,
            field_id,
            field_type,
        )));
        Ok(())
    }

    fn field(&self, field_id: FieldId) -> Option<Arc<FieldRangeIndex>> {
        self.fields.read().get(field_id).and_then(Clone::clone)
    }

    fn enqueue(&self, op: FieldOperation) -> Result<()> {
        let Some(tx) = &self.mutation_tx else {
            return Err(IndexError::StoreClosed);
        };
        match tx.try_send(op) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Release);
                self.metrics.mutation_queue_depth.set(tx.len() as f64);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    doc = op.doc_id,
                    field = op.field_id,
                    "mutation queue full, operation rejected"
                );
                Err(IndexError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(IndexError::StoreClosed),
        }
    }

    /// Queue an add of `doc_id`'s value for `field_id`. A slot with no
    /// registered field accepts and ignores the call.
    pub fn add(&self, doc_id: DocId, field_id: FieldId) -> Result<()> {
        if self.fields.read().len() <= field_id {
            return Err(IndexError::UnknownField(field_id));
        }
        if self.field(field_id).is_none() {
            return Ok(());
        }
        self.enqueue(FieldOperation::add(doc_id, field_id))
    }

    /// Queue a delete of `doc_id`'s value for `field_id`
    pub fn delete(&self, doc_id: DocId, field_id: FieldId) -> Result<()> {
        if self.fields.read().len() <= field_id {
            return Err(IndexError::UnknownField(field_id));
        }
        if self.field(field_id).is_none() {
            return Ok(());
        }
        self.enqueue(FieldOperation::delete(doc_id, field_id))
    }

    /// Block until every queued mutation has been applied, or the timeout
    /// elapses. Returns whether the pipeline drained.
    pub fn wait_for_writes(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.applied.load(Ordering::Acquire) < self.enqueued.load(Ordering::Acquire) {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Mutations enqueued but not yet applied
    pub fn pending_mutations(&self) -> u64 {
        self.enqueued.load(Ordering::Acquire) - self.applied.load(Ordering::Acquire)
    }

    /// Run the conjunction of `filters` and collect the result into `out`.
    ///
    /// String filters with all-of semantics are split into one sub-filter
    /// per tag before dispatch; a filter naming an unregistered field makes
    /// the whole query unconstrained, and any filter with no matches
    /// short-circuits to [`SearchOutcome::Empty`].
    pub fn search(&self, filters: &[FilterInfo], out: &mut MultiRangeQueryResults) -> SearchOutcome {
        out.clear();
        let timer = self.metrics.search_latency.start_timer();
        let outcome = self.search_inner(filters, out);
        timer.observe_duration();

        let label = match outcome {
            SearchOutcome::Unconstrained => "unconstrained",
            SearchOutcome::Empty => "empty",
            SearchOutcome::Hits(_) => "hits",
        };
        self.metrics.searches_total.with_label_values(&[label]).inc();
        outcome
    }

    fn search_inner(
        &self,
        filters: &[FilterInfo],
        out: &mut MultiRangeQueryResults,
    ) -> SearchOutcome {
        let mut expanded: Vec<(Arc<FieldRangeIndex>, FilterInfo)> = Vec::new();
        for filter in filters {
            let Some(field) = self.field(filter.field_id) else {
                debug!(field = filter.field_id, "filter on unregistered field");
                return SearchOutcome::Unconstrained;
            };
            if !field.is_numeric() && !filter.is_union {
                // all-of tags: one sub-filter per tag, conjunction below
                let delimiter = field.delimiter();
                for tag in filter
                    .lower_value
                    .split(|&b| b == delimiter)
                    .filter(|t| !t.is_empty())
                {
                    expanded.push((
                        field.clone(),
                        FilterInfo::tags_any(filter.field_id, tag.to_vec()),
                    ));
                }
            } else {
                expanded.push((field, filter.clone()));
            }
        }

        if expanded.is_empty() {
            return SearchOutcome::Unconstrained;
        }

        if expanded.len() == 1 {
            let (field, filter) = &expanded[0];
            let mut result = RangeQueryResult::new();
            let span = field.search(&filter.lower_value, &filter.upper_value, &mut result);
            let hits = result.doc_num();
            if span > 0 && hits > 0 {
                out.add(result);
                return SearchOutcome::Hits(hits);
            }
            return SearchOutcome::Empty;
        }

        let mut results: Vec<RangeQueryResult> = Vec::with_capacity(expanded.len());
        let mut shortest_idx = 0;
        let mut shortest = usize::MAX;
        for (field, filter) in &expanded {
            let mut result = RangeQueryResult::new();
            let span = field.search(&filter.lower_value, &filter.upper_value, &mut result);
            if span == 0 {
                // one empty field empties the conjunction
                return SearchOutcome::Empty;
            }
            if result.doc_num() < shortest {
                shortest = result.doc_num();
                shortest_idx = results.len();
            }
            results.push(result);
        }

        let mut merged = RangeQueryResult::new();
        let count = intersect::intersect(&results, shortest_idx, &mut merged);
        if count > 0 {
            out.add(merged);
            SearchOutcome::Hits(count)
        } else {
            SearchOutcome::Empty
        }
    }

    /// Posting buffer memory across all fields
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        let fields: Vec<_> = self.fields.read().iter().flatten().cloned().collect();
        for field in fields {
            usage.node_bytes += field.scan_memory(&mut usage.dense_bytes, &mut usage.sparse_bytes);
        }
        usage
    }

    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }
}

impl Drop for MultiFieldIndex {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        // closing the channel lets the worker exit as soon as it drains
        self.mutation_tx.take();
        if let Some(worker) = self.mutation_worker.take() {
            if worker.join().is_err() {
                warn!("mutation worker panicked");
            }
        }
        self.reclaim.take();
        if let Some(worker) = self.reclaim_worker.take() {
            if worker.join().is_err() {
                warn!("reclamation worker panicked");
            }
        }
        // field indexes drop with the registry; each closes its store
    }
}
