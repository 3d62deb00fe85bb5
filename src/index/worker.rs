//! Mutation worker
//!
//! All writes to all fields funnel through one background thread, so
//! per-key ordering is enqueue ordering and posting nodes never see two
//! writers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::error::IndexError;
use crate::field::FieldRangeIndex;
use crate::metrics::IndexMetrics;
use crate::models::{FieldOperation, OperationKind};
use crate::profile::Profile;
use crate::reclaim::{ReclaimHandle, WORKER_POLL_INTERVAL};

pub(crate) type FieldRegistry = Arc<RwLock<Vec<Option<Arc<FieldRangeIndex>>>>>;

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_mutation_worker(
    rx: Receiver<FieldOperation>,
    fields: FieldRegistry,
    profile: Arc<dyn Profile>,
    reclaim: ReclaimHandle,
    running: Arc<AtomicBool>,
    writer_running: Arc<AtomicBool>,
    applied: Arc<AtomicU64>,
    metrics: Arc<IndexMetrics>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match rx.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(op) => {
                    apply(&fields, profile.as_ref(), &reclaim, &metrics, op);
                    applied.fetch_add(1, Ordering::Release);
                    metrics.mutation_queue_depth.set(rx.len() as f64);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        writer_running.store(false, Ordering::Release);
        debug!("mutation worker exited");
    })
}

fn apply(
    fields: &FieldRegistry,
    profile: &dyn Profile,
    reclaim: &ReclaimHandle,
    metrics: &IndexMetrics,
    op: FieldOperation,
) {
    let field = fields.read().get(op.field_id).and_then(Clone::clone);
    let Some(field) = field else {
        warn!(field = op.field_id, "mutation for unregistered field dropped");
        return;
    };

    let Some(key) = profile.field_raw_value(op.doc_id, op.field_id) else {
        warn!(
            doc = op.doc_id,
            field = op.field_id,
            "document has no raw value for field"
        );
        return;
    };

    match op.kind {
        OperationKind::Add => match field.add(&key, op.doc_id, reclaim) {
            Ok(true) => metrics.docs_added.inc(),
            Ok(false) => metrics.duplicate_adds.inc(),
            Err(err) => error!(doc = op.doc_id, field = op.field_id, %err, "add failed"),
        },
        OperationKind::Delete => match field.delete(&key, op.doc_id) {
            Ok(()) => metrics.docs_deleted.inc(),
            Err(IndexError::NotFound(_)) => metrics.stale_deletes.inc(),
            Err(err) => error!(doc = op.doc_id, field = op.field_id, %err, "delete failed"),
        },
    }
}
