//! Deferred buffer reclamation
//!
//! A retired posting buffer must stay readable until every reader that
//! captured a handle before the swap has finished its scan. Writers hand
//! the superseded buffer to the reclamation queue stamped with
//! `now + grace`; the worker holds each token until its deadline and then
//! drops it. The `Arc` inside the token makes the deadline a bound on
//! staleness, not on safety.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error};

use crate::posting::NodeBuffer;

/// How often blocked workers re-check the lifecycle flags
pub(crate) const WORKER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A superseded buffer with the earliest instant it may be released
pub struct ReclaimToken {
    buffer: Arc<NodeBuffer>,
    deadline: Instant,
}

impl ReclaimToken {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn buffer(&self) -> &Arc<NodeBuffer> {
        &self.buffer
    }
}

/// Producer side of the reclamation queue, cloned into writers
#[derive(Clone)]
pub struct ReclaimHandle {
    tx: Sender<ReclaimToken>,
    grace: Duration,
}

impl ReclaimHandle {
    /// Retire a buffer; it becomes releasable after the grace period
    pub fn retire(&self, buffer: Arc<NodeBuffer>) {
        let token = ReclaimToken {
            buffer,
            deadline: Instant::now() + self.grace,
        };
        if self.tx.send(token).is_err() {
            error!("reclamation queue is gone; buffer dropped immediately");
        }
    }
}

/// Unbounded FIFO of reclamation tokens plus its grace period
pub struct ReclaimQueue {
    tx: Sender<ReclaimToken>,
    rx: Receiver<ReclaimToken>,
    grace: Duration,
}

impl ReclaimQueue {
    pub fn new(grace: Duration) -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, grace }
    }

    pub fn handle(&self) -> ReclaimHandle {
        ReclaimHandle {
            tx: self.tx.clone(),
            grace: self.grace,
        }
    }

    /// Tokens waiting for their deadline
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn receiver(&self) -> Receiver<ReclaimToken> {
        self.rx.clone()
    }
}

/// Spawn the reclamation worker.
///
/// Runs while the coordinator runs, the mutation worker runs, or tokens
/// remain queued; each dequeue waits out the token's deadline before the
/// drop.
pub(crate) fn spawn_reclaimer(
    rx: Receiver<ReclaimToken>,
    running: Arc<AtomicBool>,
    writer_running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match rx.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(token) => {
                    let now = Instant::now();
                    if now < token.deadline {
                        thread::sleep(token.deadline - now);
                    }
                    drop(token);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !running.load(Ordering::Acquire) && !writer_running.load(Ordering::Acquire)
                    {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("reclamation worker exited");
    })
}
