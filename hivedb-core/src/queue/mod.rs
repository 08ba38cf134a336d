//! Write queue - per-handle serialization of mutating operations
//!
//! The embedded engine tolerates exactly one writer per database file, so
//! every mutating operation against a handle is funneled through a single
//! dedicated worker thread that executes operations strictly in enqueue
//! order. Operations for different handles run on different workers and
//! have no ordering relationship.
//!
//! Metrics transitions happen inside the same critical sections as queue
//! state transitions, so a snapshot is always internally consistent.

use crate::{HiveError, QueueItem, QueueMetrics, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

/// A queued mutating operation. Runs on the worker thread with exclusive
/// access to the handle's connection; returns the number of affected rows.
pub type WriteOp = Box<dyn FnOnce(&mut Connection) -> Result<usize> + Send + 'static>;

/// Shared access to a handle's connection. `None` once the handle closes.
pub type SharedConnection = Arc<Mutex<Option<Connection>>>;

struct QueuedWrite {
    op: WriteOp,
    label: String,
    seq: u64,
    enqueued_at: Instant,
    deadline: Option<Instant>,
    result_tx: Sender<Result<usize>>,
}

/// The completion side of an enqueued write. Dropping the ticket abandons
/// the result; the operation itself still executes.
pub struct WriteTicket {
    rx: Receiver<Result<usize>>,
}

impl WriteTicket {
    /// Block until the queued operation resolves.
    pub fn wait(self) -> Result<usize> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(HiveError::Internal("write worker dropped operation".into())))
    }
}

#[derive(Default)]
struct QueueState {
    queue_size: usize,
    processing_count: usize,
    total_processed: u64,
    total_errors: u64,
    total_expired: u64,
    /// Operations that reached the worker; weight of the wait average
    started: u64,
    average_wait_ms: f64,
    average_process_ms: f64,
    pending: Vec<(u64, String, Instant)>,
}

/// FIFO write queue bound to one handle's connection.
pub struct WriteQueue {
    name: String,
    tx: Mutex<Option<Sender<QueuedWrite>>>,
    state: Arc<Mutex<QueueState>>,
    max_depth: Option<usize>,
    seq: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Spawn the worker thread for a handle's connection.
    pub fn start(
        name: &str,
        conn: SharedConnection,
        max_depth: Option<usize>,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<QueuedWrite>();
        let state = Arc::new(Mutex::new(QueueState::default()));

        let worker_state = Arc::clone(&state);
        let worker_name = name.to_string();
        let worker = thread::Builder::new()
            .name(format!("hivedb-writer-{name}"))
            .spawn(move || worker_loop(&worker_name, &conn, &worker_state, &rx))
            .map_err(|e| {
                HiveError::Internal(format!("failed to spawn writer thread for {name}: {e}"))
            })?;

        Ok(Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            state,
            max_depth,
            seq: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue a mutating operation; returns a ticket resolving with the
    /// operation's result. Fails fast with `QueueSaturated` when a depth cap
    /// is configured and reached, and `HandleClosed` after shutdown.
    pub fn enqueue(
        &self,
        label: &str,
        deadline: Option<Duration>,
        op: WriteOp,
    ) -> Result<WriteTicket> {
        let tx_guard = self.tx.lock();
        let tx = tx_guard
            .as_ref()
            .ok_or_else(|| HiveError::HandleClosed(self.name.clone()))?;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let job = QueuedWrite {
            op,
            label: label.to_string(),
            seq,
            enqueued_at: now,
            deadline: deadline.map(|d| now + d),
            result_tx,
        };

        // State update and channel send share one critical section so the
        // channel order matches the recorded enqueue order.
        {
            let mut state = self.state.lock();
            if let Some(cap) = self.max_depth {
                if state.queue_size >= cap {
                    return Err(HiveError::QueueSaturated(state.queue_size));
                }
            }
            state.queue_size += 1;
            state.pending.push((seq, job.label.clone(), now));
            if tx.send(job).is_err() {
                state.queue_size -= 1;
                state.pending.retain(|(s, _, _)| *s != seq);
                return Err(HiveError::HandleClosed(self.name.clone()));
            }
        }

        Ok(WriteTicket { rx: result_rx })
    }

    /// Enqueue and block until the operation resolves.
    pub fn execute(&self, label: &str, op: WriteOp) -> Result<usize> {
        self.enqueue(label, None, op)?.wait()
    }

    /// Current metrics snapshot for this queue.
    pub fn metrics(&self) -> QueueMetrics {
        let state = self.state.lock();
        QueueMetrics {
            queue_size: state.queue_size,
            processing_count: state.processing_count,
            total_processed: state.total_processed,
            total_errors: state.total_errors,
            total_expired: state.total_expired,
            average_wait_time: state.average_wait_ms,
            average_process_time: state.average_process_ms,
            queue_items: state
                .pending
                .iter()
                .map(|(_, label, enqueued_at)| QueueItem {
                    label: label.clone(),
                    waited_ms: as_millis(enqueued_at.elapsed()),
                })
                .collect(),
        }
    }

    /// Stop accepting work, drain queued operations, join the worker.
    pub fn shutdown(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    name: &str,
    conn: &SharedConnection,
    state: &Arc<Mutex<QueueState>>,
    rx: &Receiver<QueuedWrite>,
) {
    while let Ok(job) = rx.recv() {
        let started_at = Instant::now();
        let expired = job.deadline.is_some_and(|d| started_at >= d);

        {
            let mut state = state.lock();
            state.queue_size = state.queue_size.saturating_sub(1);
            state.pending.retain(|(seq, _, _)| *seq != job.seq);
            if expired {
                state.total_expired += 1;
            } else {
                state.started += 1;
                let wait_ms = as_millis(started_at - job.enqueued_at);
                let n = state.started as f64;
                state.average_wait_ms += (wait_ms - state.average_wait_ms) / n;
                state.processing_count += 1;
            }
        }

        if expired {
            // Caller abandoned the request; skip execution entirely.
            let _ = job.result_tx.send(Err(HiveError::Timeout));
            continue;
        }

        let result = {
            let mut guard = conn.lock();
            match guard.as_mut() {
                Some(conn) => (job.op)(conn),
                None => Err(HiveError::HandleClosed(name.to_string())),
            }
        };
        let process_ms = as_millis(started_at.elapsed());

        {
            let mut state = state.lock();
            state.processing_count = state.processing_count.saturating_sub(1);
            state.total_processed += 1;
            if result.is_err() {
                state.total_errors += 1;
            }
            let n = state.total_processed as f64;
            state.average_process_ms += (process_ms - state.average_process_ms) / n;
        }

        if let Err(e) = &result {
            // A failed operation resolves its own ticket and never stalls
            // the operations behind it.
            warn!("queued write '{}' on {} failed: {}", job.label, name, e);
        }
        let _ = job.result_tx.send(result);
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}
