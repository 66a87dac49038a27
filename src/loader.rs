//! Parallel bulk loader.
//!
//! One producer pulls transformed batches and feeds a bounded channel; N
//! workers each own their own sink connection and insert batches as they
//! arrive. The first fatal error flips a shared stop flag: the producer
//! stops reading, workers finish the batch already in flight and exit, and
//! the caller receives the partial totals together with the error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use crossbeam_channel::{Receiver, SendTimeoutError, bounded};
use log::{debug, error};

use crate::data::Value;
use crate::error::{LoadFailure, StoreError};
use crate::transform::OutputBatch;

/// Destination for transformed batches. Each worker builds and drives its
/// own instance, so implementations never share connections.
pub trait BatchSink {
    fn insert(&mut self, columns: &[String], rows: &[Vec<Value>]) -> Result<u64, StoreError>;
}

/// Cooperative cancellation handle; clone it and call [`cancel`] from
/// anywhere. The producer stops before its next batch, workers stop before
/// their next insert, and the load returns with partial totals.
///
/// [`cancel`]: CancelToken::cancel
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tuning for one load run.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub workers: usize,
    pub progress_interval: Duration,
    pub cancel: CancelToken,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            progress_interval: Duration::from_secs(1),
            cancel: CancelToken::new(),
        }
    }
}

/// Outcome of a load. Totals are valid even when the run failed or was
/// cancelled part-way through.
#[derive(Debug)]
pub struct LoadReport {
    pub rows_inserted: u64,
    pub batches_inserted: u64,
    pub elapsed: Duration,
    pub failure: Option<LoadFailure>,
    pub cancelled: bool,
}

impl LoadReport {
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_inserted as f64 / secs
        } else {
            0.0
        }
    }
}

struct ProgressState<P> {
    callback: P,
    last_at: Instant,
    last_total: u64,
}

struct Shared<'a, P> {
    inserted: &'a AtomicU64,
    batches_done: &'a AtomicU64,
    stop: &'a AtomicBool,
    first_error: &'a Mutex<Option<StoreError>>,
    progress: &'a Mutex<ProgressState<P>>,
    cancel: &'a CancelToken,
    interval: Duration,
}

impl<P> Clone for Shared<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Shared<'_, P> {}

/// Drains `batches` into `options.workers` concurrent sinks.
///
/// `on_progress` receives `(total rows inserted, rows per second)` no more
/// often than `options.progress_interval`, plus one terminal event, and the
/// totals it sees never decrease. The producer runs on the calling thread,
/// so the bounded queue applies backpressure directly to the source.
pub fn load_all<I, S, C, P>(
    batches: I,
    connect: C,
    options: &LoadOptions,
    on_progress: P,
) -> Result<LoadReport>
where
    I: Iterator<Item = Result<OutputBatch>>,
    S: BatchSink,
    C: Fn() -> Result<S, StoreError> + Sync,
    P: FnMut(u64, f64) + Send,
{
    ensure!(options.workers >= 1, "At least one worker is required");

    let started = Instant::now();
    let inserted = AtomicU64::new(0);
    let batches_done = AtomicU64::new(0);
    let stop = AtomicBool::new(false);
    let first_error: Mutex<Option<StoreError>> = Mutex::new(None);
    let progress = Mutex::new(ProgressState {
        callback: on_progress,
        last_at: started,
        last_total: 0,
    });

    let (sender, receiver) = bounded::<OutputBatch>(options.workers * 2);
    let mut produce_error: Option<anyhow::Error> = None;
    let mut cancelled = false;

    thread::scope(|scope| {
        for worker_id in 0..options.workers {
            let receiver = receiver.clone();
            let connect = &connect;
            let shared = Shared {
                inserted: &inserted,
                batches_done: &batches_done,
                stop: &stop,
                first_error: &first_error,
                progress: &progress,
                cancel: &options.cancel,
                interval: options.progress_interval,
            };
            scope.spawn(move || worker_loop(worker_id, receiver, connect, shared));
        }
        drop(receiver);

        'produce: for batch in batches {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if options.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let mut pending = match batch {
                Ok(batch) => {
                    if batch.rows.is_empty() {
                        continue;
                    }
                    batch
                }
                Err(err) => {
                    produce_error = Some(err);
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
            };
            // Re-check the stop and cancel flags while blocked on a full
            // queue, otherwise a failing worker could leave the producer
            // parked forever.
            loop {
                match sender.send_timeout(pending, Duration::from_millis(100)) {
                    Ok(()) => continue 'produce,
                    Err(SendTimeoutError::Timeout(batch)) => {
                        if stop.load(Ordering::SeqCst) {
                            break 'produce;
                        }
                        if options.cancel.is_cancelled() {
                            cancelled = true;
                            break 'produce;
                        }
                        pending = batch;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => break 'produce,
                }
            }
        }
        drop(sender);
    });

    let rows_total = inserted.load(Ordering::SeqCst);
    {
        // Terminal progress event so observers converge on the final total.
        let mut state = progress
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let delta = rows_total.saturating_sub(state.last_total);
        let secs = state.last_at.elapsed().as_secs_f64();
        let rate = if secs > 0.0 { delta as f64 / secs } else { 0.0 };
        (state.callback)(rows_total, rate);
    }

    let failure = first_error
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .map(LoadFailure::Store)
        .or_else(|| produce_error.map(|err| LoadFailure::Produce(format!("{err:#}"))));

    Ok(LoadReport {
        rows_inserted: rows_total,
        batches_inserted: batches_done.load(Ordering::SeqCst),
        elapsed: started.elapsed(),
        failure,
        cancelled: cancelled || options.cancel.is_cancelled(),
    })
}

fn worker_loop<S, C, P>(
    worker_id: usize,
    receiver: Receiver<OutputBatch>,
    connect: &C,
    shared: Shared<'_, P>,
) where
    S: BatchSink,
    C: Fn() -> Result<S, StoreError>,
    P: FnMut(u64, f64),
{
    let mut sink = match connect() {
        Ok(sink) => sink,
        Err(err) => {
            record_failure(worker_id, err, shared);
            return;
        }
    };
    while let Ok(batch) = receiver.recv() {
        if shared.stop.load(Ordering::SeqCst) || shared.cancel.is_cancelled() {
            break;
        }
        match sink.insert(&batch.columns, &batch.rows) {
            Ok(count) => {
                shared.inserted.fetch_add(count, Ordering::SeqCst);
                shared.batches_done.fetch_add(1, Ordering::SeqCst);
                maybe_report(shared);
            }
            Err(err) => {
                record_failure(worker_id, err, shared);
                break;
            }
        }
    }
    debug!("Worker {worker_id} finished");
}

fn record_failure<P>(worker_id: usize, err: StoreError, shared: Shared<'_, P>) {
    let mut slot = shared
        .first_error
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        error!("Worker {worker_id}: {err}");
        *slot = Some(err);
    } else {
        debug!("Worker {worker_id} stopped after another failure: {err}");
    }
    shared.stop.store(true, Ordering::SeqCst);
}

fn maybe_report<P: FnMut(u64, f64)>(shared: Shared<'_, P>) {
    // Contended or poisoned lock just means another worker is reporting.
    let Ok(mut state) = shared.progress.try_lock() else {
        return;
    };
    let elapsed = state.last_at.elapsed();
    if elapsed < shared.interval {
        return;
    }
    let total = shared.inserted.load(Ordering::SeqCst);
    let delta = total.saturating_sub(state.last_total);
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { delta as f64 / secs } else { 0.0 };
    (state.callback)(total, rate);
    state.last_at = Instant::now();
    state.last_total = total;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadFailure;

    struct MemorySink {
        rows: Arc<AtomicU64>,
        attempts: Arc<AtomicU64>,
        fail_on_attempt: Option<u64>,
    }

    impl BatchSink for MemorySink {
        fn insert(&mut self, _columns: &[String], rows: &[Vec<Value>]) -> Result<u64, StoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(attempt) == self.fail_on_attempt {
                return Err(StoreError::Server {
                    status: 500,
                    message: "boom".into(),
                });
            }
            self.rows.fetch_add(rows.len() as u64, Ordering::SeqCst);
            Ok(rows.len() as u64)
        }
    }

    fn batch(rows: usize) -> OutputBatch {
        OutputBatch {
            columns: vec!["c".to_string()],
            rows: (0..rows).map(|i| vec![Value::Integer(i as i64)]).collect(),
        }
    }

    fn batches(count: usize, rows: usize) -> impl Iterator<Item = Result<OutputBatch>> {
        (0..count).map(move |_| Ok(batch(rows)))
    }

    fn options(workers: usize) -> LoadOptions {
        LoadOptions {
            workers,
            progress_interval: Duration::ZERO,
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn inserts_every_batch_across_workers() {
        let rows = Arc::new(AtomicU64::new(0));
        let attempts = Arc::new(AtomicU64::new(0));
        let connect = || {
            Ok(MemorySink {
                rows: Arc::clone(&rows),
                attempts: Arc::clone(&attempts),
                fail_on_attempt: None,
            })
        };
        let report = load_all(batches(7, 10), connect, &options(3), |_, _| {}).unwrap();
        assert_eq!(report.rows_inserted, 70);
        assert_eq!(report.batches_inserted, 7);
        assert!(report.failure.is_none());
        assert!(!report.cancelled);
        assert_eq!(rows.load(Ordering::SeqCst), 70);
    }

    #[test]
    fn first_failure_short_circuits_the_run() {
        let rows = Arc::new(AtomicU64::new(0));
        let attempts = Arc::new(AtomicU64::new(0));
        let connect = || {
            Ok(MemorySink {
                rows: Arc::clone(&rows),
                attempts: Arc::clone(&attempts),
                fail_on_attempt: Some(3),
            })
        };
        let report = load_all(batches(6, 10), connect, &options(1), |_, _| {}).unwrap();
        assert_eq!(report.rows_inserted, 20);
        assert_eq!(report.batches_inserted, 2);
        assert!(matches!(
            report.failure,
            Some(LoadFailure::Store(StoreError::Server { status: 500, .. }))
        ));
        // Nothing was attempted after the failing insert.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn progress_totals_never_decrease_and_converge() {
        let rows = Arc::new(AtomicU64::new(0));
        let attempts = Arc::new(AtomicU64::new(0));
        let connect = || {
            Ok(MemorySink {
                rows: Arc::clone(&rows),
                attempts: Arc::clone(&attempts),
                fail_on_attempt: None,
            })
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_totals = Arc::clone(&seen);
        let report = load_all(batches(5, 4), connect, &options(1), move |total, _| {
            sink_totals.lock().unwrap().push(total);
        })
        .unwrap();
        let totals = seen.lock().unwrap();
        assert!(!totals.is_empty());
        assert!(totals.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(*totals.last().unwrap(), report.rows_inserted);
        assert_eq!(report.rows_inserted, 20);
    }

    #[test]
    fn cancellation_returns_partial_totals() {
        let rows = Arc::new(AtomicU64::new(0));
        let attempts = Arc::new(AtomicU64::new(0));
        let connect = || {
            Ok(MemorySink {
                rows: Arc::clone(&rows),
                attempts: Arc::clone(&attempts),
                fail_on_attempt: None,
            })
        };
        let opts = options(2);
        let cancel = opts.cancel.clone();
        let report = load_all(batches(50, 10), connect, &opts, move |total, _| {
            if total >= 30 {
                cancel.cancel();
            }
        })
        .unwrap();
        assert!(report.cancelled);
        assert!(report.rows_inserted < 500);
        assert!(report.failure.is_none());
    }

    #[test]
    fn connect_failure_is_reported_with_zero_totals() {
        let connect = || -> Result<MemorySink, StoreError> {
            Err(StoreError::Transport {
                url: "http://localhost:8123/".into(),
                message: "connection refused".into(),
            })
        };
        let report = load_all(batches(3, 5), connect, &options(1), |_, _| {}).unwrap();
        assert_eq!(report.rows_inserted, 0);
        assert!(matches!(
            report.failure,
            Some(LoadFailure::Store(StoreError::Transport { .. }))
        ));
    }

    #[test]
    fn producer_error_surfaces_after_the_barrier() {
        let rows = Arc::new(AtomicU64::new(0));
        let attempts = Arc::new(AtomicU64::new(0));
        let connect = || {
            Ok(MemorySink {
                rows: Arc::clone(&rows),
                attempts: Arc::clone(&attempts),
                fail_on_attempt: None,
            })
        };
        let stream = batches(2, 10)
            .chain(std::iter::once(Err(anyhow::anyhow!("disk read failed"))));
        let report = load_all(stream, connect, &options(1), |_, _| {}).unwrap();
        assert!(matches!(report.failure, Some(LoadFailure::Produce(_))));
        assert!(report.rows_inserted <= 20);
    }

    #[test]
    fn empty_input_is_a_successful_noop() {
        let report = load_all(
            std::iter::empty(),
            || {
                Ok(MemorySink {
                    rows: Arc::new(AtomicU64::new(0)),
                    attempts: Arc::new(AtomicU64::new(0)),
                    fail_on_attempt: None,
                })
            },
            &options(2),
            |_, _| {},
        )
        .unwrap();
        assert_eq!(report.rows_inserted, 0);
        assert_eq!(report.batches_inserted, 0);
        assert!(report.failure.is_none());
    }
}
