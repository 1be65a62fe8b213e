//! Concurrent fan-out/fan-in query execution.
//!
//! A batch is an ordered list of independent query tasks. [`run_batch`]
//! executes every task on a rayon pool sized to the batch, built for this
//! call and torn down when it returns. Completions arrive over a channel in
//! whatever order they finish; each one is written back to its submission
//! index, so `slots[i]` always belongs to `tasks[i]`.
//!
//! A task that errors or panics becomes a [`SlotResult::Failed`] at its own
//! index. Siblings are never cancelled and nothing is retried.
//!
//! ```rust,ignore
//! let batch = run_batch(vec![
//!     Box::new(|| fetcher.total_events_by_name()),
//!     Box::new(|| fetcher.session_durations()),
//! ]);
//! let [totals, sessions] = batch.into_results()?.try_into().unwrap();
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::types::{AnalyticsError, AnalyticsResult};

/// A zero-argument query task.
pub type QueryTask<'a, T> = Box<dyn FnOnce() -> AnalyticsResult<T> + Send + 'a>;

/// A one-argument query task; the argument is shared by the whole batch.
pub type BoundQueryTask<'a, A, T> = Box<dyn FnOnce(&A) -> AnalyticsResult<T> + Send + 'a>;

/// Why a slot failed.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error(transparent)]
    Failed(AnalyticsError),
    #[error("query task panicked: {0}")]
    Panicked(String),
}

/// Failure value stored in a slot.
#[derive(Debug)]
pub struct SlotFailure {
    pub index: usize,
    pub error: SlotError,
    pub elapsed: Duration,
}

/// Outcome of one batch slot.
#[derive(Debug)]
pub enum SlotResult<T> {
    Ready(T),
    Failed(SlotFailure),
}

impl<T> SlotResult<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&SlotFailure> {
        match self {
            Self::Ready(_) => None,
            Self::Failed(f) => Some(f),
        }
    }
}

/// Index-aligned results of one batch.
#[derive(Debug)]
pub struct Batch<T> {
    slots: Vec<SlotResult<T>>,
    elapsed: Duration,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SlotResult<T>> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[SlotResult<T>] {
        &self.slots
    }

    /// Wall time of the whole batch.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// True when no slot failed.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(SlotResult::is_ready)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SlotFailure> {
        self.slots.iter().filter_map(SlotResult::failure)
    }

    pub fn into_slots(self) -> Vec<SlotResult<T>> {
        self.slots
    }

    /// Apply the all-or-nothing policy: every value in order, or a
    /// [`AnalyticsError::BatchFailure`] if any slot failed.
    pub fn into_results(self) -> AnalyticsResult<Vec<T>> {
        let total = self.slots.len();
        let failed = self.failures().count();
        if failed > 0 {
            let first = self
                .failures()
                .next()
                .map(|f| format!("slot {}: {}", f.index, f.error))
                .unwrap_or_default();
            return Err(AnalyticsError::BatchFailure {
                failed,
                total,
                first,
            });
        }
        Ok(self
            .slots
            .into_iter()
            .filter_map(|s| match s {
                SlotResult::Ready(v) => Some(v),
                SlotResult::Failed(_) => None,
            })
            .collect())
    }
}

/// Run every task concurrently and return index-aligned results.
pub fn run_batch<'a, T: Send + 'a>(tasks: Vec<QueryTask<'a, T>>) -> Batch<T> {
    let started = Instant::now();
    let total = tasks.len();
    if total == 0 {
        return Batch {
            slots: Vec::new(),
            elapsed: started.elapsed(),
        };
    }

    let mut slots: Vec<Option<SlotResult<T>>> = (0..total).map(|_| None).collect();

    match rayon::ThreadPoolBuilder::new()
        .num_threads(total)
        .thread_name(|i| format!("evdash-fetch-{i}"))
        .build()
    {
        Ok(pool) => {
            let (tx, rx) = crossbeam_channel::bounded::<(usize, SlotResult<T>)>(total);
            pool.in_place_scope(|scope| {
                for (index, task) in tasks.into_iter().enumerate() {
                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        // The receiver outlives every sender inside this scope.
                        let _ = tx.send((index, execute(index, task)));
                    });
                }
                drop(tx);

                for (arrival, (index, slot)) in rx.iter().enumerate() {
                    debug!(
                        target: "evdash::fetch",
                        index,
                        arrival,
                        ok = slot.is_ready(),
                        "slot completed"
                    );
                    slots[index] = Some(slot);
                }
            });
        }
        Err(err) => {
            warn!(
                target: "evdash::fetch",
                error = %err,
                "could not build fetch pool, running batch inline"
            );
            for (index, task) in tasks.into_iter().enumerate() {
                slots[index] = Some(execute(index, task));
            }
        }
    }

    let slots: Vec<SlotResult<T>> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                SlotResult::Failed(SlotFailure {
                    index,
                    error: SlotError::Panicked("worker exited without reporting".into()),
                    elapsed: Duration::ZERO,
                })
            })
        })
        .collect();

    let batch = Batch {
        slots,
        elapsed: started.elapsed(),
    };
    let failed = batch.failures().count();
    if failed == 0 {
        info!(
            target: "evdash::fetch",
            total,
            elapsed_ms = batch.elapsed.as_millis() as u64,
            "batch finished"
        );
    } else {
        for f in batch.failures() {
            warn!(
                target: "evdash::fetch",
                index = f.index,
                elapsed_ms = f.elapsed.as_millis() as u64,
                error = %f.error,
                "slot failed"
            );
        }
        warn!(
            target: "evdash::fetch",
            total,
            failed,
            elapsed_ms = batch.elapsed.as_millis() as u64,
            "batch finished with failures"
        );
    }
    batch
}

/// Run one-argument tasks with `arg` bound identically for every slot.
pub fn run_batch_with<'a, A, T>(tasks: Vec<BoundQueryTask<'a, A, T>>, arg: &'a A) -> Batch<T>
where
    A: Sync + ?Sized,
    T: Send + 'a,
{
    let bound: Vec<QueryTask<'a, T>> = tasks
        .into_iter()
        .map(|task| Box::new(move || task(arg)) as QueryTask<'a, T>)
        .collect();
    run_batch(bound)
}

fn execute<T>(index: usize, task: QueryTask<'_, T>) -> SlotResult<T> {
    let started = Instant::now();
    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(value)) => SlotResult::Ready(value),
        Ok(Err(err)) => SlotResult::Failed(SlotFailure {
            index,
            error: SlotError::Failed(err),
            elapsed: started.elapsed(),
        }),
        Err(payload) => SlotResult::Failed(SlotFailure {
            index,
            error: SlotError::Panicked(panic_message(payload.as_ref())),
            elapsed: started.elapsed(),
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
