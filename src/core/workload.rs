//! Bounded worker pool
//!
//! [`Workload`] runs jobs with at most `width` in flight at once. Each
//! running job is bound to a numbered slot so callers can show per-worker
//! activity. Jobs are futures polled by whoever drives [`Workload::next`];
//! nothing runs on the caller's stack when a job is pushed.

use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::future::Future;

/// Index of a worker slot, `0..width`
pub type SlotId = usize;

/// Pool lifecycle notifications
#[derive(Debug, PartialEq, Eq)]
pub enum PoolEvent<'e, D, E> {
    /// A job was bound to a slot
    Start { slot: SlotId, data: &'e D },
    /// A job finished and its slot is free again
    Done {
        slot: SlotId,
        data: &'e D,
        error: Option<&'e E>,
    },
    /// The waiting queue became empty (slots may still be busy)
    Drain,
}

/// Result of a finished job
#[derive(Debug)]
pub struct Finished<D, T, E> {
    pub slot: SlotId,
    pub data: D,
    pub result: Result<T, E>,
}

type Job<'a, T, E> = Box<dyn FnOnce(SlotId) -> LocalBoxFuture<'a, Result<T, E>> + 'a>;
type Observer<'a, D, E> = Box<dyn FnMut(PoolEvent<'_, D, E>) + 'a>;

/// Generic bounded-concurrency job runner
pub struct Workload<'a, D, T, E> {
    width: usize,
    /// Occupancy of each slot
    slots: Vec<bool>,
    busy: usize,
    waiting: VecDeque<(D, Job<'a, T, E>)>,
    running: FuturesUnordered<LocalBoxFuture<'a, Finished<D, T, E>>>,
    /// Drop the queue when a job fails, before any slot is refilled
    halt_on_error: bool,
    observer: Option<Observer<'a, D, E>>,
}

impl<'a, D: 'a, T: 'a, E: 'a> Workload<'a, D, T, E> {
    /// Create a pool with `width` slots (at least one)
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            width,
            slots: vec![false; width],
            busy: 0,
            waiting: VecDeque::new(),
            running: FuturesUnordered::new(),
            halt_on_error: false,
            observer: None,
        }
    }

    /// Receive lifecycle events
    #[must_use]
    pub fn with_observer(mut self, observer: impl FnMut(PoolEvent<'_, D, E>) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Halt as soon as a job fails
    ///
    /// The queue is dropped before the failed job's slot is refilled, so no
    /// waiting job starts after the first failure.
    #[must_use]
    pub fn with_halt_on_error(mut self) -> Self {
        self.halt_on_error = true;
        self
    }

    /// Queue a job and bind it to a free slot if one exists
    ///
    /// `job` is called with its slot id when dispatched; the future it
    /// returns resolving is the job's one and only completion.
    pub fn push<F, Fut>(&mut self, data: D, job: F)
    where
        F: FnOnce(SlotId) -> Fut + 'a,
        Fut: Future<Output = Result<T, E>> + 'a,
    {
        let job: Job<'a, T, E> = Box::new(move |slot| job(slot).boxed_local());
        self.waiting.push_back((data, job));
        self.dispatch();
    }

    /// Wait for the next job to finish
    ///
    /// Frees the slot, refills idle slots from the queue and returns the
    /// job's outcome. Returns `None` once nothing is running.
    pub async fn next(&mut self) -> Option<Finished<D, T, E>> {
        let finished = self.running.next().await?;

        self.slots[finished.slot] = false;
        self.busy -= 1;
        self.emit(PoolEvent::Done {
            slot: finished.slot,
            data: &finished.data,
            error: finished.result.as_ref().err(),
        });

        if self.halt_on_error && finished.result.is_err() {
            let dropped = self.halt();
            tracing::debug!("Slot {} failed, dropped {dropped} queued job(s)", finished.slot);
        }

        self.dispatch();
        Some(finished)
    }

    /// Drop every job that has not been dispatched yet
    ///
    /// Running jobs are unaffected. Returns the number of dropped jobs.
    pub fn halt(&mut self) -> usize {
        let dropped = self.waiting.len();
        self.waiting.clear();
        dropped
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of busy slots
    pub fn running(&self) -> usize {
        self.busy
    }

    /// Number of queued jobs
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Number of idle slots
    pub fn free(&self) -> usize {
        self.width - self.busy
    }

    /// Running plus queued jobs
    pub fn load(&self) -> usize {
        self.busy + self.waiting.len()
    }

    pub fn is_idle(&self) -> bool {
        self.busy == 0 && self.waiting.is_empty()
    }

    fn dispatch(&mut self) {
        let had_waiting = !self.waiting.is_empty();

        while self.busy < self.width {
            let Some((data, job)) = self.waiting.pop_front() else {
                break;
            };
            let Some(slot) = self.slots.iter().position(|busy| !busy) else {
                self.waiting.push_front((data, job));
                break;
            };

            self.slots[slot] = true;
            self.busy += 1;
            self.emit(PoolEvent::Start { slot, data: &data });
            tracing::debug!("Dispatched job to slot {slot}");

            let future = job(slot);
            self.running.push(
                async move {
                    let result = future.await;
                    Finished { slot, data, result }
                }
                .boxed_local(),
            );
        }

        if had_waiting && self.waiting.is_empty() {
            self.emit(PoolEvent::Drain);
        }
    }

    fn emit(&mut self, event: PoolEvent<'_, D, E>) {
        if let Some(observer) = self.observer.as_mut() {
            observer(event);
        }
    }
}
