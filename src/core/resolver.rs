//! Dependency resolution
//!
//! [`Order`] is a pull-based topological scheduler over a [`PackageSet`].
//! Packages whose dependencies have all completed are *ready*; the rest are
//! *pending* with a counter of unmet dependencies. Callers fetch ready
//! packages, build them, and report completion, which unblocks consumers.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;

use crate::core::catalog::{PackageId, PackageSet};
use crate::error::{IncubatorError, ResolveError};

/// Topological scheduler over a loaded package set
#[derive(Debug)]
pub struct Order<'p> {
    set: &'p PackageSet,
    ready: VecDeque<PackageId>,
    /// Unmet dependency count of every blocked package
    pending: HashMap<PackageId, usize>,
    in_flight: HashSet<PackageId>,
    completed: HashSet<PackageId>,
}

impl<'p> Order<'p> {
    /// Partition the set into ready and pending packages
    ///
    /// The initial ready queue is ordered by name, then newest version.
    pub fn new(set: &'p PackageSet) -> Self {
        let mut ready = VecDeque::new();
        let mut pending = HashMap::new();

        for id in set.sorted_ids() {
            match set.dependencies(id).len() {
                0 => ready.push_back(id),
                unmet => {
                    pending.insert(id, unmet);
                }
            }
        }

        Self {
            set,
            ready,
            pending,
            in_flight: HashSet::new(),
            completed: HashSet::new(),
        }
    }

    pub fn set(&self) -> &'p PackageSet {
        self.set
    }

    /// Take up to `count` ready packages
    ///
    /// Fetched packages are in flight until passed to [`Order::complete`].
    pub fn fetch(&mut self, count: usize) -> Vec<PackageId> {
        let count = count.min(self.ready.len());
        let fetched: Vec<PackageId> = self.ready.drain(..count).collect();
        self.in_flight.extend(fetched.iter().copied());
        fetched
    }

    /// Take every ready package
    pub fn fetch_all(&mut self) -> Vec<PackageId> {
        self.fetch(self.ready.len())
    }

    /// Mark packages as built and unblock their consumers
    ///
    /// The whole batch is checked first: completing a package twice, or a
    /// package whose dependencies have not completed, is rejected without
    /// touching any counter.
    pub fn complete(&mut self, ids: &[PackageId]) -> Result<(), ResolveError> {
        let mut batch = HashSet::new();
        for &id in ids {
            let package = || self.set.get(id).full_name();
            if self.completed.contains(&id) || !batch.insert(id) {
                return Err(ResolveError::AlreadyCompleted { package: package() });
            }
            if self.pending.contains_key(&id) {
                return Err(ResolveError::NotReady { package: package() });
            }
        }

        let set = self.set;
        for &id in ids {
            self.in_flight.remove(&id);
            self.ready.retain(|&ready| ready != id);
            self.completed.insert(id);

            for &consumer in set.consumers(id) {
                let Some(unmet) = self.pending.get_mut(&consumer) else {
                    continue;
                };
                *unmet = unmet.saturating_sub(1);
                if *unmet == 0 {
                    self.pending.remove(&consumer);
                    tracing::debug!("{} is ready", set.get(consumer));
                    self.ready.push_back(consumer);
                }
            }
        }

        Ok(())
    }

    /// True once every package has been fetched and nothing is pending
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.pending.is_empty()
    }

    pub fn ready(&self) -> usize {
        self.ready.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_completed(&self, id: PackageId) -> bool {
        self.completed.contains(&id)
    }

    /// Fail when no package can ever become ready again
    ///
    /// With nothing ready and nothing in flight, any pending package is
    /// blocked on a dependency cycle.
    pub fn ensure_progress(&self) -> Result<(), ResolveError> {
        if self.ready.is_empty() && self.in_flight.is_empty() && !self.pending.is_empty() {
            return Err(ResolveError::CircularDependency {
                cycle: self.find_cycle(),
            });
        }
        Ok(())
    }

    /// Walk pending dependencies until a package repeats
    fn find_cycle(&self) -> Vec<String> {
        let Some(&start) = self.pending.keys().min() else {
            return Vec::new();
        };

        let mut path: Vec<PackageId> = vec![start];
        let mut seen: HashMap<PackageId, usize> = HashMap::from([(start, 0)]);
        let mut current = start;

        while let Some(&next) = self
            .set
            .dependencies(current)
            .iter()
            .find(|dep| self.pending.contains_key(dep))
        {
            if let Some(&position) = seen.get(&next) {
                let mut cycle: Vec<String> = path[position..]
                    .iter()
                    .map(|&id| self.set.get(id).full_name())
                    .collect();
                cycle.push(self.set.get(next).full_name());
                return cycle;
            }
            seen.insert(next, path.len());
            path.push(next);
            current = next;
        }

        path.iter().map(|&id| self.set.get(id).full_name()).collect()
    }

    /// Run `iterator` over every package in dependency order
    ///
    /// At most `concurrency` iterations run at once (0 is unbounded). A
    /// failed package is never completed, so its consumers never run; after
    /// the first failure no new packages are fetched and running iterations
    /// finish. All failures are returned together.
    pub async fn each<F, Fut>(
        &mut self,
        concurrency: usize,
        mut iterator: F,
    ) -> Result<(), IncubatorError>
    where
        F: FnMut(PackageId) -> Fut,
        Fut: Future<Output = Result<(), IncubatorError>>,
    {
        let mut running = FuturesUnordered::new();
        let mut errors = Vec::new();

        loop {
            if errors.is_empty() {
                let room = if concurrency == 0 {
                    usize::MAX
                } else {
                    concurrency.saturating_sub(running.len())
                };
                for id in self.fetch(room) {
                    let iteration = iterator(id);
                    running.push(async move { (id, iteration.await) });
                }
            }

            let Some((id, result)) = running.next().await else {
                break;
            };
            match result {
                Ok(()) => self.complete(&[id])?,
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            self.ensure_progress()?;
        }
        IncubatorError::aggregate(errors)
    }
}
