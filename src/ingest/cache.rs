// src/ingest/cache.rs
//! Single-slot TTL cache with single-flight recompute.
//!
//! Absolute TTL (no sliding refresh). While a recompute is in flight, every
//! caller that arrives joins it instead of starting its own upstream fan-out,
//! and all of them receive the same outcome. Only successful outcomes are
//! stored; a stored entry is always replaced wholesale.
//!
//! The recompute runs on its own task. Callers only wait on it, so a caller
//! that goes away (client disconnect, request timeout) does not cancel the
//! cycle; its outcome is picked up by whoever asks next.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::ingest::pipeline::PipelineError;
use crate::ingest::types::AggregateResult;

type Outcome<T> = Result<AggregateResult<T>, PipelineError>;

#[derive(Clone)]
struct Finished<T> {
    outcome: Outcome<T>,
    at: Instant,
}

type Flight<T> = watch::Receiver<Option<Finished<T>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a stored, unexpired entry.
    Hit,
    /// This caller started the recompute.
    Miss,
    /// This caller picked up a recompute started by someone else.
    Joined,
}

#[derive(Debug, Clone)]
pub struct CacheLookup<T> {
    pub result: AggregateResult<T>,
    pub status: CacheStatus,
}

struct CacheEntry<T> {
    value: AggregateResult<T>,
    expires_at: Instant,
}

struct Slot<T> {
    entry: Option<CacheEntry<T>>,
    inflight: Option<Flight<T>>,
}

pub struct ResultCache<T> {
    slot: Mutex<Slot<T>>,
}

impl<T: Clone + Send + Sync + 'static> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> ResultCache<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                entry: None,
                inflight: None,
            }),
        }
    }

    /// Return the cached result if it is younger than its TTL, otherwise start
    /// (or join) exactly one `compute` and share its outcome.
    pub async fn get_or_compute<F, Fut>(
        &self,
        ttl: Duration,
        compute: F,
    ) -> Result<CacheLookup<T>, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let (mut flight, led) = {
            let mut slot = self.lock();
            let now = Instant::now();
            if let Some(entry) = slot.entry.as_ref().filter(|e| e.expires_at > now) {
                return Ok(CacheLookup {
                    result: entry.value.clone(),
                    status: CacheStatus::Hit,
                });
            }
            let pending = slot
                .inflight
                .as_ref()
                .filter(|f| reusable(f, ttl, now))
                .cloned();
            match pending {
                Some(f) => (f, false),
                None => {
                    let (tx, rx) = watch::channel(None);
                    let work = compute();
                    tokio::spawn(async move {
                        let outcome = work.await;
                        let _ = tx.send(Some(Finished {
                            outcome,
                            at: Instant::now(),
                        }));
                    });
                    slot.inflight = Some(rx.clone());
                    (rx, true)
                }
            }
        };

        let finished = flight
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|done| (*done).clone());

        {
            let mut slot = self.lock();
            let current = slot
                .inflight
                .as_ref()
                .is_some_and(|f| f.same_channel(&flight));
            if current {
                slot.inflight = None;
                if let Some(Finished { outcome: Ok(value), at }) = &finished {
                    slot.entry = Some(CacheEntry {
                        value: value.clone(),
                        expires_at: *at + ttl,
                    });
                }
            }
        }

        let Some(finished) = finished else {
            return Err(PipelineError::CycleAborted);
        };
        let status = if led {
            CacheStatus::Miss
        } else {
            CacheStatus::Joined
        };
        finished
            .outcome
            .map(|result| CacheLookup { result, status })
    }

    /// Copy of the stored entry regardless of expiry.
    pub fn peek(&self) -> Option<AggregateResult<T>> {
        self.lock().entry.as_ref().map(|e| e.value.clone())
    }

    pub fn invalidate(&self) {
        self.lock().entry = None;
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        match self.slot.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

/// A flight can be joined while it runs, or after it finished successfully
/// within the TTL but nobody was left to collect it. Uncollected failures
/// are retried.
fn reusable<T>(flight: &Flight<T>, ttl: Duration, now: Instant) -> bool {
    let open = flight.has_changed().is_ok();
    match &*flight.borrow() {
        None => open,
        Some(done) => done.outcome.is_ok() && done.at + ttl > now,
    }
}
