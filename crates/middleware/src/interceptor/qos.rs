use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::{Interceptor, Invocation};
use crate::envelope::{CallEnvelope, ResultEnvelope};
use crate::error::Result;

/// Number of latency samples kept by a [`QosObserver`].
pub const LATENCY_WINDOW: usize = 20;

/// Point-in-time view of a [`QosObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosSnapshot {
    /// Calls admitted since creation.
    pub invocations: u64,
    /// Calls currently executing.
    pub in_flight: usize,
    /// Mean latency of the most recent completed calls, if any completed.
    pub average_latency: Option<Duration>,
}

#[derive(Debug)]
struct LatencyWindow {
    samples: [Duration; LATENCY_WINDOW],
    next: usize,
    filled: usize,
}

impl LatencyWindow {
    const fn new() -> Self {
        Self {
            samples: [Duration::ZERO; LATENCY_WINDOW],
            next: 0,
            filled: 0,
        }
    }

    fn record(&mut self, latency: Duration) {
        self.samples[self.next] = latency;
        self.next = (self.next + 1) % LATENCY_WINDOW;
        self.filled = (self.filled + 1).min(LATENCY_WINDOW);
    }

    fn average(&self) -> Option<Duration> {
        if self.filled == 0 {
            return None;
        }
        let total: Duration = self.samples[..self.filled].iter().sum();
        #[allow(clippy::cast_possible_truncation)]
        Some(total / self.filled as u32)
    }
}

/// Counts calls and tracks their latency over a rolling window.
#[derive(Debug)]
pub struct QosObserver {
    invocations: AtomicU64,
    in_flight: AtomicUsize,
    window: Mutex<LatencyWindow>,
}

impl Default for QosObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl QosObserver {
    /// Create an observer with empty counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            invocations: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            window: Mutex::new(LatencyWindow::new()),
        }
    }

    /// Start observing a call unconditionally.
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.admitted()
    }

    /// Start observing a call if fewer than `max` are in flight.
    pub fn try_enter(&self, max: usize) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()
            .map(|_| self.admitted())
    }

    fn admitted(&self) -> InFlightGuard<'_> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            observer: self,
            started: Instant::now(),
        }
    }

    /// Calls currently executing.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> QosSnapshot {
        QosSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            average_latency: self.window.lock().average(),
        }
    }
}

/// Marks one observed call; records its latency when dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    observer: &'a QosObserver,
    started: Instant,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.observer.window.lock().record(self.started.elapsed());
        self.observer.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Interceptor for QosObserver {
    async fn intercept(
        &self,
        next: &dyn Invocation,
        call: &mut CallEnvelope,
    ) -> Result<Option<ResultEnvelope>> {
        let _guard = self.enter();
        next.invoke(call).await
    }
}
