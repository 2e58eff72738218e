//! Periodic PLC jobs.

use crate::cycle::CycleInfo;
use crate::error::PayloadError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Work executed by a PLC every `period`.
pub trait Job: Send + 'static {
    /// Run once. Errors are published on the PLC's `on_error` channel.
    fn execute(&mut self, cycle: &CycleInfo) -> Result<(), PayloadError>;
}

impl<F> Job for F
where
    F: FnMut(&CycleInfo) -> Result<(), PayloadError> + Send + 'static,
{
    fn execute(&mut self, cycle: &CycleInfo) -> Result<(), PayloadError> {
        self(cycle)
    }
}

/// A job whose runtime exceeded its own period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOverrun {
    /// Job id.
    pub job: String,
    /// Measured runtime.
    pub runtime: Duration,
    /// Job period.
    pub period: Duration,
}

/// Scheduling slot of one registered job.
pub(crate) struct JobSlot {
    pub(crate) id: String,
    pub(crate) period: Duration,
    remaining: Duration,
    runs: Arc<AtomicU64>,
    job: Box<dyn Job>,
}

/// Outcome of ticking a slot.
pub(crate) enum Tick {
    Idle,
    Ran {
        runtime: Duration,
        result: Result<(), PayloadError>,
    },
}

impl JobSlot {
    pub(crate) fn new(id: String, period: Duration, job: Box<dyn Job>) -> Self {
        Self {
            id,
            period,
            remaining: Duration::ZERO,
            runs: Arc::new(AtomicU64::new(0)),
            job,
        }
    }

    /// Shared execution counter.
    pub(crate) fn runs(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.runs)
    }

    /// Advance by one PLC cycle; run the job when due.
    ///
    /// A fresh slot is due on its first tick.
    pub(crate) fn tick(&mut self, cycle: &CycleInfo) -> Tick {
        self.remaining = self.remaining.saturating_sub(cycle.cycle_time);
        if !self.remaining.is_zero() {
            return Tick::Idle;
        }
        self.remaining = self.period;
        let started = Instant::now();
        let result = self.job.execute(cycle);
        self.runs.fetch_add(1, Ordering::Relaxed);
        Tick::Ran {
            runtime: started.elapsed(),
            result,
        }
    }
}

impl std::fmt::Debug for JobSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSlot")
            .field("id", &self.id)
            .field("period", &self.period)
            .field("remaining", &self.remaining)
            .field("runs", &self.runs.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &CycleInfo) -> Result<(), PayloadError> {
        Ok(())
    }

    #[test]
    fn runs_every_kth_cycle() {
        let cycle = Duration::from_millis(10);
        let mut slot = JobSlot::new("j".into(), 3 * cycle, Box::new(noop));
        let ran: Vec<bool> = (0..9)
            .map(|i| matches!(slot.tick(&CycleInfo::new(i, cycle)), Tick::Ran { .. }))
            .collect();
        assert_eq!(
            ran,
            vec![true, false, false, true, false, false, true, false, false]
        );
        assert_eq!(slot.runs().load(Ordering::Relaxed), 3);
    }

    #[test]
    fn every_cycle_when_period_equals_cycle() {
        let cycle = Duration::from_millis(10);
        let mut slot = JobSlot::new("j".into(), cycle, Box::new(noop));
        for i in 0..5 {
            assert!(matches!(slot.tick(&CycleInfo::new(i, cycle)), Tick::Ran { .. }));
        }
    }
}
