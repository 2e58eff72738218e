//! Cyclic worker: begin → wait for requests → payload → end.
//!
//! A [`Cycler`] owns one OS thread that runs a user payload at a fixed
//! cadence. It starts paused; `start`, `stop` and `shutdown` requests travel
//! through a one-slot channel and are observed within one cycle time.
//!
//! ## Cycle Loop
//! 1. Publish `on_cycle_begin`.
//! 2. Slack = cycle time − work of the previous cycle. Negative slack
//!    publishes `on_underflow` and waits zero.
//! 3. Timed receive on the request channel until the slack deadline,
//!    handling every request that arrives meanwhile.
//! 4. Run the payload if running.
//! 5. Publish `on_cycle_end`, update the cycle monitor.
//!
//! ## State Machine
//! ```text
//!             START                 STOP
//!   paused ─────────────► running ─────────► paused
//!   any    ── SHUTDOWN ─► terminated
//! ```
//! Duplicate START/STOP publishes `on_mismatch` and is otherwise ignored.

use crate::error::{CyclerError, PayloadError};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tandem_common::consts::{CYCLE_TOLERANCE, MONITOR_WINDOW};
use tandem_common::fault::{Fault, FaultKind};
use tandem_common::pubsub::Publisher;
use tracing::{debug, info, trace, warn};

// ─── Payload ────────────────────────────────────────────────────────

/// Per-cycle information handed to payloads and cycle subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleInfo {
    /// Cycle counter since the worker started (paused cycles included).
    pub index: u64,
    /// Nominal cycle time.
    pub cycle_time: Duration,
    /// Time the cycle began.
    pub began: Instant,
}

impl CycleInfo {
    /// Info for a cycle beginning now (used when stepping payloads manually).
    pub fn new(index: u64, cycle_time: Duration) -> Self {
        Self {
            index,
            cycle_time,
            began: Instant::now(),
        }
    }
}

/// Work executed once per running cycle on the cycler's thread.
pub trait CyclePayload: Send + 'static {
    /// Run one cycle. Errors are published on `on_error`; the worker keeps cycling.
    fn run_cycle(&mut self, cycle: &CycleInfo) -> Result<(), PayloadError>;
}

impl<F> CyclePayload for F
where
    F: FnMut(&CycleInfo) -> Result<(), PayloadError> + Send + 'static,
{
    fn run_cycle(&mut self, cycle: &CycleInfo) -> Result<(), PayloadError> {
        self(cycle)
    }
}

// ─── Events ─────────────────────────────────────────────────────────

/// Request that contradicts the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// START while running.
    AlreadyRunning,
    /// STOP while paused.
    AlreadyPaused,
}

/// Timing statistics of one reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReport {
    /// Cycles in the window.
    pub count: u64,
    /// Shortest period.
    pub min: Duration,
    /// Longest period.
    pub max: Duration,
    /// Mean period (the effective cycle time).
    pub mean: Duration,
    /// Nominal cycle time.
    pub nominal: Duration,
}

/// Cycle timing violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Underflow {
    /// Previous cycle's work exceeded the cycle time; this cycle waits zero.
    NegativeSlack {
        /// Work time of the previous cycle.
        work: Duration,
        /// Nominal cycle time.
        cycle_time: Duration,
    },
    /// Effective cycle time of a window exceeded nominal beyond tolerance.
    WindowExceeded(WindowReport),
}

/// Publisher channels of a cycler. All run on the cycler's thread.
#[derive(Debug)]
pub struct CycleTopics {
    /// Entered running state.
    pub on_start: Publisher<()>,
    /// Entered paused state.
    pub on_stop: Publisher<()>,
    /// Worker is exiting.
    pub on_shutdown: Publisher<()>,
    /// Duplicate START/STOP.
    pub on_mismatch: Publisher<Mismatch>,
    /// Cycle begins.
    pub on_cycle_begin: Publisher<CycleInfo>,
    /// Cycle ended.
    pub on_cycle_end: Publisher<CycleInfo>,
    /// Timing violation.
    pub on_underflow: Publisher<Underflow>,
    /// Payload, adapter and job faults.
    pub on_error: Publisher<Fault>,
}

impl CycleTopics {
    /// Fresh channels named after the owning worker.
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            on_start: Publisher::new(format!("{name}.on_start")),
            on_stop: Publisher::new(format!("{name}.on_stop")),
            on_shutdown: Publisher::new(format!("{name}.on_shutdown")),
            on_mismatch: Publisher::new(format!("{name}.on_mismatch")),
            on_cycle_begin: Publisher::new(format!("{name}.on_cycle_begin")),
            on_cycle_end: Publisher::new(format!("{name}.on_cycle_end")),
            on_underflow: Publisher::new(format!("{name}.on_underflow")),
            on_error: Publisher::new(format!("{name}.on_error")),
        })
    }
}

// ─── Cycle Monitor ──────────────────────────────────────────────────

/// Cycle monitor settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    /// Reporting window.
    pub window: Duration,
    /// Allowed relative excess of the mean period over nominal.
    pub tolerance: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            window: MONITOR_WINDOW,
            tolerance: CYCLE_TOLERANCE,
        }
    }
}

/// Windowed min/max/mean statistics of cycle periods.
///
/// O(1) per record, no allocation.
#[derive(Debug, Clone)]
pub struct CycleMonitor {
    nominal: Duration,
    settings: MonitorSettings,
    window_start: Option<Instant>,
    count: u64,
    min: Duration,
    max: Duration,
    sum: Duration,
    effective: Option<Duration>,
}

impl CycleMonitor {
    /// Monitor for a worker with the given nominal cycle time.
    pub fn new(nominal: Duration, settings: MonitorSettings) -> Self {
        Self {
            nominal,
            settings,
            window_start: None,
            count: 0,
            min: Duration::MAX,
            max: Duration::ZERO,
            sum: Duration::ZERO,
            effective: None,
        }
    }

    /// Record one period measured at `now`.
    ///
    /// Returns the window report when a window closes.
    pub fn record(&mut self, period: Duration, now: Instant) -> Option<WindowReport> {
        let start = *self.window_start.get_or_insert(now);
        self.count += 1;
        self.min = self.min.min(period);
        self.max = self.max.max(period);
        self.sum += period;

        if now.duration_since(start) < self.settings.window {
            return None;
        }
        let report = self.report()?;
        self.effective = Some(report.mean);
        self.window_start = Some(now);
        self.count = 0;
        self.min = Duration::MAX;
        self.max = Duration::ZERO;
        self.sum = Duration::ZERO;
        Some(report)
    }

    /// Statistics of the current (open) window.
    pub fn report(&self) -> Option<WindowReport> {
        let count = u32::try_from(self.count).ok().filter(|c| *c > 0)?;
        Some(WindowReport {
            count: self.count,
            min: self.min,
            max: self.max,
            mean: self.sum / count,
            nominal: self.nominal,
        })
    }

    /// True if `report` exceeds nominal beyond tolerance.
    pub fn exceeds(&self, report: &WindowReport) -> bool {
        report.mean > self.nominal.mul_f64(1.0 + self.settings.tolerance)
    }

    /// Mean period of the last closed window, else of the open window.
    pub fn effective_cycle_time(&self) -> Option<Duration> {
        self.effective.or_else(|| self.report().map(|r| r.mean))
    }
}

// ─── Cycler ─────────────────────────────────────────────────────────

/// Cycler construction options.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CyclerOptions {
    /// Extra delay before the first cycle ends its wait.
    pub start_delay: Duration,
    /// Dropping a daemon cycler does not wait for its thread.
    pub daemon: bool,
    /// Cycle monitor settings.
    pub monitor: MonitorSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Shutdown,
}

struct Request {
    command: Command,
    ack: Option<Sender<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Continue,
    Exit,
}

/// Handle to a cyclic worker thread.
pub struct Cycler {
    name: String,
    cycle_time: Duration,
    daemon: bool,
    requests: Sender<Request>,
    topics: Arc<CycleTopics>,
    effective_ns: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Cycler {
    /// Spawn a paused worker running `payload` every `cycle_time`.
    pub fn spawn<P: CyclePayload>(
        name: impl Into<String>,
        cycle_time: Duration,
        options: CyclerOptions,
        payload: P,
    ) -> Result<Self, CyclerError> {
        let name = name.into();
        let topics = CycleTopics::new(&name);
        Self::spawn_with_topics(name, cycle_time, options, topics, payload)
    }

    /// Like [`spawn`](Self::spawn), publishing on pre-built channels.
    pub fn spawn_with_topics<P: CyclePayload>(
        name: impl Into<String>,
        cycle_time: Duration,
        options: CyclerOptions,
        topics: Arc<CycleTopics>,
        payload: P,
    ) -> Result<Self, CyclerError> {
        let name = name.into();
        if cycle_time.is_zero() {
            return Err(CyclerError::InvalidCycleTime { name });
        }
        let (requests, inbox) = channel::bounded(1);
        let effective_ns = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            name: name.clone(),
            cycle_time,
            start_delay: options.start_delay,
            requests: inbox,
            topics: Arc::clone(&topics),
            monitor: CycleMonitor::new(cycle_time, options.monitor),
            effective_ns: Arc::clone(&effective_ns),
            payload,
        };
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|source| CyclerError::Spawn {
                name: name.clone(),
                source,
            })?;
        info!(cycler = %name, cycle_time_ms = cycle_time.as_secs_f64() * 1e3, "cycler spawned (paused)");

        Ok(Self {
            name,
            cycle_time,
            daemon: options.daemon,
            requests,
            topics,
            effective_ns,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nominal cycle time.
    pub fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    /// Publisher channels.
    pub fn topics(&self) -> &Arc<CycleTopics> {
        &self.topics
    }

    /// Measured cycle time, once at least one period was recorded.
    pub fn effective_cycle_time(&self) -> Option<Duration> {
        match self.effective_ns.load(Ordering::Acquire) {
            0 => None,
            ns => Some(Duration::from_nanos(ns)),
        }
    }

    /// True while the worker thread runs.
    pub fn is_alive(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Enter running state; with `sync`, wait until the worker has.
    pub fn start(&self, sync: bool) -> Result<(), CyclerError> {
        self.request(Command::Start, sync)
    }

    /// Enter paused state; with `sync`, wait until the worker has.
    pub fn stop(&self, sync: bool) -> Result<(), CyclerError> {
        self.request(Command::Stop, sync)
    }

    /// Terminate the worker after its current cycle.
    ///
    /// With `sync`, waits for the acknowledgement and joins the thread.
    pub fn shutdown(&self, sync: bool) -> Result<(), CyclerError> {
        self.request(Command::Shutdown, sync)?;
        if sync {
            self.join()?;
        }
        Ok(())
    }

    fn request(&self, command: Command, sync: bool) -> Result<(), CyclerError> {
        if sync && self.on_worker_thread() {
            return Err(CyclerError::SyncFromWorker {
                name: self.name.clone(),
            });
        }
        let (ack, acked) = if sync {
            let (tx, rx) = channel::bounded(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        debug!(cycler = %self.name, ?command, sync, "request");
        self.requests
            .send(Request { command, ack })
            .map_err(|_| self.terminated())?;
        if let Some(acked) = acked {
            acked.recv().map_err(|_| self.terminated())?;
        }
        Ok(())
    }

    fn join(&self) -> Result<(), CyclerError> {
        let handle = self.worker.lock().take();
        match handle {
            Some(h) if h.thread().id() != thread::current().id() => {
                h.join().map_err(|_| CyclerError::WorkerPanicked {
                    name: self.name.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn on_worker_thread(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    fn terminated(&self) -> CyclerError {
        CyclerError::Terminated {
            name: self.name.clone(),
        }
    }
}

impl Drop for Cycler {
    fn drop(&mut self) {
        if self.daemon || !self.is_alive() || self.on_worker_thread() {
            return;
        }
        let _ = self.requests.send(Request {
            command: Command::Shutdown,
            ack: None,
        });
        if let Err(e) = self.join() {
            warn!(cycler = %self.name, "{e}");
        }
    }
}

impl std::fmt::Debug for Cycler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cycler")
            .field("name", &self.name)
            .field("cycle_time", &self.cycle_time)
            .field("daemon", &self.daemon)
            .finish()
    }
}

// ─── Worker ─────────────────────────────────────────────────────────

struct Worker<P> {
    name: String,
    cycle_time: Duration,
    start_delay: Duration,
    requests: Receiver<Request>,
    topics: Arc<CycleTopics>,
    monitor: CycleMonitor,
    effective_ns: Arc<AtomicU64>,
    payload: P,
}

impl<P: CyclePayload> Worker<P> {
    fn run(mut self) {
        let mut running = false;
        let mut work = Duration::ZERO;
        let mut extra_delay = self.start_delay;
        let mut prev_begin: Option<Instant> = None;

        for index in 0u64.. {
            // ── 1. begin ──
            let begin = Instant::now();
            let info = CycleInfo {
                index,
                cycle_time: self.cycle_time,
                began: begin,
            };
            self.topics.on_cycle_begin.publish_or_log(&info);

            // ── 2. slack ──
            let slack = match self.cycle_time.checked_sub(work) {
                Some(slack) => slack,
                None => {
                    warn!(cycler = %self.name, work_ms = work.as_secs_f64() * 1e3, "negative cycle slack");
                    self.topics.on_underflow.publish_or_log(&Underflow::NegativeSlack {
                        work,
                        cycle_time: self.cycle_time,
                    });
                    Duration::ZERO
                }
            };

            // ── 3. requests ──
            let wait_start = Instant::now();
            let deadline = begin + slack + std::mem::take(&mut extra_delay);
            if self.wait_until(deadline, &mut running) == Control::Exit {
                return;
            }
            let resumed = Instant::now();

            // ── 4. payload ──
            if running {
                if let Err(e) = self.payload.run_cycle(&info) {
                    warn!(cycler = %self.name, cycle = index, "payload failed: {e}");
                    self.topics
                        .on_error
                        .publish_or_log(&Fault::new(FaultKind::PayloadFailure, &self.name, e));
                }
            }

            // ── 5. end ──
            self.topics.on_cycle_end.publish_or_log(&info);
            let end = Instant::now();
            work = wait_start.duration_since(begin) + end.duration_since(resumed);
            if let Some(prev) = prev_begin {
                self.observe(begin.duration_since(prev), end);
            }
            prev_begin = Some(begin);
            trace!(cycler = %self.name, cycle = index, work_us = work.as_micros() as u64, "cycle done");
        }
    }

    fn observe(&mut self, period: Duration, now: Instant) {
        let report = self.monitor.record(period, now);
        if let Some(effective) = self.monitor.effective_cycle_time() {
            let ns = u64::try_from(effective.as_nanos()).unwrap_or(u64::MAX).max(1);
            self.effective_ns.store(ns, Ordering::Release);
        }
        if let Some(report) = report {
            debug!(cycler = %self.name, ?report, "cycle window closed");
            if self.monitor.exceeds(&report) {
                warn!(
                    cycler = %self.name,
                    mean_ms = report.mean.as_secs_f64() * 1e3,
                    nominal_ms = report.nominal.as_secs_f64() * 1e3,
                    "effective cycle time exceeds tolerance"
                );
                self.topics
                    .on_underflow
                    .publish_or_log(&Underflow::WindowExceeded(report));
            }
        }
    }

    fn wait_until(&mut self, deadline: Instant, running: &mut bool) -> Control {
        loop {
            match self.requests.recv_deadline(deadline) {
                Ok(request) => {
                    if self.handle(request, running) == Control::Exit {
                        return Control::Exit;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Control::Continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!(cycler = %self.name, "handle dropped, shutting down");
                    self.topics.on_shutdown.publish_or_log(&());
                    return Control::Exit;
                }
            }
        }
    }

    fn handle(&mut self, request: Request, running: &mut bool) -> Control {
        let control = match (request.command, *running) {
            (Command::Start, false) => {
                *running = true;
                info!(cycler = %self.name, "started");
                self.topics.on_start.publish_or_log(&());
                Control::Continue
            }
            (Command::Stop, true) => {
                *running = false;
                info!(cycler = %self.name, "stopped");
                self.topics.on_stop.publish_or_log(&());
                Control::Continue
            }
            (Command::Start, true) => {
                warn!(cycler = %self.name, "start while running");
                self.topics.on_mismatch.publish_or_log(&Mismatch::AlreadyRunning);
                Control::Continue
            }
            (Command::Stop, false) => {
                warn!(cycler = %self.name, "stop while paused");
                self.topics.on_mismatch.publish_or_log(&Mismatch::AlreadyPaused);
                Control::Continue
            }
            (Command::Shutdown, _) => {
                info!(cycler = %self.name, "shutdown");
                self.topics.on_shutdown.publish_or_log(&());
                Control::Exit
            }
        };
        if let Some(ack) = request.ack {
            let _ = ack.send(());
        }
        control
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
