//! PLC: a cycler running jobs between input and output fan-out.
//!
//! ## PLC Cycle
//! 1. Read hardware inputs (every input port of the unit).
//! 2. Commit received images.
//! 3. Tick jobs in registration order (only while `started`).
//! 4. Write hardware outputs.
//! 5. Publish the unit's own image.
//!
//! Steps are skipped entirely while the operation mode is `off`. Port,
//! image and job failures are published on `on_error`; the cycle continues.

pub mod job;
pub mod opmode;

pub use job::{Job, JobOverrun};
pub use opmode::{OPERATION_MODE_BOX, OperationMode, TransitionResult};

use crate::context::RuntimeContext;
use crate::cycle::{CycleInfo, CyclePayload, CycleTopics, Cycler, CyclerOptions};
use crate::error::{PayloadError, PlcError};
use crate::io::{self, InputPort, OutputPort};
use job::{JobSlot, Tick};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tandem_common::fault::{Fault, FaultKind};
use tandem_common::pubsub::Publisher;
use tandem_image::{BoxError, ImageCollection, ReceiverHandle, ValueBox};
use tracing::{debug, info, warn};

// ─── Builder ────────────────────────────────────────────────────────

/// Collects jobs for a PLC unit.
#[derive(Debug)]
pub struct PlcBuilder {
    name: String,
    cycle_time: Duration,
    options: CyclerOptions,
    jobs: Vec<JobSlot>,
}

impl PlcBuilder {
    /// PLC for unit `name` cycling every `cycle_time`.
    pub fn new(name: impl Into<String>, cycle_time: Duration) -> Self {
        Self {
            name: name.into(),
            cycle_time,
            options: CyclerOptions::default(),
            jobs: Vec::new(),
        }
    }

    /// Cycler options for the spawned worker.
    pub fn options(mut self, options: CyclerOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a job running every `period`.
    ///
    /// Jobs run in registration order. A period that is not a multiple of
    /// the PLC cycle is rounded up to the next multiple (and logged).
    ///
    /// # Errors
    /// - `JobPeriodTooShort` if `period < cycle_time`.
    /// - `DuplicateJob` if `id` is already registered.
    pub fn add_job(
        &mut self,
        id: impl Into<String>,
        period: Duration,
        job: impl Job,
    ) -> Result<&mut Self, PlcError> {
        let id = id.into();
        if period < self.cycle_time {
            return Err(PlcError::JobPeriodTooShort {
                job: id,
                period,
                cycle: self.cycle_time,
            });
        }
        if self.jobs.iter().any(|j| j.id == id) {
            return Err(PlcError::DuplicateJob(id));
        }
        if !self.cycle_time.is_zero() && period.as_nanos() % self.cycle_time.as_nanos() != 0 {
            warn!(
                plc = %self.name,
                job = %id,
                period_ms = period.as_secs_f64() * 1e3,
                "job period is not a multiple of the PLC cycle"
            );
        }
        debug!(plc = %self.name, job = %id, period_ms = period.as_secs_f64() * 1e3, "job registered");
        self.jobs.push(JobSlot::new(id, period, Box::new(job)));
        Ok(self)
    }

    /// Build the cycle payload without spawning a worker.
    ///
    /// Ports, received images and the owned image are looked up in `ctx`
    /// under the unit name.
    pub fn build_program(self, ctx: &RuntimeContext) -> Result<PlcProgram, PlcError> {
        let topics = CycleTopics::new(&self.name);
        self.build_with_topics(ctx, topics)
    }

    fn build_with_topics(
        self,
        ctx: &RuntimeContext,
        topics: Arc<CycleTopics>,
    ) -> Result<PlcProgram, PlcError> {
        let mode = opmode::operation_mode_box(&self.name, Arc::clone(&topics))?;
        let program = PlcProgram {
            inputs: ctx.io().inputs_for(&self.name),
            outputs: ctx.io().outputs_for(&self.name),
            receivers: ctx.receivers_of(&self.name).to_vec(),
            image: ctx.image(&self.name).cloned(),
            overruns: Arc::new(Publisher::new(format!("{}.on_job_overrun", self.name))),
            name: self.name,
            cycle_time: self.cycle_time,
            mode,
            jobs: self.jobs,
            topics,
        };
        info!(
            plc = %program.name,
            inputs = program.inputs.len(),
            outputs = program.outputs.len(),
            receivers = program.receivers.len(),
            jobs = program.jobs.len(),
            "PLC program built"
        );
        Ok(program)
    }

    /// Build the program and spawn its worker (paused, mode `off`).
    pub fn spawn(self, ctx: &RuntimeContext) -> Result<Plc, PlcError> {
        let options = self.options;
        let topics = CycleTopics::new(&self.name);
        let program = self.build_with_topics(ctx, Arc::clone(&topics))?;
        let mode = program.mode.clone();
        let overruns = Arc::clone(&program.overruns);
        let runs = program.job_counters();
        let cycler = Cycler::spawn_with_topics(
            program.name.clone(),
            program.cycle_time,
            options,
            topics,
            program,
        )?;
        Ok(Plc {
            cycler,
            mode,
            overruns,
            runs,
        })
    }
}

// ─── Program ────────────────────────────────────────────────────────

/// The per-cycle body of a PLC.
///
/// Usually driven by a [`Plc`]'s cycler; can be stepped manually with
/// [`CyclePayload::run_cycle`].
pub struct PlcProgram {
    name: String,
    cycle_time: Duration,
    mode: ValueBox,
    inputs: Vec<Arc<InputPort>>,
    outputs: Vec<Arc<OutputPort>>,
    receivers: Vec<ReceiverHandle>,
    image: Option<Arc<ImageCollection>>,
    jobs: Vec<JobSlot>,
    topics: Arc<CycleTopics>,
    overruns: Arc<Publisher<JobOverrun>>,
}

impl PlcProgram {
    /// Unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// PLC cycle time.
    pub fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    /// The `operationmode` box.
    pub fn mode_box(&self) -> &ValueBox {
        &self.mode
    }

    /// Current operation mode.
    pub fn mode(&self) -> OperationMode {
        opmode::read_mode(&self.mode)
    }

    /// Request an operation mode.
    pub fn set_mode(&self, mode: OperationMode) -> Result<(), PlcError> {
        set_mode(&self.mode, mode)
    }

    /// Publisher channels.
    pub fn topics(&self) -> &Arc<CycleTopics> {
        &self.topics
    }

    /// Job overrun channel.
    pub fn on_job_overrun(&self) -> &Publisher<JobOverrun> {
        &self.overruns
    }

    /// Execution counters by job id, in registration order.
    pub fn job_counters(&self) -> Vec<(String, Arc<AtomicU64>)> {
        self.jobs.iter().map(|j| (j.id.clone(), j.runs())).collect()
    }

    fn report(&self, kind: FaultKind, origin: &str, cause: impl std::fmt::Display) {
        self.topics
            .on_error
            .publish_or_log(&Fault::new(kind, origin, cause));
    }

    fn read_inputs(&self) {
        for e in io::read_all(&self.inputs) {
            warn!(plc = %self.name, port = e.port(), "input failed: {e}");
            self.report(e.fault_kind(), e.port(), &e);
        }
        for rx in &self.receivers {
            if let Err(e) = rx.commit() {
                warn!(plc = %self.name, sender = rx.sender(), "image commit failed: {e}");
                self.report(FaultKind::ProgrammingError, rx.sender(), &e);
            }
        }
    }

    fn run_jobs(&mut self, cycle: &CycleInfo) {
        let mut faults = Vec::new();
        for slot in &mut self.jobs {
            let Tick::Ran { runtime, result } = slot.tick(cycle) else {
                continue;
            };
            if let Err(e) = result {
                warn!(plc = %self.name, job = %slot.id, "job failed: {e}");
                faults.push(Fault::new(FaultKind::PayloadFailure, slot.id.as_str(), e));
            }
            if runtime > slot.period {
                let overrun = JobOverrun {
                    job: slot.id.clone(),
                    runtime,
                    period: slot.period,
                };
                warn!(
                    plc = %self.name,
                    job = %slot.id,
                    runtime_ms = runtime.as_secs_f64() * 1e3,
                    period_ms = slot.period.as_secs_f64() * 1e3,
                    "job overran its period"
                );
                self.overruns.publish_or_log(&overrun);
                faults.push(Fault::new(
                    FaultKind::SenderCycleOverrun,
                    slot.id.as_str(),
                    format!("runtime {runtime:?} > period {:?}", slot.period),
                ));
            }
        }
        for fault in &faults {
            self.topics.on_error.publish_or_log(fault);
        }
    }

    fn write_outputs(&self) {
        for e in io::write_all(&self.outputs) {
            warn!(plc = %self.name, port = e.port(), "output failed: {e}");
            self.report(e.fault_kind(), e.port(), &e);
        }
        if let Some(image) = &self.image {
            if let Err(e) = image.publish() {
                warn!(plc = %self.name, "image publish failed: {e}");
                self.report(FaultKind::ProgrammingError, &self.name, &e);
            }
        }
    }
}

impl CyclePayload for PlcProgram {
    fn run_cycle(&mut self, cycle: &CycleInfo) -> Result<(), PayloadError> {
        let mode = self.mode();
        if !mode.services_io() {
            return Ok(());
        }
        self.read_inputs();
        if mode.runs_jobs() {
            self.run_jobs(cycle);
        }
        self.write_outputs();
        Ok(())
    }
}

impl std::fmt::Debug for PlcProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcProgram")
            .field("name", &self.name)
            .field("cycle_time", &self.cycle_time)
            .field("mode", &self.mode())
            .field("jobs", &self.jobs)
            .finish()
    }
}

fn set_mode(mode_box: &ValueBox, mode: OperationMode) -> Result<(), PlcError> {
    let from = opmode::read_mode(mode_box);
    mode_box.write(mode).map_err(|e| match (e, opmode::transition(from, mode)) {
        (BoxError::Plugin { .. }, TransitionResult::Rejected(reason)) => {
            PlcError::InvalidTransition {
                from: from.to_string(),
                to: mode.to_string(),
                reason,
            }
        }
        (other, _) => PlcError::Box(other),
    })
}

// ─── Spawned PLC ────────────────────────────────────────────────────

/// A PLC program running on its own cycler.
#[derive(Debug)]
pub struct Plc {
    cycler: Cycler,
    mode: ValueBox,
    overruns: Arc<Publisher<JobOverrun>>,
    runs: Vec<(String, Arc<AtomicU64>)>,
}

impl Plc {
    /// Underlying cycler (start/stop/shutdown, topics).
    pub fn cycler(&self) -> &Cycler {
        &self.cycler
    }

    /// Publisher channels.
    pub fn topics(&self) -> &Arc<CycleTopics> {
        self.cycler.topics()
    }

    /// Job overrun channel.
    pub fn on_job_overrun(&self) -> &Publisher<JobOverrun> {
        &self.overruns
    }

    /// The `operationmode` box.
    pub fn mode_box(&self) -> &ValueBox {
        &self.mode
    }

    /// Current operation mode.
    pub fn mode(&self) -> OperationMode {
        opmode::read_mode(&self.mode)
    }

    /// Request an operation mode.
    ///
    /// # Errors
    /// `InvalidTransition` for an illegal edge; the mode is unchanged and an
    /// `InvalidOpModeTransition` fault is published on `on_error`.
    pub fn set_mode(&self, mode: OperationMode) -> Result<(), PlcError> {
        set_mode(&self.mode, mode)
    }

    /// Times job `id` has run.
    pub fn job_runs(&self, id: &str) -> Option<u64> {
        self.runs
            .iter()
            .find(|(job, _)| job == id)
            .map(|(_, runs)| runs.load(Ordering::Relaxed))
    }
}
