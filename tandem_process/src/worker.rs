//! Worker side of a cycling process.
//!
//! [`ProcessWorker`] runs the same cycle as an in-process cycler, with the
//! request channel replaced by the message transport:
//!
//! 1. Publish `on_cycle_begin`.
//! 2. Slack = cycle time − work of the previous cycle (negative slack
//!    publishes `on_underflow` and waits zero).
//! 3. Receive messages until the slack deadline. Standard messages are
//!    handled here; [`Message::User`] goes to the payload.
//! 4. Run the payload, then send everything it queued.
//! 5. Publish `on_cycle_end`, update the cycle monitor.
//!
//! Outgoing messages never wait past the current deadline (the slack
//! deadline while receiving, the end of the cycle after the payload). A
//! message the app has not made room for by then is dropped and reported
//! as a [`FaultKind::MessageOverflow`] fault on `on_error`.
//!
//! The worker is running from the first cycle on; there is no paused state.
//! It leaves the loop on `TerminationRequest` or when the app side closes.

use crate::error::ProcessError;
use crate::message::{BoxEntry, Message, UserMessage};
use crate::priority::Priority;
use crate::transport::Transport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_common::fault::{Fault, FaultKind};
use tandem_image::{BoxId, ValueBox};
use tandem_runtime::cycle::{CycleInfo, CycleMonitor, CycleTopics, MonitorSettings, Underflow};
use tandem_runtime::error::PayloadError;
use tracing::{debug, info, trace, warn};

/// Wait for the app to take `AcknProcessStarted`.
const ACKN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Payload ────────────────────────────────────────────────────────

/// Messages queued by a payload, sent after it returns.
#[derive(Debug, Default)]
pub struct Outbox {
    queued: Vec<Message>,
}

impl Outbox {
    /// Queue a message for the app.
    pub fn send(&mut self, message: impl Into<Message>) {
        self.queued.push(message.into());
    }

    /// Queue a user message with a serialized body.
    pub fn user<T: Serialize>(&mut self, topic: &str, body: &T) -> serde_json::Result<()> {
        self.send(UserMessage::new(topic, body)?);
        Ok(())
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}

/// Work run inside a worker process.
pub trait ProcessPayload: Send {
    /// Handle an application message. Runs during the wait phase.
    fn on_message(
        &mut self,
        message: UserMessage,
        _outbox: &mut Outbox,
    ) -> Result<(), PayloadError> {
        debug!(topic = %message.topic, "user message ignored");
        Ok(())
    }

    /// Run one cycle.
    fn run_cycle(&mut self, cycle: &CycleInfo, outbox: &mut Outbox) -> Result<(), PayloadError>;
}

// ─── Worker ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Continue,
    Exit,
}

/// Cycling loop of a worker process.
pub struct ProcessWorker<T, P> {
    name: String,
    cycle_time: Duration,
    priority: Option<Priority>,
    boxes: BTreeMap<BoxId, ValueBox>,
    transport: T,
    payload: P,
    topics: Arc<CycleTopics>,
    monitor: CycleMonitor,
    outbox: Outbox,
}

impl<T: Transport, P: ProcessPayload> ProcessWorker<T, P> {
    /// Worker cycling `payload` every `cycle_time`, talking over `transport`.
    pub fn new(
        name: impl Into<String>,
        cycle_time: Duration,
        transport: T,
        payload: P,
    ) -> Result<Self, ProcessError> {
        let name = name.into();
        if cycle_time.is_zero() {
            return Err(ProcessError::InvalidCycleTime { name });
        }
        Ok(Self {
            topics: CycleTopics::new(&name),
            monitor: CycleMonitor::new(cycle_time, MonitorSettings::default()),
            name,
            cycle_time,
            priority: None,
            boxes: BTreeMap::new(),
            transport,
            payload,
            outbox: Outbox::default(),
        })
    }

    /// Apply `priority` to the process when the loop starts.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Replace the cycle monitor settings.
    pub fn with_monitor(mut self, settings: MonitorSettings) -> Self {
        self.monitor = CycleMonitor::new(self.cycle_time, settings);
        self
    }

    /// Make `value_box` a target of `BoxesDict` messages.
    pub fn register(mut self, value_box: ValueBox) -> Self {
        self.boxes.insert(value_box.id().clone(), value_box);
        self
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publisher channels (run on the worker's thread).
    pub fn topics(&self) -> &Arc<CycleTopics> {
        &self.topics
    }

    /// Run until terminated.
    ///
    /// A closed app side ends the loop normally.
    pub fn run(mut self) -> Result<(), ProcessError> {
        if let Some(priority) = self.priority {
            match priority.apply() {
                Ok(()) => info!(process = %self.name, %priority, "priority applied"),
                Err(e) => warn!(process = %self.name, %priority, "{e}"),
            }
        }
        let result = self.cycle_loop();
        self.topics.on_shutdown.publish_or_log(&());
        match result {
            Err(ProcessError::RemoteGone { .. }) => {
                info!(process = %self.name, "app side closed, worker exiting");
                Ok(())
            }
            other => other,
        }
    }

    fn cycle_loop(&mut self) -> Result<(), ProcessError> {
        self.transport.send_timeout(
            &Message::AcknProcessStarted {
                pid: std::process::id(),
            },
            ACKN_TIMEOUT,
        )?;
        info!(
            process = %self.name,
            cycle_time_ms = self.cycle_time.as_secs_f64() * 1e3,
            "worker started"
        );

        let mut work = Duration::ZERO;
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
                    warn!(process = %self.name, work_ms = work.as_secs_f64() * 1e3, "negative cycle slack");
                    self.topics.on_underflow.publish_or_log(&Underflow::NegativeSlack {
                        work,
                        cycle_time: self.cycle_time,
                    });
                    Duration::ZERO
                }
            };

            // ── 3. messages ──
            let wait_start = Instant::now();
            if self.receive_until(begin + slack)? == Control::Exit {
                info!(process = %self.name, "termination requested");
                return Ok(());
            }
            let resumed = Instant::now();

            // ── 4. payload ──
            if let Err(e) = self.payload.run_cycle(&info, &mut self.outbox) {
                self.payload_failed(e);
            }
            self.flush(begin + self.cycle_time)?;

            // ── 5. end ──
            self.topics.on_cycle_end.publish_or_log(&info);
            let end = Instant::now();
            work = wait_start.duration_since(begin) + end.duration_since(resumed);
            if let Some(prev) = prev_begin {
                self.observe(begin.duration_since(prev), end);
            }
            prev_begin = Some(begin);
            trace!(process = %self.name, cycle = index, work_us = work.as_micros() as u64, "cycle done");
        }
        Ok(())
    }

    fn receive_until(&mut self, deadline: Instant) -> Result<Control, ProcessError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.recv_timeout(remaining)? {
                Some(message) => {
                    if self.handle(message, deadline)? == Control::Exit {
                        return Ok(Control::Exit);
                    }
                }
                None => return Ok(Control::Continue),
            }
        }
    }

    fn handle(&mut self, message: Message, deadline: Instant) -> Result<Control, ProcessError> {
        trace!(process = %self.name, command = message.command(), "message");
        match message {
            Message::TerminationRequest => return Ok(Control::Exit),
            Message::EffectiveCycletimeRequest => {
                let reply = Message::effective_cycletime(self.monitor.effective_cycle_time());
                self.outbox.send(reply);
                self.flush(deadline)?;
            }
            Message::BoxesDict(entries) => self.apply_boxes(entries),
            Message::User(user) => {
                if let Err(e) = self.payload.on_message(user, &mut self.outbox) {
                    self.payload_failed(e);
                }
                self.flush(deadline)?;
            }
            other @ (Message::AcknProcessStarted { .. } | Message::EffectiveCycletime { .. }) => {
                warn!(process = %self.name, command = other.command(), "unexpected message for a worker");
            }
        }
        Ok(Control::Continue)
    }

    fn apply_boxes(&self, entries: Vec<BoxEntry>) {
        let count = entries.len();
        for BoxEntry { id, value } in entries {
            match self.boxes.get(&id) {
                Some(target) => {
                    if let Err(e) = target.write(value) {
                        warn!(process = %self.name, box_id = %id, "box update rejected: {e}");
                    }
                }
                None => warn!(process = %self.name, box_id = %id, "no registered box"),
            }
        }
        debug!(process = %self.name, count, "boxes applied");
    }

    /// Send queued messages, none of them waiting past `deadline`.
    fn flush(&mut self, deadline: Instant) -> Result<(), ProcessError> {
        let mut dropped = 0usize;
        for message in std::mem::take(&mut self.outbox.queued) {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.transport.send_timeout(&message, timeout) {
                Ok(()) => {}
                Err(ProcessError::SendTimeout { .. }) => {
                    trace!(process = %self.name, command = message.command(), "message dropped");
                    dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if dropped > 0 {
            warn!(process = %self.name, dropped, "app did not take messages in time");
            self.topics.on_error.publish_or_log(&Fault::new(
                FaultKind::MessageOverflow,
                &self.name,
                format!("{dropped} message(s) dropped"),
            ));
        }
        Ok(())
    }

    fn payload_failed(&self, e: PayloadError) {
        warn!(process = %self.name, "payload failed: {e}");
        self.topics
            .on_error
            .publish_or_log(&Fault::new(FaultKind::PayloadFailure, &self.name, e));
    }

    fn observe(&mut self, period: Duration, now: Instant) {
        if let Some(report) = self.monitor.record(period, now) {
            debug!(process = %self.name, ?report, "cycle window closed");
            if self.monitor.exceeds(&report) {
                warn!(
                    process = %self.name,
                    mean_ms = report.mean.as_secs_f64() * 1e3,
                    "effective cycle time exceeds tolerance"
                );
                self.topics
                    .on_underflow
                    .publish_or_log(&Underflow::WindowExceeded(report));
            }
        }
    }
}

impl<T, P> std::fmt::Debug for ProcessWorker<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWorker")
            .field("name", &self.name)
            .field("cycle_time", &self.cycle_time)
            .field("priority", &self.priority)
            .field("boxes", &self.boxes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use parking_lot::Mutex;
    use std::thread;

    const MS: Duration = Duration::from_millis(1);
    const WAIT: Duration = Duration::from_secs(2);

    struct Failing;

    impl ProcessPayload for Failing {
        fn run_cycle(&mut self, _: &CycleInfo, _: &mut Outbox) -> Result<(), PayloadError> {
            Err("sensor offline".into())
        }
    }

    struct Counter(u64);

    impl ProcessPayload for Counter {
        fn on_message(&mut self, m: UserMessage, outbox: &mut Outbox) -> Result<(), PayloadError> {
            outbox.user(&m.topic, &self.0)?;
            Ok(())
        }

        fn run_cycle(&mut self, _: &CycleInfo, _: &mut Outbox) -> Result<(), PayloadError> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn zero_cycle_time_rejected() {
        let (_app, end) = ChannelTransport::pair("w");
        assert!(matches!(
            ProcessWorker::new("w", Duration::ZERO, end, Counter(0)),
            Err(ProcessError::InvalidCycleTime { .. })
        ));
    }

    #[test]
    fn payload_errors_become_faults() {
        let (mut app, end) = ChannelTransport::pair("w");
        let worker = ProcessWorker::new("w", 5 * MS, end, Failing).unwrap();
        let faults = Arc::new(Mutex::new(Vec::<Fault>::new()));
        {
            let faults = Arc::clone(&faults);
            worker
                .topics()
                .on_error
                .subscribe(Arc::new(move |f: &Fault| faults.lock().push(f.clone())))
                .unwrap();
        }
        let handle = thread::spawn(move || worker.run());
        assert!(matches!(
            app.recv_timeout(WAIT).unwrap(),
            Some(Message::AcknProcessStarted { .. })
        ));
        thread::sleep(30 * MS);
        app.send_timeout(&Message::TerminationRequest, WAIT).unwrap();
        handle.join().unwrap().unwrap();

        let faults = faults.lock();
        assert!(!faults.is_empty());
        assert_eq!(faults[0].kind, FaultKind::PayloadFailure);
        assert_eq!(faults[0].origin, "w");
    }

    #[test]
    fn user_message_reply_and_closed_app() {
        let (mut app, end) = ChannelTransport::pair("w");
        let worker = ProcessWorker::new("w", 5 * MS, end, Counter(0)).unwrap();
        let handle = thread::spawn(move || worker.run());
        app.recv_timeout(WAIT).unwrap();
        thread::sleep(20 * MS);

        app.send_timeout(&Message::User(UserMessage::new("count", &()).unwrap()), WAIT)
            .unwrap();
        let Some(Message::User(reply)) = app.recv_timeout(WAIT).unwrap() else {
            panic!("expected a user reply");
        };
        assert_eq!(reply.topic, "count");
        assert!(reply.decode::<u64>().unwrap() >= 1);

        drop(app);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn boxes_dict_updates_registered_boxes() {
        let (mut app, end) = ChannelTransport::pair("w");
        let setpoint = ValueBox::new("setpoint", 0.0);
        let worker = ProcessWorker::new("w", 5 * MS, end, Counter(0))
            .unwrap()
            .register(setpoint.clone());
        let handle = thread::spawn(move || worker.run());
        app.recv_timeout(WAIT).unwrap();

        let remote = ValueBox::new("setpoint", 2.5);
        let stray = ValueBox::new("unknown", 1.0);
        app.send_timeout(&Message::boxes([&remote, &stray]), WAIT)
            .unwrap();
        app.send_timeout(&Message::TerminationRequest, WAIT).unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(setpoint.get::<f64>().unwrap(), 2.5);
    }

    struct Chatty;

    impl ProcessPayload for Chatty {
        fn run_cycle(&mut self, cycle: &CycleInfo, outbox: &mut Outbox) -> Result<(), PayloadError> {
            outbox.user("tick", &cycle.index)?;
            Ok(())
        }
    }

    #[test]
    fn unread_messages_are_dropped_not_waited_for() {
        let (mut app, end) = ChannelTransport::pair("w");
        let worker = ProcessWorker::new("w", 5 * MS, end, Chatty).unwrap();
        let overflows = Arc::new(Mutex::new(0usize));
        let cycles = Arc::new(Mutex::new(0u64));
        {
            let overflows = Arc::clone(&overflows);
            worker
                .topics()
                .on_error
                .subscribe(Arc::new(move |f: &Fault| {
                    if f.kind == FaultKind::MessageOverflow {
                        *overflows.lock() += 1;
                    }
                }))
                .unwrap();
            let cycles = Arc::clone(&cycles);
            worker
                .topics()
                .on_cycle_end
                .subscribe(Arc::new(move |_: &CycleInfo| *cycles.lock() += 1))
                .unwrap();
        }
        let handle = thread::spawn(move || worker.run());
        app.recv_timeout(WAIT).unwrap();

        // The app does not read; the worker keeps cycling regardless.
        thread::sleep(100 * MS);
        assert!(*cycles.lock() >= 5);
        assert!(*overflows.lock() >= 1);

        app.send_timeout(&Message::TerminationRequest, WAIT).unwrap();
        handle.join().unwrap().unwrap();
    }
}
