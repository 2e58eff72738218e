//! App side of a cycling process.
//!
//! A [`CyclingProcess`] owns the worker (a child process or, for tests and
//! single-binary setups, a thread) and the app end of its transport.
//! Construction waits for `AcknProcessStarted`; messages that arrive while
//! the app waits for a specific reply are kept and returned by later
//! [`recv_timeout`](CyclingProcess::recv_timeout) calls in arrival order.

use crate::error::ProcessError;
use crate::message::Message;
use crate::transport::{LineTransport, Transport};
use crate::worker::{ProcessPayload, ProcessWorker};
use std::collections::VecDeque;
use std::io::BufReader;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tandem_image::ValueBox;
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(10);

/// Timeouts of the app side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Wait for `AcknProcessStarted`.
    pub start_timeout: Duration,
    /// Wait for the worker to exit after `shutdown(true)`.
    pub shutdown_timeout: Duration,
    /// Wait for the worker to take a message.
    pub send_timeout: Duration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(1),
        }
    }
}

enum Host {
    Child(Child),
    Thread(Option<JoinHandle<Result<(), ProcessError>>>),
}

/// Handle to a cycling worker.
pub struct CyclingProcess {
    name: String,
    pid: u32,
    transport: Box<dyn Transport>,
    host: Host,
    pending: VecDeque<Message>,
    options: ProcessOptions,
    terminated: bool,
}

impl CyclingProcess {
    /// Start `command` as a worker talking JSON lines on its stdin/stdout.
    ///
    /// Stderr is inherited so worker logs stay visible.
    pub fn spawn(
        name: &str,
        mut command: Command,
        options: ProcessOptions,
    ) -> Result<Self, ProcessError> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                name: name.to_owned(),
                source,
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(ProcessError::Io {
                name: name.to_owned(),
                source: std::io::Error::other("worker stdio not captured"),
            });
        };
        let transport = LineTransport::new(name, BufReader::new(stdout), stdin)?;
        info!(process = %name, os_pid = child.id(), "worker process spawned");
        Self::attach(name, Box::new(transport), Host::Child(child), options)
    }

    /// Run `worker` on a thread of this process, talking over `transport`.
    pub fn on_thread<T, P>(
        worker: ProcessWorker<T, P>,
        transport: impl Transport + 'static,
        options: ProcessOptions,
    ) -> Result<Self, ProcessError>
    where
        T: Transport + 'static,
        P: ProcessPayload + 'static,
    {
        let name = worker.name().to_owned();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|source| ProcessError::Spawn {
                name: name.clone(),
                source,
            })?;
        info!(process = %name, "worker thread spawned");
        Self::attach(&name, Box::new(transport), Host::Thread(Some(handle)), options)
    }

    fn attach(
        name: &str,
        transport: Box<dyn Transport>,
        host: Host,
        options: ProcessOptions,
    ) -> Result<Self, ProcessError> {
        let mut process = Self {
            name: name.to_owned(),
            pid: 0,
            transport,
            host,
            pending: VecDeque::new(),
            options,
            terminated: false,
        };
        let deadline = Instant::now() + options.start_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match process.transport.recv_timeout(remaining) {
                Ok(Some(Message::AcknProcessStarted { pid })) => {
                    process.pid = pid;
                    info!(process = %name, pid, "worker acknowledged start");
                    return Ok(process);
                }
                Ok(Some(other)) => process.pending.push_back(other),
                Ok(None) => {
                    process.terminated = true;
                    process.kill();
                    return Err(ProcessError::StartTimeout {
                        name: name.to_owned(),
                        timeout: options.start_timeout,
                    });
                }
                Err(e) => {
                    process.terminated = true;
                    return Err(e);
                }
            }
        }
    }

    /// Process name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process id reported by the worker.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send a message to the worker.
    ///
    /// # Errors
    /// The message was not delivered:
    /// - `SendTimeout`: the worker did not take it within the send timeout.
    /// - `RemoteGone`: the worker's channel is broken.
    pub fn message(&mut self, message: impl Into<Message>) -> Result<(), ProcessError> {
        let message = message.into();
        debug!(process = %self.name, command = message.command(), "send");
        self.transport
            .send_timeout(&message, self.options.send_timeout)
            .inspect_err(|e| {
                warn!(process = %self.name, command = message.command(), "not delivered: {e}");
            })
    }

    /// Send the current values of `boxes` as a `BoxesDict`.
    pub fn send_boxes<'a>(
        &mut self,
        boxes: impl IntoIterator<Item = &'a ValueBox>,
    ) -> Result<(), ProcessError> {
        self.message(Message::boxes(boxes))
    }

    /// Next message from the worker, waiting up to `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, ProcessError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        self.transport.recv_timeout(timeout)
    }

    /// Ask the worker for its measured cycle time.
    ///
    /// `Ok(None)` if the worker has not measured one yet or did not reply
    /// within `timeout`.
    pub fn effective_cycle_time(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Duration>, ProcessError> {
        self.message(Message::EffectiveCycletimeRequest)?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.recv_timeout(remaining)? {
                Some(Message::EffectiveCycletime { seconds }) => {
                    return Ok(seconds.and_then(|s| Duration::try_from_secs_f64(s).ok()));
                }
                Some(other) => self.pending.push_back(other),
                None => {
                    warn!(process = %self.name, "no cycle time reply within {timeout:?}");
                    return Ok(None);
                }
            }
        }
    }

    /// True while the worker has not exited.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.host {
            Host::Child(child) => matches!(child.try_wait(), Ok(None)),
            Host::Thread(handle) => handle.as_ref().is_some_and(|h| !h.is_finished()),
        }
    }

    /// Send `TerminationRequest`; with `sync`, wait for the worker to exit.
    ///
    /// Messages arriving meanwhile are discarded. With `sync`, a request the
    /// worker did not take in time is retried while waiting; a child that
    /// does not exit within the shutdown timeout is killed.
    ///
    /// # Errors
    /// Without `sync`, `SendTimeout` if the worker did not take the request.
    pub fn shutdown(&mut self, sync: bool) -> Result<(), ProcessError> {
        if !self.terminated {
            match self.request_termination(self.options.send_timeout) {
                Ok(()) => {}
                Err(e @ ProcessError::SendTimeout { .. }) if sync => {
                    debug!(process = %self.name, "{e}; retrying while waiting for exit");
                }
                Err(e) => return Err(e),
            }
        }
        if sync {
            self.wait_exit()?;
        }
        Ok(())
    }

    fn request_termination(&mut self, timeout: Duration) -> Result<(), ProcessError> {
        match self
            .transport
            .send_timeout(&Message::TerminationRequest, timeout)
        {
            Ok(()) => {
                info!(process = %self.name, "termination requested");
                self.terminated = true;
                Ok(())
            }
            Err(ProcessError::RemoteGone { .. }) => {
                self.terminated = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn wait_exit(&mut self) -> Result<(), ProcessError> {
        let deadline = Instant::now() + self.options.shutdown_timeout;
        let mut channel_open = true;
        loop {
            if let Some(result) = self.try_reap() {
                return result;
            }
            if Instant::now() >= deadline {
                break;
            }
            if !self.terminated {
                let _ = self.request_termination(Duration::ZERO);
            }
            if channel_open {
                match self.transport.recv_timeout(POLL) {
                    Ok(Some(message)) => {
                        debug!(process = %self.name, command = message.command(), "discarded during shutdown");
                    }
                    Ok(None) => {}
                    Err(_) => channel_open = false,
                }
            } else {
                thread::sleep(POLL);
            }
        }
        warn!(process = %self.name, "worker did not exit within {:?}", self.options.shutdown_timeout);
        self.kill();
        Err(ProcessError::Io {
            name: self.name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "worker did not exit"),
        })
    }

    fn try_reap(&mut self) -> Option<Result<(), ProcessError>> {
        match &mut self.host {
            Host::Child(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    info!(process = %self.name, %status, "worker exited");
                    Some(Ok(()))
                }
                Ok(None) => None,
                Err(source) => Some(Err(ProcessError::Io {
                    name: self.name.clone(),
                    source,
                })),
            },
            Host::Thread(slot) => match slot.take_if(|h| h.is_finished()) {
                Some(handle) => {
                    info!(process = %self.name, "worker thread exited");
                    Some(handle.join().unwrap_or_else(|_| {
                        Err(ProcessError::WorkerPanicked {
                            name: self.name.clone(),
                        })
                    }))
                }
                None if slot.is_none() => Some(Ok(())),
                None => None,
            },
        }
    }

    fn kill(&mut self) {
        if let Host::Child(child) = &mut self.host {
            if let Err(e) = child.kill() {
                debug!(process = %self.name, "kill: {e}");
            }
            let _ = child.wait();
        }
    }
}

impl Drop for CyclingProcess {
    fn drop(&mut self) {
        if !self.is_alive() {
            let _ = self.try_reap();
            return;
        }
        if let Err(e) = self.shutdown(true) {
            warn!(process = %self.name, "{e}");
        }
    }
}

impl std::fmt::Debug for CyclingProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CyclingProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("pending", &self.pending.len())
            .field("terminated", &self.terminated)
            .finish()
    }
}
