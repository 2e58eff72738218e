//! Message transports.
//!
//! Both directions are one-slot channels. Every send carries a timeout: a
//! message the peer does not take in time is not delivered and the sender
//! gets [`ProcessError::SendTimeout`].
//!
//! - [`ChannelTransport`]: in-memory pair, for workers hosted on a thread.
//! - [`LineTransport`]: JSON lines over a byte stream (child stdin/stdout).
//!   A reader thread decodes lines into a one-slot channel so receives can
//!   time out; a writer thread takes encoded lines from a one-slot channel
//!   so a full pipe cannot block the sender.

use crate::error::ProcessError;
use crate::message::Message;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::io::{BufRead, BufReader, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How long a dropped [`LineTransport`] waits for its writer to drain.
const LINGER: Duration = Duration::from_millis(200);

/// Bidirectional message endpoint.
pub trait Transport: Send {
    /// Deliver `message`, waiting at most `timeout` for the slot to free.
    ///
    /// A zero timeout only succeeds if the slot is free right now.
    ///
    /// # Errors
    /// - `SendTimeout`: the peer did not take the previous message in time.
    /// - `RemoteGone`: the peer has closed its end.
    fn send_timeout(&mut self, message: &Message, timeout: Duration) -> Result<(), ProcessError>;

    /// Wait up to `timeout` for a message; `Ok(None)` on timeout.
    ///
    /// # Errors
    /// `RemoteGone` if the peer has closed its end.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, ProcessError>;

    /// Endpoint name for logs and errors.
    fn name(&self) -> &str;
}

fn receive(
    name: &str,
    inbox: &Receiver<Message>,
    timeout: Duration,
) -> Result<Option<Message>, ProcessError> {
    match inbox.recv_timeout(timeout) {
        Ok(message) => Ok(Some(message)),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(ProcessError::RemoteGone {
            name: name.to_owned(),
        }),
    }
}

fn deliver<T>(
    name: &str,
    outbox: &Sender<T>,
    item: T,
    timeout: Duration,
) -> Result<(), ProcessError> {
    outbox.send_timeout(item, timeout).map_err(|e| match e {
        SendTimeoutError::Timeout(_) => ProcessError::SendTimeout {
            name: name.to_owned(),
            timeout,
        },
        SendTimeoutError::Disconnected(_) => ProcessError::RemoteGone {
            name: name.to_owned(),
        },
    })
}

// ─── In-memory ──────────────────────────────────────────────────────

/// One end of an in-memory channel pair.
#[derive(Debug)]
pub struct ChannelTransport {
    name: String,
    outbox: Sender<Message>,
    inbox: Receiver<Message>,
}

impl ChannelTransport {
    /// Connected `(app, worker)` endpoints.
    pub fn pair(name: &str) -> (Self, Self) {
        let (to_worker, worker_inbox) = channel::bounded(1);
        let (to_app, app_inbox) = channel::bounded(1);
        (
            Self {
                name: name.to_owned(),
                outbox: to_worker,
                inbox: app_inbox,
            },
            Self {
                name: name.to_owned(),
                outbox: to_app,
                inbox: worker_inbox,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn send_timeout(&mut self, message: &Message, timeout: Duration) -> Result<(), ProcessError> {
        deliver(&self.name, &self.outbox, message.clone(), timeout)
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, ProcessError> {
        receive(&self.name, &self.inbox, timeout)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ─── JSON lines ─────────────────────────────────────────────────────

/// JSON-lines endpoint over a reader/writer pair.
///
/// A write failure closes the writer thread; the next send reports
/// `RemoteGone`.
pub struct LineTransport {
    name: String,
    lines: Option<Sender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    inbox: Receiver<Message>,
}

impl LineTransport {
    /// Endpoint reading from `reader` and writing to `writer`.
    pub fn new<R, W>(name: &str, reader: R, writer: W) -> Result<Self, ProcessError>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let spawn_error = |source| ProcessError::Spawn {
            name: name.to_owned(),
            source,
        };
        let (tx, inbox) = channel::bounded(1);
        let reader_name = name.to_owned();
        thread::Builder::new()
            .name(format!("{name}-rx"))
            .spawn(move || read_lines(&reader_name, reader, &tx))
            .map_err(spawn_error)?;

        let (lines, pending) = channel::bounded::<Vec<u8>>(1);
        let writer_name = name.to_owned();
        let writer = thread::Builder::new()
            .name(format!("{name}-tx"))
            .spawn(move || write_lines(&writer_name, writer, &pending))
            .map_err(spawn_error)?;

        Ok(Self {
            name: name.to_owned(),
            lines: Some(lines),
            writer: Some(writer),
            inbox,
        })
    }

    /// Worker-side endpoint on the process's own stdin/stdout.
    pub fn stdio(name: &str) -> Result<Self, ProcessError> {
        Self::new(name, BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

fn read_lines<R: BufRead>(name: &str, reader: R, tx: &Sender<Message>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(process = %name, "read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(message) => {
                trace!(process = %name, command = message.command(), "received");
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!(process = %name, "dropping malformed message: {e}"),
        }
    }
    debug!(process = %name, "message stream closed");
}

fn write_lines<W: Write>(name: &str, mut writer: W, pending: &Receiver<Vec<u8>>) {
    for line in pending.iter() {
        if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
            debug!(process = %name, "write failed: {e}");
            return;
        }
    }
    debug!(process = %name, "writer closed");
}

impl Transport for LineTransport {
    fn send_timeout(&mut self, message: &Message, timeout: Duration) -> Result<(), ProcessError> {
        let mut line = serde_json::to_vec(message).map_err(|source| ProcessError::Codec {
            name: self.name.clone(),
            source,
        })?;
        line.push(b'\n');
        let Some(lines) = &self.lines else {
            return Err(ProcessError::RemoteGone {
                name: self.name.clone(),
            });
        };
        deliver(&self.name, lines, line, timeout)
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, ProcessError> {
        receive(&self.name, &self.inbox, timeout)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LineTransport {
    fn drop(&mut self) {
        // Closing the line channel lets the writer finish what is queued.
        self.lines.take();
        let Some(writer) = self.writer.take() else {
            return;
        };
        let deadline = Instant::now() + LINGER;
        while !writer.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        if writer.is_finished() {
            let _ = writer.join();
        } else {
            debug!(process = %self.name, "writer still blocked, detaching");
        }
    }
}

impl std::fmt::Debug for LineTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineTransport")
            .field("name", &self.name)
            .finish()
    }
}
