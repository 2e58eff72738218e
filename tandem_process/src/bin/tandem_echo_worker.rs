//! # Tandem Echo Worker
//!
//! Demo worker process speaking JSON lines on stdin/stdout.
//!
//! - Counts its cycles in box `cycles`.
//! - Accepts `BoxesDict` updates for box `setpoint`.
//! - Topic `snapshot` replies with a `BoxesDict` of both boxes; any other
//!   user message is echoed back unchanged.
//!
//! # Usage
//!
//! ```bash
//! tandem_echo_worker --cycle-time-ms 10 --priority normal
//! ```

use clap::Parser;
use std::time::Duration;
use tandem_common::config::LogLevel;
use tandem_common::logging::init_tracing;
use tandem_image::ValueBox;
use tandem_process::{
    LineTransport, Message, Outbox, Priority, ProcessPayload, ProcessWorker, UserMessage,
};
use tandem_runtime::cycle::CycleInfo;
use tandem_runtime::error::PayloadError;
use tracing::{error, info};

/// Echo worker for the tandem process layer
#[derive(Parser, Debug)]
#[command(name = "tandem_echo_worker")]
#[command(version)]
#[command(about = "Cycling demo worker: echoes user messages and reports its boxes")]
struct Args {
    /// Nominal cycle time in milliseconds.
    #[arg(long, default_value_t = 10)]
    cycle_time_ms: u64,

    /// Priority class (low, normal, high, highest).
    #[arg(long, default_value = "normal")]
    priority: Priority,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

struct Echo {
    setpoint: ValueBox,
    cycles: ValueBox,
}

impl ProcessPayload for Echo {
    fn on_message(&mut self, message: UserMessage, outbox: &mut Outbox) -> Result<(), PayloadError> {
        if message.topic == "snapshot" {
            outbox.send(Message::boxes([&self.setpoint, &self.cycles]));
        } else {
            outbox.send(message);
        }
        Ok(())
    }

    fn run_cycle(&mut self, _cycle: &CycleInfo, _outbox: &mut Outbox) -> Result<(), PayloadError> {
        let n = self.cycles.get::<i64>()?;
        self.cycles.write(n + 1)?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("worker failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    init_tracing(level, args.json);
    info!("tandem_echo_worker v{} starting", env!("CARGO_PKG_VERSION"));

    let setpoint = ValueBox::with_meta("setpoint", 0.0, "Setpoint", "");
    let cycles = ValueBox::new("cycles", 0i64);
    let payload = Echo {
        setpoint: setpoint.clone(),
        cycles: cycles.clone(),
    };

    let transport = LineTransport::stdio("echo")?;
    ProcessWorker::new(
        "echo",
        Duration::from_millis(args.cycle_time_ms),
        transport,
        payload,
    )?
    .with_priority(args.priority)
    .register(setpoint)
    .register(cycles)
    .run()?;

    info!("tandem_echo_worker exiting");
    Ok(())
}
