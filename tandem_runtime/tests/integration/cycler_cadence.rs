//! Cycler start/stop sequencing and cadence monitoring.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tandem_common::fault::{Fault, FaultKind};
use tandem_runtime::cycle::{MonitorSettings, Underflow};
use tandem_runtime::{CycleInfo, Cycler, CyclerOptions, PayloadError};

fn counting(counter: Arc<AtomicU64>) -> impl FnMut(&CycleInfo) -> Result<(), PayloadError> + Send {
    move |_: &CycleInfo| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[test]
fn start_stop_start_counts_two_running_seconds() {
    let counter = Arc::new(AtomicU64::new(0));
    let cycler = Cycler::spawn(
        "s6",
        Duration::from_millis(100),
        CyclerOptions::default(),
        counting(Arc::clone(&counter)),
    )
    .unwrap();

    cycler.start(true).unwrap();
    thread::sleep(Duration::from_secs(1));
    cycler.stop(true).unwrap();
    thread::sleep(Duration::from_secs(1));
    cycler.start(true).unwrap();
    thread::sleep(Duration::from_secs(1));
    cycler.shutdown(true).unwrap();

    let n = counter.load(Ordering::Relaxed);
    assert!((19..=21).contains(&n), "payload ran {n} times");
    assert!(!cycler.is_alive());
}

#[test]
fn effective_cycle_time_converges_to_nominal() {
    let nominal = Duration::from_millis(20);
    let options = CyclerOptions {
        monitor: MonitorSettings {
            window: Duration::from_millis(200),
            tolerance: 0.5,
        },
        ..CyclerOptions::default()
    };
    let counter = Arc::new(AtomicU64::new(0));
    let cycler = Cycler::spawn("p4", nominal, options, counting(Arc::clone(&counter))).unwrap();
    let underflows = Arc::new(Mutex::new(Vec::new()));
    {
        let u = Arc::clone(&underflows);
        cycler
            .topics()
            .on_underflow
            .subscribe(Arc::new(move |e: &Underflow| u.lock().push(*e)))
            .unwrap();
    }

    cycler.start(true).unwrap();
    thread::sleep(Duration::from_millis(700));
    let effective = cycler.effective_cycle_time().unwrap();
    cycler.shutdown(true).unwrap();

    assert!(effective >= Duration::from_millis(18), "{effective:?}");
    assert!(effective <= Duration::from_millis(30), "{effective:?}");
    assert!(
        !underflows
            .lock()
            .iter()
            .any(|u| matches!(u, Underflow::WindowExceeded(_)))
    );
}

#[test]
fn slow_payload_reports_underflow() {
    let options = CyclerOptions {
        monitor: MonitorSettings {
            window: Duration::from_millis(50),
            tolerance: 0.1,
        },
        ..CyclerOptions::default()
    };
    let cycler = Cycler::spawn(
        "slow",
        Duration::from_millis(10),
        options,
        |_: &CycleInfo| -> Result<(), PayloadError> {
            thread::sleep(Duration::from_millis(25));
            Ok(())
        },
    )
    .unwrap();
    let underflows = Arc::new(Mutex::new(Vec::new()));
    {
        let u = Arc::clone(&underflows);
        cycler
            .topics()
            .on_underflow
            .subscribe(Arc::new(move |e: &Underflow| u.lock().push(*e)))
            .unwrap();
    }
    cycler.start(true).unwrap();
    thread::sleep(Duration::from_millis(300));
    cycler.shutdown(true).unwrap();

    let seen = underflows.lock();
    assert!(seen.iter().any(|u| matches!(u, Underflow::NegativeSlack { .. })));
    assert!(seen.iter().any(|u| matches!(u, Underflow::WindowExceeded(_))));
}

#[test]
fn payload_errors_reach_on_error() {
    let cycler = Cycler::spawn(
        "failing",
        Duration::from_millis(5),
        CyclerOptions::default(),
        |_: &CycleInfo| -> Result<(), PayloadError> { Err("sensor offline".into()) },
    )
    .unwrap();
    let faults = Arc::new(Mutex::new(Vec::new()));
    {
        let f = Arc::clone(&faults);
        cycler
            .topics()
            .on_error
            .subscribe(Arc::new(move |e: &Fault| f.lock().push(e.clone())))
            .unwrap();
    }
    cycler.start(true).unwrap();
    thread::sleep(Duration::from_millis(50));
    cycler.shutdown(true).unwrap();

    let faults = faults.lock();
    assert!(!faults.is_empty());
    assert_eq!(faults[0].kind, FaultKind::PayloadFailure);
    assert!(faults[0].message.contains("sensor offline"));
}

#[test]
fn start_delay_postpones_first_payload() {
    let counter = Arc::new(AtomicU64::new(0));
    let options = CyclerOptions {
        start_delay: Duration::from_millis(300),
        ..CyclerOptions::default()
    };
    let cycler = Cycler::spawn(
        "delayed",
        Duration::from_millis(10),
        options,
        counting(Arc::clone(&counter)),
    )
    .unwrap();
    cycler.start(true).unwrap();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(counter.load(Ordering::Relaxed), 0);
    thread::sleep(Duration::from_millis(300));
    assert!(counter.load(Ordering::Relaxed) > 0);
    cycler.shutdown(true).unwrap();
}
