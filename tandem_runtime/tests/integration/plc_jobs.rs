//! PLC job scheduling, operation modes and image exchange.

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tandem_common::fault::{Fault, FaultKind};
use tandem_image::{BoxId, LockPolicy, Value, ValueBox};
use tandem_runtime::io::{FnInput, InputPort};
use tandem_runtime::plc::{OperationMode, PlcBuilder};
use tandem_runtime::{AdapterError, CycleInfo, CyclePayload, PayloadError, PlcError, RuntimeContext};

fn counter_job(
    counter: Arc<AtomicU64>,
) -> impl FnMut(&CycleInfo) -> Result<(), PayloadError> + Send + 'static {
    move |_: &CycleInfo| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[test]
fn job_at_10hz_on_100hz_plc() {
    let ctx = RuntimeContext::builder().build();
    let mut b = PlcBuilder::new("plc", Duration::from_millis(10));
    b.add_job(
        "slow_job",
        Duration::from_millis(100),
        counter_job(Arc::new(AtomicU64::new(0))),
    )
    .unwrap();
    let plc = b.spawn(&ctx).unwrap();
    plc.set_mode(OperationMode::On).unwrap();
    plc.set_mode(OperationMode::Started).unwrap();

    plc.cycler().start(true).unwrap();
    thread::sleep(Duration::from_secs(1));
    plc.cycler().shutdown(true).unwrap();

    let runs = plc.job_runs("slow_job").unwrap();
    assert!((9..=11).contains(&runs), "job ran {runs} times");
}

#[test]
fn jobs_run_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let ctx = RuntimeContext::builder().build();
    let cycle = Duration::from_millis(10);
    let mut b = PlcBuilder::new("plc", cycle);
    for (id, period) in [("a", 1u32), ("b", 2), ("c", 1)] {
        let o = Arc::clone(&order);
        b.add_job(id, cycle * period, move |_: &CycleInfo| -> Result<(), PayloadError> {
            o.lock().push(id);
            Ok(())
        })
        .unwrap();
    }
    let mut program = b.build_program(&ctx).unwrap();
    program.set_mode(OperationMode::On).unwrap();
    program.set_mode(OperationMode::Started).unwrap();
    for i in 0..3 {
        program.run_cycle(&CycleInfo::new(i, cycle)).unwrap();
    }
    assert_eq!(*order.lock(), vec!["a", "b", "c", "a", "c", "a", "b", "c"]);
}

proptest! {
    #[test]
    fn job_runs_once_every_k_cycles(k in 1u32..8, cycles in 1u64..60) {
        let ctx = RuntimeContext::builder().build();
        let cycle = Duration::from_millis(10);
        let counter = Arc::new(AtomicU64::new(0));
        let mut b = PlcBuilder::new("plc", cycle);
        b.add_job("job", cycle * k, counter_job(Arc::clone(&counter))).unwrap();
        let mut program = b.build_program(&ctx).unwrap();
        program.set_mode(OperationMode::On).unwrap();
        program.set_mode(OperationMode::Started).unwrap();
        for i in 0..cycles {
            program.run_cycle(&CycleInfo::new(i, cycle)).unwrap();
        }
        prop_assert_eq!(counter.load(Ordering::Relaxed), cycles.div_ceil(u64::from(k)));
    }
}

#[test]
fn stopped_suspends_jobs_but_not_io() {
    let cycle = Duration::from_millis(10);
    let reads = Arc::new(AtomicU64::new(0));
    let mut ctx = RuntimeContext::builder();
    {
        let r = Arc::clone(&reads);
        ctx.input(InputPort::new(
            "tick",
            "plc",
            ValueBox::new("tick", 0i64),
            FnInput(move || Ok(Value::Int(r.fetch_add(1, Ordering::Relaxed) as i64))),
        ))
        .unwrap();
    }
    let ctx = ctx.build();
    let runs = Arc::new(AtomicU64::new(0));
    let mut b = PlcBuilder::new("plc", cycle);
    b.add_job("job", cycle, counter_job(Arc::clone(&runs))).unwrap();
    let mut program = b.build_program(&ctx).unwrap();

    program.set_mode(OperationMode::On).unwrap();
    program.set_mode(OperationMode::Started).unwrap();
    program.run_cycle(&CycleInfo::new(0, cycle)).unwrap();
    program.set_mode(OperationMode::Stopped).unwrap();
    program.run_cycle(&CycleInfo::new(1, cycle)).unwrap();
    program.set_mode(OperationMode::Off).unwrap();
    program.run_cycle(&CycleInfo::new(2, cycle)).unwrap();

    assert_eq!(runs.load(Ordering::Relaxed), 1);
    assert_eq!(reads.load(Ordering::Relaxed), 2);
}

#[test]
fn invalid_mode_edge_published_on_error() {
    let ctx = RuntimeContext::builder().build();
    let plc = PlcBuilder::new("plc", Duration::from_millis(10))
        .spawn(&ctx)
        .unwrap();
    let faults = Arc::new(Mutex::new(Vec::new()));
    {
        let f = Arc::clone(&faults);
        plc.topics()
            .on_error
            .subscribe(Arc::new(move |e: &Fault| f.lock().push(e.kind)))
            .unwrap();
    }
    assert!(matches!(
        plc.set_mode(OperationMode::Started),
        Err(PlcError::InvalidTransition { .. })
    ));
    assert_eq!(plc.mode(), OperationMode::Off);
    // any writer of the box goes through the same table
    assert!(plc.mode_box().write(OperationMode::Stopped).is_err());
    assert_eq!(
        *faults.lock(),
        vec![
            FaultKind::InvalidOpModeTransition,
            FaultKind::InvalidOpModeTransition
        ]
    );
    plc.cycler().shutdown(true).unwrap();
}

#[test]
fn adapter_failure_does_not_stop_the_cycle() {
    let cycle = Duration::from_millis(10);
    let mut ctx = RuntimeContext::builder();
    ctx.input(InputPort::new(
        "broken",
        "plc",
        ValueBox::new("broken", 0.0),
        FnInput(|| Err(AdapterError::NotReady("bus".into()))),
    ))
    .unwrap();
    let ctx = ctx.build();
    let runs = Arc::new(AtomicU64::new(0));
    let mut b = PlcBuilder::new("plc", cycle);
    b.add_job("job", cycle, counter_job(Arc::clone(&runs))).unwrap();
    let mut program = b.build_program(&ctx).unwrap();
    let faults = Arc::new(Mutex::new(Vec::new()));
    {
        let f = Arc::clone(&faults);
        program
            .topics()
            .on_error
            .subscribe(Arc::new(move |e: &Fault| f.lock().push((e.kind, e.origin.clone()))))
            .unwrap();
    }
    program.set_mode(OperationMode::On).unwrap();
    program.set_mode(OperationMode::Started).unwrap();
    program.run_cycle(&CycleInfo::new(0, cycle)).unwrap();

    assert_eq!(runs.load(Ordering::Relaxed), 1);
    assert_eq!(
        *faults.lock(),
        vec![(FaultKind::AdapterFailure, "broken".to_string())]
    );
}

#[test]
fn plc_feeds_a_second_unit_through_its_image() {
    let cycle = Duration::from_millis(10);
    let mut ctx = RuntimeContext::builder();
    let plc_image = ctx.image("plc", LockPolicy::WritePreferring).unwrap();
    let level = plc_image.add("level", 0.0).unwrap();
    ctx.subscribe_image("plc", "hmi").unwrap();
    let ctx = ctx.build();

    let mut b = PlcBuilder::new("plc", cycle);
    {
        let level = level.clone();
        b.add_job("fill", cycle, move |_: &CycleInfo| -> Result<(), PayloadError> {
            level.write(level.get::<f64>()? + 1.0)?;
            Ok(())
        })
        .unwrap();
    }
    let mut plc = b.build_program(&ctx).unwrap();
    let mut hmi = PlcBuilder::new("hmi", cycle).build_program(&ctx).unwrap();
    plc.set_mode(OperationMode::On).unwrap();
    plc.set_mode(OperationMode::Started).unwrap();
    hmi.set_mode(OperationMode::On).unwrap();

    let seen = ctx.receiver("hmi", "plc").unwrap().clone();
    let id = BoxId::from("level");
    plc.run_cycle(&CycleInfo::new(0, cycle)).unwrap();
    assert_eq!(seen.read(&id), Some(Value::Float(0.0)));
    hmi.run_cycle(&CycleInfo::new(0, cycle)).unwrap();
    assert_eq!(seen.read(&id), Some(Value::Float(1.0)));
    assert_eq!(seen.committed_generation(), 1);
}
