//! Controller chains driven through boxes.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tandem_common::fault::{Fault, FaultKind};
use tandem_image::{Clipper, Plugin, Value, ValueBox};
use tandem_runtime::control::{
    Actuator, AlgorithmNode, Flow, Node, NodeState, Pi, Pidt1, PublisherNode, SisoController,
    SummingPoint,
};
use tandem_runtime::io::FnOutput;
use tandem_runtime::{ControlError, Cycler, CyclerOptions};

struct Loop {
    w: ValueBox,
    y: ValueBox,
    u: ValueBox,
    u_display: ValueBox,
}

fn pi_loop(kp: f64, ki: f64, ts: f64) -> (SisoController, Loop) {
    let l = Loop {
        w: ValueBox::with_meta("w", 0.0, "setpoint", "m"),
        y: ValueBox::with_meta("y", 0.0, "measurement", "m"),
        u: ValueBox::with_meta("u", 0.0, "actuating value", "%"),
        u_display: ValueBox::new("u_display", 0.0),
    };
    let e = ValueBox::new("e", 0.0);
    let nodes: Vec<Box<dyn Node>> = vec![
        Box::new(SummingPoint::new(l.w.clone(), l.y.clone(), e.clone())),
        Box::new(AlgorithmNode::new(
            Pi::new(ValueBox::new("Kp", kp), ValueBox::new("Ki", ki)),
            e,
            l.u.clone(),
        )),
        Box::new(PublisherNode::new().route(l.u.clone(), l.u_display.clone())),
    ];
    let c = SisoController::new("pi", ValueBox::new("Ts", ts), nodes).unwrap();
    (c, l)
}

#[test]
fn pi_step_response_integrates() {
    let (mut c, l) = pi_loop(100.0, 0.01, 0.1);
    l.w.write(1.0).unwrap();
    c.to_running();

    let mut trace = Vec::new();
    for _ in 0..30 {
        c.execute().unwrap();
        trace.push(l.u.get::<f64>().unwrap());
    }
    assert!(trace.windows(2).all(|w| w[1] > w[0]), "{trace:?}");
    assert!(trace.iter().all(|u| *u >= 0.0));
    assert!(trace[29] > trace[9]);
    assert_eq!(l.u_display.get::<f64>().unwrap(), trace[29]);
}

#[test]
fn display_only_holds_zero_output() {
    let (mut c, l) = pi_loop(2.0, 1.0, 0.1);
    l.w.write(1.0).unwrap();
    c.to_on();
    for _ in 0..5 {
        c.execute().unwrap();
    }
    assert_eq!(l.u.get::<f64>().unwrap(), 0.0);
    c.to_running();
    c.execute().unwrap();
    assert!(l.u.get::<f64>().unwrap() > 0.0);
}

struct Forgetful;

impl Node for Forgetful {
    fn name(&self) -> &str {
        "forgetful"
    }
    fn execute(&mut self, _state: NodeState) -> Result<Flow, ControlError> {
        Ok(Flow::Stop)
    }
}

#[test]
fn cut_traversal_surfaces_sentinel_missing() {
    let (mut c, _) = pi_loop(1.0, 0.0, 0.1);
    c.execute().unwrap();
    assert!(c.sentinel_reached());

    let mut broken = SisoController::new(
        "broken",
        ValueBox::new("Ts", 0.1),
        vec![Box::new(Forgetful)],
    )
    .unwrap();
    let err = broken.execute().unwrap_err();
    assert!(matches!(
        &err,
        ControlError::SentinelMissing { stopped_at, .. } if stopped_at == "forgetful"
    ));
    assert_eq!(err.fault_kind(), FaultKind::SentinelMissing);
    assert!(!broken.sentinel_reached());
}

#[test]
fn anti_windup_with_clipped_actuator() {
    let w = ValueBox::new("w", 10.0);
    let y = ValueBox::new("y", 0.0);
    let e = ValueBox::new("e", 0.0);
    let u = ValueBox::new("u", 0.0);
    let clipper = Clipper::new(-1.0, 1.0).unwrap();
    let saturated = clipper.saturation_flag();
    u.attach(Plugin::Clipper(clipper)).unwrap();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&sent);
    let nodes: Vec<Box<dyn Node>> = vec![
        Box::new(SummingPoint::new(w.clone(), y, e.clone())),
        Box::new(AlgorithmNode::new(
            Pidt1::with_anti_windup(
                ValueBox::new("Kp", 0.1),
                ValueBox::new("Ki", 1.0),
                ValueBox::new("Kd", 0.0),
                ValueBox::new("T1", 0.0),
                Arc::clone(&saturated),
            ),
            e,
            u.clone(),
        )),
        Box::new(Actuator::new(
            u.clone(),
            FnOutput(move |v: &Value| {
                s.lock().push(v.as_f64().unwrap_or(f64::NAN));
                Ok(())
            }),
        )),
    ];
    let mut c = SisoController::new("aw", ValueBox::new("Ts", 0.1), nodes).unwrap();
    c.to_running();
    for _ in 0..20 {
        c.execute().unwrap();
    }
    assert!(saturated.load(Ordering::Acquire));
    assert!(sent.lock().iter().all(|v| v.abs() <= 1.0));

    // the frozen integrator lets the output leave saturation on the first
    // sample after the error reverses
    w.write(-10.0).unwrap();
    c.execute().unwrap();
    assert!((u.get::<f64>().unwrap() + 0.5).abs() < 1e-9);
    assert!(!saturated.load(Ordering::Acquire));
}

#[test]
fn controller_runs_on_a_cycler() {
    let (c, l) = pi_loop(1.0, 0.0, 0.01);
    l.w.write(2.0).unwrap();
    let faults = Arc::new(Mutex::new(Vec::<Fault>::new()));
    let mut c = c;
    c.to_running();
    let cycler = Cycler::spawn("ctrl", Duration::from_millis(10), CyclerOptions::default(), c)
        .unwrap();
    {
        let f = Arc::clone(&faults);
        cycler
            .topics()
            .on_error
            .subscribe(Arc::new(move |e: &Fault| f.lock().push(e.clone())))
            .unwrap();
    }
    cycler.start(true).unwrap();
    thread::sleep(Duration::from_millis(100));
    cycler.shutdown(true).unwrap();
    assert!(faults.lock().is_empty());
    assert_eq!(l.u.get::<f64>().unwrap(), 2.0);
}
