//! State machine paths driven by scripted guard outcomes.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use tandem_runtime::state::{ExitPoint, State, StateChange, StateMachine, StateRef};

/// Shared data: the next guard outcome is popped by each state's `execute`.
#[derive(Default)]
struct Panel {
    script: VecDeque<bool>,
    outcome: bool,
    log: Vec<String>,
}

impl Panel {
    fn scripted(outcomes: &[bool]) -> Self {
        Self {
            script: outcomes.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn advance(&mut self) {
        self.outcome = self.script.pop_front().unwrap_or(false);
    }
}

fn is_button1_pressed(p: &Panel) -> bool {
    p.outcome
}

fn is_timeout(p: &Panel) -> bool {
    p.outcome
}

#[derive(Default)]
struct Idle;
#[derive(Default)]
struct Ready;
#[derive(Default)]
struct Finished;

impl State<Panel> for Idle {
    fn open(&mut self, p: &mut Panel) {
        p.log.push("open Idle".into());
    }
    fn execute(&mut self, p: &mut Panel) {
        p.advance();
    }
    fn close(&mut self, p: &mut Panel) {
        p.log.push("close Idle".into());
    }
    fn exit_points(&self) -> Vec<ExitPoint<Panel>> {
        vec![ExitPoint::new(
            "is_button1_pressed",
            is_button1_pressed,
            StateRef::of::<Ready>(),
        )]
    }
}

impl State<Panel> for Ready {
    fn open(&mut self, p: &mut Panel) {
        p.log.push("open Ready".into());
    }
    fn execute(&mut self, p: &mut Panel) {
        p.advance();
    }
    fn exit_points(&self) -> Vec<ExitPoint<Panel>> {
        vec![ExitPoint::new("is_timeout", is_timeout, StateRef::of::<Finished>())]
    }
}

impl State<Panel> for Finished {
    fn open(&mut self, p: &mut Panel) {
        p.log.push("open Finished".into());
    }
    fn exit_points(&self) -> Vec<ExitPoint<Panel>> {
        Vec::new()
    }
}

fn visit(outcomes: &[bool]) -> Vec<&'static str> {
    let mut fsm = StateMachine::new("panel", StateRef::of::<Idle>()).unwrap();
    let mut panel = Panel::scripted(outcomes);
    let mut visited = vec![fsm.current()];
    for _ in 0..outcomes.len() {
        if let Some(change) = fsm.tick(&mut panel) {
            visited.push(change.to);
        }
    }
    visited
}

#[test]
fn idle_ready_finished() {
    assert_eq!(visit(&[true, false, false, true]), vec!["Idle", "Ready", "Finished"]);
}

#[test]
fn hooks_and_change_events() {
    let mut fsm = StateMachine::new("panel", StateRef::of::<Idle>()).unwrap();
    assert_eq!(fsm.states(), vec!["Idle", "Ready", "Finished"]);
    let changes = Arc::new(Mutex::new(Vec::<StateChange>::new()));
    {
        let c = Arc::clone(&changes);
        fsm.on_state_changed()
            .subscribe(Arc::new(move |e: &StateChange| c.lock().push(*e)))
            .unwrap();
    }
    let mut panel = Panel::scripted(&[true, true, false]);
    for _ in 0..3 {
        fsm.tick(&mut panel);
    }
    assert_eq!(
        panel.log,
        vec!["open Idle", "close Idle", "open Ready", "open Finished"]
    );
    let changes = changes.lock();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].exit_point, "is_button1_pressed");
    assert_eq!(changes[1].from, "Ready");
    assert_eq!(fsm.current(), "Finished");
}

#[test]
fn same_guards_same_path_on_any_thread() {
    let script: Vec<bool> = (0..64).map(|i| i % 7 == 3 || i % 11 == 5).collect();
    let expected = visit(&script);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let script = script.clone();
            thread::spawn(move || visit(&script))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), expected);
    }
}
