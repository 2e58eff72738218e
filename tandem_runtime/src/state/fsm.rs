//! Deterministic finite state machine with guarded exit points.
//!
//! States are instantiated once per machine: construction walks the exit
//! points from the initial state (depth first) and creates every reachable
//! state. Transitions carry the target's name, resolved to an arena index.
//!
//! ## Tick
//! 1. `open` if the state was just entered.
//! 2. `execute`.
//! 3. Evaluate exit points in order; the first true guard wins: `close`,
//!    switch, publish `on_state_changed`. `open` of the new state runs on
//!    the next tick.

use crate::error::FsmError;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use tandem_common::pubsub::Publisher;
use tracing::{debug, info};

/// Guard predicate of an exit point.
pub type GuardFn<D> = Box<dyn FnMut(&D) -> bool + Send>;

/// Behaviour of one FSM state over shared data `D`.
pub trait State<D>: Send {
    /// Called once on entry.
    fn open(&mut self, _data: &mut D) {}

    /// Called every tick while active.
    fn execute(&mut self, _data: &mut D) {}

    /// Called once on exit.
    fn close(&mut self, _data: &mut D) {}

    /// Ordered exit points. Queried once, when the machine is built.
    fn exit_points(&self) -> Vec<ExitPoint<D>>;
}

/// Name and factory of a state type.
pub struct StateRef<D> {
    name: &'static str,
    type_id: TypeId,
    build: fn() -> Box<dyn State<D>>,
}

fn build_state<S, D>() -> Box<dyn State<D>>
where
    S: State<D> + Default + 'static,
    D: 'static,
{
    Box::new(S::default())
}

impl<D: 'static> StateRef<D> {
    /// Reference to state type `S`, named after the type.
    pub fn of<S: State<D> + Default + 'static>() -> Self {
        let full = std::any::type_name::<S>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self::named::<S>(name)
    }

    /// Reference to state type `S` under an explicit name.
    pub fn named<S: State<D> + Default + 'static>(name: &'static str) -> Self {
        Self {
            name,
            type_id: TypeId::of::<S>(),
            build: build_state::<S, D>,
        }
    }

    /// State name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<D> Clone for StateRef<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for StateRef<D> {}

impl<D> fmt::Debug for StateRef<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateRef").field(&self.name).finish()
    }
}

/// A guarded transition to `target`.
pub struct ExitPoint<D> {
    name: &'static str,
    guard: GuardFn<D>,
    target: StateRef<D>,
}

impl<D> ExitPoint<D> {
    /// Exit point `name` leading to `target` when `guard` holds.
    pub fn new<G>(name: &'static str, guard: G, target: StateRef<D>) -> Self
    where
        G: FnMut(&D) -> bool + Send + 'static,
    {
        Self {
            name,
            guard: Box::new(guard),
            target,
        }
    }
}

impl<D> fmt::Debug for ExitPoint<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitPoint")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish()
    }
}

/// A transition that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State left.
    pub from: &'static str,
    /// State entered.
    pub to: &'static str,
    /// Exit point that fired.
    pub exit_point: &'static str,
}

struct Exit<D> {
    name: &'static str,
    guard: GuardFn<D>,
    target: usize,
}

struct Slot<D> {
    name: &'static str,
    state: Box<dyn State<D>>,
    exits: Vec<Exit<D>>,
}

/// A state machine over data `D`.
pub struct StateMachine<D> {
    name: String,
    slots: Vec<Slot<D>>,
    current: usize,
    entry_pending: bool,
    on_state_changed: Publisher<StateChange>,
}

impl<D: 'static> StateMachine<D> {
    /// Instantiate every state reachable from `initial`.
    ///
    /// # Errors
    /// `ConflictingState` if two different state types share a name.
    pub fn new(name: impl Into<String>, initial: StateRef<D>) -> Result<Self, FsmError> {
        let name = name.into();
        let mut index: HashMap<&'static str, (usize, TypeId)> = HashMap::new();
        let mut built: Vec<(&'static str, Box<dyn State<D>>, Vec<ExitPoint<D>>)> = Vec::new();
        let mut stack = vec![initial];

        while let Some(next) = stack.pop() {
            match index.get(next.name) {
                Some((_, type_id)) if *type_id == next.type_id => continue,
                Some(_) => {
                    return Err(FsmError::ConflictingState {
                        machine: name,
                        state: next.name,
                    });
                }
                None => {}
            }
            let state = (next.build)();
            let exits = state.exit_points();
            // Reverse so the first exit point's target is visited first.
            stack.extend(exits.iter().rev().map(|e| e.target));
            index.insert(next.name, (built.len(), next.type_id));
            built.push((next.name, state, exits));
        }

        let slots = built
            .into_iter()
            .map(|(state_name, state, exits)| Slot {
                name: state_name,
                state,
                exits: exits
                    .into_iter()
                    .filter_map(|e| {
                        let (target, _) = *index.get(e.target.name)?;
                        Some(Exit {
                            name: e.name,
                            guard: e.guard,
                            target,
                        })
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        info!(fsm = %name, states = slots.len(), initial = initial.name, "state machine built");
        Ok(Self {
            on_state_changed: Publisher::new(format!("{name}.on_state_changed")),
            name,
            slots,
            current: 0,
            entry_pending: true,
        })
    }

    /// Machine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the active state.
    pub fn current(&self) -> &'static str {
        self.slots[self.current].name
    }

    /// Names of all instantiated states, initial first.
    pub fn states(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.name).collect()
    }

    /// Transition channel.
    pub fn on_state_changed(&self) -> &Publisher<StateChange> {
        &self.on_state_changed
    }

    /// Run one tick; returns the transition that fired, if any.
    pub fn tick(&mut self, data: &mut D) -> Option<StateChange> {
        let slot = &mut self.slots[self.current];
        if std::mem::take(&mut self.entry_pending) {
            slot.state.open(data);
        }
        slot.state.execute(data);

        let (exit_point, target) = slot
            .exits
            .iter_mut()
            .find_map(|exit| (exit.guard)(data).then_some((exit.name, exit.target)))?;

        slot.state.close(data);
        let change = StateChange {
            from: slot.name,
            to: self.slots[target].name,
            exit_point,
        };
        self.current = target;
        self.entry_pending = true;
        debug!(fsm = %self.name, from = change.from, to = change.to, exit_point, "state changed");
        self.on_state_changed.publish_or_log(&change);
        Some(change)
    }
}

impl<D> fmt::Debug for StateMachine<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("current", &self.slots[self.current].name)
            .field("states", &self.slots.len())
            .finish()
    }
}
