//! Control node catalog.

use super::algorithm::DifferenceEquation;
use super::filters::SignalFilter;
use super::node::{Flow, Node, NodeState, param};
use crate::error::ControlError;
use crate::io::OutputAdapter;
use tandem_image::{Value, ValueBox};

/// `e ← w − y`.
#[derive(Debug)]
pub struct SummingPoint {
    w: ValueBox,
    y: ValueBox,
    e: ValueBox,
}

impl SummingPoint {
    /// Setpoint `w`, measurement `y`, error output `e`.
    pub fn new(w: ValueBox, y: ValueBox, e: ValueBox) -> Self {
        Self { w, y, e }
    }
}

impl Node for SummingPoint {
    fn name(&self) -> &str {
        "summing_point"
    }

    fn execute(&mut self, _state: NodeState) -> Result<Flow, ControlError> {
        self.e.write(param(&self.w)? - param(&self.y)?)?;
        Ok(Flow::Continue)
    }
}

/// `u ← f(e)`; integrates only while running, holds `u = 0` otherwise.
pub struct AlgorithmNode {
    algorithm: Box<dyn DifferenceEquation>,
    e: ValueBox,
    u: ValueBox,
}

impl AlgorithmNode {
    /// Algorithm reading `e` and writing `u`.
    pub fn new(algorithm: impl DifferenceEquation + 'static, e: ValueBox, u: ValueBox) -> Self {
        Self {
            algorithm: Box::new(algorithm),
            e,
            u,
        }
    }
}

impl Node for AlgorithmNode {
    fn name(&self) -> &str {
        self.algorithm.name()
    }

    fn parameters(&self) -> Vec<ValueBox> {
        self.algorithm.parameters()
    }

    fn configure(&mut self, ts: f64) -> Result<(), ControlError> {
        self.algorithm.configure(ts)
    }

    fn execute(&mut self, state: NodeState) -> Result<Flow, ControlError> {
        let u = if state.contains(NodeState::RUNNING) {
            self.algorithm.step(param(&self.e)?)
        } else {
            0.0
        };
        self.u.write(u)?;
        Ok(Flow::Continue)
    }

    fn state_changed(&mut self, state: NodeState) {
        if !state.contains(NodeState::RUNNING) {
            self.algorithm.reset();
        }
    }
}

impl std::fmt::Debug for AlgorithmNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmNode")
            .field("algorithm", &self.algorithm.name())
            .field("e", self.e.id())
            .field("u", self.u.id())
            .finish()
    }
}

/// Pushes `u` to an output adapter; zero while the controller is off.
///
/// Clipping belongs on the `u` box (a clipper plugin), so the adapter only
/// ever sees the saturated value.
pub struct Actuator {
    u: ValueBox,
    adapter: Box<dyn OutputAdapter>,
}

impl Actuator {
    /// Actuator driving `adapter` from box `u`.
    pub fn new(u: ValueBox, adapter: impl OutputAdapter + 'static) -> Self {
        Self {
            u,
            adapter: Box::new(adapter),
        }
    }
}

impl Node for Actuator {
    fn name(&self) -> &str {
        "actuator"
    }

    fn execute(&mut self, state: NodeState) -> Result<Flow, ControlError> {
        let value = if state.contains(NodeState::ON) {
            self.u.read()
        } else {
            Value::Float(0.0)
        };
        self.adapter.write_port(&value)?;
        Ok(Flow::Continue)
    }
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator").field("u", self.u.id()).finish()
    }
}

/// Copies signal boxes into observation boxes.
#[derive(Debug, Default)]
pub struct PublisherNode {
    routes: Vec<(ValueBox, ValueBox)>,
}

impl PublisherNode {
    /// Empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `source` into `target` every sample.
    pub fn route(mut self, source: ValueBox, target: ValueBox) -> Self {
        self.routes.push((source, target));
        self
    }
}

impl Node for PublisherNode {
    fn name(&self) -> &str {
        "publisher"
    }

    fn execute(&mut self, _state: NodeState) -> Result<Flow, ControlError> {
        for (source, target) in &self.routes {
            target.copy_from(source)?;
        }
        Ok(Flow::Continue)
    }
}

/// Filters a raw measurement into the box the summing point reads.
pub struct FilterNode {
    filter: Box<dyn SignalFilter>,
    input: ValueBox,
    output: ValueBox,
    ts: f64,
}

impl FilterNode {
    /// Filter `input` into `output`.
    pub fn new(filter: impl SignalFilter + 'static, input: ValueBox, output: ValueBox) -> Self {
        Self {
            filter: Box::new(filter),
            input,
            output,
            ts: 0.0,
        }
    }
}

impl Node for FilterNode {
    fn name(&self) -> &str {
        "filter"
    }

    fn configure(&mut self, ts: f64) -> Result<(), ControlError> {
        self.ts = ts;
        Ok(())
    }

    fn execute(&mut self, _state: NodeState) -> Result<Flow, ControlError> {
        let y = self.filter.apply(param(&self.input)?, self.ts);
        self.output.write(y)?;
        Ok(Flow::Continue)
    }
}

impl std::fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterNode")
            .field("input", self.input.id())
            .field("output", self.output.id())
            .field("value", &self.filter.value())
            .finish()
    }
}
