//! Controller pipeline: discrete SISO controllers built from nodes.
//!
//! ```text
//! reconfigurator ─► filter ─► summing point ─► algorithm ─► actuator ─► publisher ─► sentinel
//! ```
//!
//! Every node reads and writes boxes, so any stage can be observed or fed
//! from an image. The node list is walked by [`SisoController`]; nodes only
//! decide whether the traversal continues.

pub mod algorithm;
pub mod filters;
pub mod node;
pub mod nodes;
pub mod pipeline;

pub use algorithm::{DifferenceEquation, Lead, P, Pi, Pid, Pidt1, Pt1, Pt1Pt1};
pub use filters::{LowPass, MovingAverage, SignalFilter};
pub use node::{Flow, Node, NodeState};
pub use nodes::{Actuator, AlgorithmNode, FilterNode, PublisherNode, SummingPoint};
pub use pipeline::SisoController;
