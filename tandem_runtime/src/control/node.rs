//! Node contract of the controller pipeline.

use crate::error::ControlError;
use bitflags::bitflags;
use tandem_image::ValueBox;

bitflags! {
    /// Controller state flags broadcast to every node.
    ///
    /// `ON` without `RUNNING` is "display only": measurements and errors are
    /// updated, algorithms do not integrate and actuators hold zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeState: u8 {
        /// Controller switched on.
        const ON      = 0x01;
        /// Closed loop active.
        const RUNNING = 0x02;
    }
}

/// Whether the traversal continues past a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Hand over to the next node.
    Continue,
    /// Cut the traversal short. The controller reports the sentinel missing.
    Stop,
}

/// One stage of a SISO controller.
///
/// The controller walks the node list itself; a node only decides whether
/// the traversal continues.
pub trait Node: Send {
    /// Node name used in diagnostics.
    fn name(&self) -> &str;

    /// Boxes whose change requires `configure` to run again.
    fn parameters(&self) -> Vec<ValueBox> {
        Vec::new()
    }

    /// Recompute coefficients for sampling time `ts` (seconds).
    fn configure(&mut self, _ts: f64) -> Result<(), ControlError> {
        Ok(())
    }

    /// Process one sample.
    fn execute(&mut self, state: NodeState) -> Result<Flow, ControlError>;

    /// Controller state changed.
    fn state_changed(&mut self, _state: NodeState) {}
}

/// Read a float parameter box.
pub(crate) fn param(b: &ValueBox) -> Result<f64, ControlError> {
    Ok(b.get::<f64>()?)
}
