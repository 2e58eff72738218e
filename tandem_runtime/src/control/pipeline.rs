//! SISO controller: reconfigurator → user nodes → sentinel.
//!
//! The reconfigurator watches the sampling-time box and every parameter box
//! the nodes declare. A change marks the chain dirty; the next `execute`
//! calls `configure(ts)` on every node before processing the sample.
//!
//! The sentinel is the last node. If any node cuts the traversal short, the
//! sentinel flag stays clear and `execute` fails with `SentinelMissing`.

use super::node::{Flow, Node, NodeState, param};
use crate::cycle::{CycleInfo, CyclePayload};
use crate::error::{ControlError, PayloadError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tandem_common::pubsub::SubscriptionId;
use tandem_image::ValueBox;
use tracing::{debug, info, warn};

const SENTINEL: &str = "sentinel";

/// Watches boxes and raises a dirty flag on change.
struct Reconfigurator {
    dirty: Arc<AtomicBool>,
    watched: Vec<(ValueBox, SubscriptionId)>,
}

impl Reconfigurator {
    fn watch(boxes: Vec<ValueBox>) -> Result<Self, ControlError> {
        let dirty = Arc::new(AtomicBool::new(true));
        let mut watched: Vec<(ValueBox, SubscriptionId)> = Vec::with_capacity(boxes.len());
        for b in boxes {
            if watched.iter().any(|(w, _)| ValueBox::ptr_eq(w, &b)) {
                continue;
            }
            let flag = Arc::clone(&dirty);
            let id = b.on_change(move |_| flag.store(true, Ordering::Release))?;
            watched.push((b, id));
        }
        Ok(Self { dirty, watched })
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl Drop for Reconfigurator {
    fn drop(&mut self) {
        for (b, id) in self.watched.drain(..) {
            if let Err(e) = b.unsubscribe(id) {
                warn!("reconfigurator unsubscribe failed: {e}");
            }
        }
    }
}

/// Terminal node; records that the traversal reached the end.
struct Sentinel {
    reached: Arc<AtomicBool>,
}

impl Node for Sentinel {
    fn name(&self) -> &str {
        SENTINEL
    }

    fn execute(&mut self, _state: NodeState) -> Result<Flow, ControlError> {
        self.reached.store(true, Ordering::Release);
        Ok(Flow::Continue)
    }
}

/// A discrete-time single-input single-output controller.
pub struct SisoController {
    name: String,
    ts: ValueBox,
    nodes: Vec<Box<dyn Node>>,
    reconfigurator: Reconfigurator,
    reached: Arc<AtomicBool>,
    state: NodeState,
}

impl SisoController {
    /// Chain `nodes` between a reconfigurator watching `ts` (seconds) and a
    /// sentinel. The controller starts off.
    pub fn new(
        name: impl Into<String>,
        ts: ValueBox,
        nodes: Vec<Box<dyn Node>>,
    ) -> Result<Self, ControlError> {
        let name = name.into();
        let mut watch = vec![ts.clone()];
        for node in &nodes {
            watch.extend(node.parameters());
        }
        let reconfigurator = Reconfigurator::watch(watch)?;
        let reached = Arc::new(AtomicBool::new(false));
        let mut nodes = nodes;
        nodes.push(Box::new(Sentinel {
            reached: Arc::clone(&reached),
        }));
        info!(
            controller = %name,
            nodes = nodes.len() - 1,
            watched = reconfigurator.watched.len(),
            "controller built"
        );
        Ok(Self {
            name,
            ts,
            nodes,
            reconfigurator,
            reached,
            state: NodeState::empty(),
        })
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node names in traversal order, sentinel included.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    /// Current state flags.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// True when the last traversal reached the sentinel.
    pub fn sentinel_reached(&self) -> bool {
        self.reached.load(Ordering::Acquire)
    }

    /// Switch on (display only).
    pub fn to_on(&mut self) {
        self.set_state(NodeState::ON);
    }

    /// Switch off.
    pub fn to_off(&mut self) {
        self.set_state(NodeState::empty());
    }

    /// Close the loop.
    pub fn to_running(&mut self) {
        self.set_state(NodeState::ON | NodeState::RUNNING);
    }

    /// Open the loop but stay on.
    pub fn to_ready(&mut self) {
        self.set_state(NodeState::ON);
    }

    fn set_state(&mut self, state: NodeState) {
        if state == self.state {
            return;
        }
        debug!(controller = %self.name, from = ?self.state, to = ?state, "controller state");
        self.state = state;
        for node in &mut self.nodes {
            node.state_changed(state);
        }
    }

    /// Reconfigure if dirty, then walk the chain once.
    ///
    /// # Errors
    /// - `InvalidSamplingTime` / `InvalidParameter` from reconfiguration;
    ///   the chain stays dirty and retries on the next call.
    /// - `SentinelMissing` if a node stopped the traversal.
    /// - Box and adapter errors from nodes.
    pub fn execute(&mut self) -> Result<(), ControlError> {
        if self.reconfigurator.take_dirty() {
            if let Err(e) = self.configure() {
                self.reconfigurator.mark_dirty();
                return Err(e);
            }
        }

        self.reached.store(false, Ordering::Release);
        let mut stopped_at = None;
        for node in &mut self.nodes {
            if node.execute(self.state)? == Flow::Stop {
                stopped_at = Some(node.name().to_owned());
                break;
            }
        }

        if !self.reached.load(Ordering::Acquire) {
            let stopped_at = stopped_at.unwrap_or_else(|| SENTINEL.to_owned());
            warn!(controller = %self.name, %stopped_at, "sentinel not reached");
            return Err(ControlError::SentinelMissing {
                controller: self.name.clone(),
                stopped_at,
            });
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<(), ControlError> {
        let ts = param(&self.ts)?;
        if !(ts.is_finite() && ts > 0.0) {
            return Err(ControlError::InvalidSamplingTime(ts));
        }
        for node in &mut self.nodes {
            node.configure(ts)?;
        }
        debug!(controller = %self.name, ts, "controller reconfigured");
        Ok(())
    }
}

impl CyclePayload for SisoController {
    fn run_cycle(&mut self, _cycle: &CycleInfo) -> Result<(), PayloadError> {
        Ok(self.execute()?)
    }
}

impl std::fmt::Debug for SisoController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SisoController")
            .field("name", &self.name)
            .field("nodes", &self.node_names())
            .field("state", &self.state)
            .finish()
    }
}
