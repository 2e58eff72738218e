//! IO system: ports binding boxes to device adapters.
//!
//! Built once during setup through [`IoSystemBuilder`], immutable afterwards.
//! Every port belongs to one control unit; a PLC fans out over its unit's
//! ports once per cycle (inputs before logic, outputs after).
//!
//! # Adapter Contracts
//!
//! | Trait | Called | Direction |
//! |-------|--------|-----------|
//! | [`InputAdapter::read_port`] | once per cycle per input port | hardware → box |
//! | [`OutputAdapter::write_port`] | once per cycle per output port | box → hardware |
//! | [`MotorDriver`] | through [`MotorOutput`] ports | box → motor |
//! | [`Sensor`] | through [`SensorInput`] ports | sensor → box |

use crate::error::{AdapterError, PortDirection, PortError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tandem_image::{Value, ValueBox};
use tracing::{debug, info};

// ─── Adapter traits ─────────────────────────────────────────────────

/// Hardware-facing source of values for an input port.
pub trait InputAdapter: Send {
    /// Produce the current hardware value.
    fn read_port(&mut self) -> Result<Value, AdapterError>;
}

/// Hardware-facing sink of values for an output port.
pub trait OutputAdapter: Send {
    /// Push `value` to the hardware.
    fn write_port(&mut self, value: &Value) -> Result<(), AdapterError>;
}

/// Driver status reported to a motor driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Outputs may drive the motors.
    Enabled,
    /// Outputs must stay at zero.
    Disabled,
    /// A fault was detected upstream.
    Fault,
}

/// Differential motor driver. Speeds are percent in `[-100, 100]`.
pub trait MotorDriver: Send {
    /// Command both motor speeds.
    fn set_speed_percent(&mut self, left: f64, right: f64) -> Result<(), AdapterError>;
    /// Last commanded speeds.
    fn speed_percent(&self) -> (f64, f64);
    /// Status notification.
    fn status_change(&mut self, status: DriverStatus);
}

/// Sensor refreshed once per cycle.
pub trait Sensor: Send {
    /// Refresh internal state from the device.
    fn execute(&mut self) -> Result<(), AdapterError>;
    /// Latest measurement.
    fn value(&self) -> Value;
}

/// Closure-backed input adapter.
pub struct FnInput<F>(pub F);

impl<F> InputAdapter for FnInput<F>
where
    F: FnMut() -> Result<Value, AdapterError> + Send,
{
    fn read_port(&mut self) -> Result<Value, AdapterError> {
        (self.0)()
    }
}

/// Closure-backed output adapter.
pub struct FnOutput<F>(pub F);

impl<F> OutputAdapter for FnOutput<F>
where
    F: FnMut(&Value) -> Result<(), AdapterError> + Send,
{
    fn write_port(&mut self, value: &Value) -> Result<(), AdapterError> {
        (self.0)(value)
    }
}

/// Input adapter that refreshes a [`Sensor`] and reads its value.
pub struct SensorInput<S>(pub S);

impl<S: Sensor> InputAdapter for SensorInput<S> {
    fn read_port(&mut self) -> Result<Value, AdapterError> {
        self.0.execute()?;
        Ok(self.0.value())
    }
}

/// Motor side driven by a [`MotorOutput`] port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorSide {
    /// Left wheel.
    Left,
    /// Right wheel.
    Right,
}

/// Output adapter driving one side of a shared motor driver.
///
/// An out-of-range speed reports [`DriverStatus::Fault`] to the driver; the
/// next accepted speed reports [`DriverStatus::Enabled`] again.
pub struct MotorOutput {
    driver: Arc<Mutex<Box<dyn MotorDriver>>>,
    side: MotorSide,
    faulted: bool,
}

impl MotorOutput {
    /// Speed range accepted by motor drivers.
    pub const RANGE: (f64, f64) = (-100.0, 100.0);

    /// Adapter for `side` of `driver`.
    pub fn new(driver: Arc<Mutex<Box<dyn MotorDriver>>>, side: MotorSide) -> Self {
        Self {
            driver,
            side,
            faulted: false,
        }
    }

    fn report(&mut self, driver: &mut dyn MotorDriver, faulted: bool) {
        if faulted != self.faulted {
            self.faulted = faulted;
            let status = if faulted {
                DriverStatus::Fault
            } else {
                DriverStatus::Enabled
            };
            debug!(side = ?self.side, ?status, "motor driver status");
            driver.status_change(status);
        }
    }
}

impl OutputAdapter for MotorOutput {
    fn write_port(&mut self, value: &Value) -> Result<(), AdapterError> {
        let speed = value
            .as_f64()
            .ok_or_else(|| AdapterError::Unsupported(format!("motor speed {value:?}")))?;
        let (min, max) = Self::RANGE;
        let driver = Arc::clone(&self.driver);
        let mut driver = driver.lock();
        if !(min..=max).contains(&speed) {
            self.report(&mut **driver, true);
            return Err(AdapterError::OutOfRange {
                value: speed,
                min,
                max,
            });
        }
        self.report(&mut **driver, false);
        let (left, right) = driver.speed_percent();
        match self.side {
            MotorSide::Left => driver.set_speed_percent(speed, right),
            MotorSide::Right => driver.set_speed_percent(left, speed),
        }
    }
}

// ─── Ports ──────────────────────────────────────────────────────────

/// Input port: adapter → box.
pub struct InputPort {
    name: String,
    unit: String,
    value: ValueBox,
    adapter: Mutex<Box<dyn InputAdapter>>,
}

impl InputPort {
    /// Bind `adapter` to `value` for control unit `unit`.
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        value: ValueBox,
        adapter: impl InputAdapter + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            value,
            adapter: Mutex::new(Box::new(adapter)),
        }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning control unit.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Bound box.
    pub fn value(&self) -> &ValueBox {
        &self.value
    }

    /// Read the adapter and write the result into the box.
    pub fn read(&self) -> Result<(), PortError> {
        let value = self
            .adapter
            .lock()
            .read_port()
            .map_err(|source| PortError::Adapter {
                port: self.name.clone(),
                direction: PortDirection::In,
                source,
            })?;
        self.value.write(value).map_err(|source| PortError::Box {
            port: self.name.clone(),
            source,
        })
    }
}

/// Output port: box → adapter.
pub struct OutputPort {
    name: String,
    unit: String,
    value: ValueBox,
    adapter: Mutex<Box<dyn OutputAdapter>>,
}

impl OutputPort {
    /// Bind `value` to `adapter` for control unit `unit`.
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        value: ValueBox,
        adapter: impl OutputAdapter + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            value,
            adapter: Mutex::new(Box::new(adapter)),
        }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning control unit.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Bound box.
    pub fn value(&self) -> &ValueBox {
        &self.value
    }

    /// Push the box's current value to the adapter.
    pub fn write(&self) -> Result<(), PortError> {
        let value = self.value.read();
        self.adapter
            .lock()
            .write_port(&value)
            .map_err(|source| PortError::Adapter {
                port: self.name.clone(),
                direction: PortDirection::Out,
                source,
            })
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("box", self.value.id())
            .finish()
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("box", self.value.id())
            .finish()
    }
}

// ─── IO System ──────────────────────────────────────────────────────

/// Collects ports during setup.
#[derive(Debug, Default)]
pub struct IoSystemBuilder {
    names: HashSet<String>,
    inputs: Vec<Arc<InputPort>>,
    outputs: Vec<Arc<OutputPort>>,
}

impl IoSystemBuilder {
    /// Register an input port.
    pub fn input(&mut self, port: InputPort) -> Result<&mut Self, PortError> {
        self.claim(&port.name)?;
        self.inputs.push(Arc::new(port));
        Ok(self)
    }

    /// Register an output port.
    pub fn output(&mut self, port: OutputPort) -> Result<&mut Self, PortError> {
        self.claim(&port.name)?;
        self.outputs.push(Arc::new(port));
        Ok(self)
    }

    fn claim(&mut self, name: &str) -> Result<(), PortError> {
        if !self.names.insert(name.to_owned()) {
            return Err(PortError::Duplicate(name.to_owned()));
        }
        debug!(port = name, "port registered");
        Ok(())
    }

    /// Freeze the registry.
    pub fn build(self) -> IoSystem {
        info!(
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "io system built"
        );
        IoSystem {
            inputs: self.inputs,
            outputs: self.outputs,
        }
    }
}

/// Immutable port registry.
#[derive(Debug, Default)]
pub struct IoSystem {
    inputs: Vec<Arc<InputPort>>,
    outputs: Vec<Arc<OutputPort>>,
}

impl IoSystem {
    /// Start collecting ports.
    pub fn builder() -> IoSystemBuilder {
        IoSystemBuilder::default()
    }

    /// Input ports of `unit`, in registration order.
    pub fn inputs_for(&self, unit: &str) -> Vec<Arc<InputPort>> {
        self.inputs
            .iter()
            .filter(|p| p.unit == unit)
            .cloned()
            .collect()
    }

    /// Output ports of `unit`, in registration order.
    pub fn outputs_for(&self, unit: &str) -> Vec<Arc<OutputPort>> {
        self.outputs
            .iter()
            .filter(|p| p.unit == unit)
            .cloned()
            .collect()
    }

    /// Input port by name.
    pub fn input(&self, name: &str) -> Option<&Arc<InputPort>> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Output port by name.
    pub fn output(&self, name: &str) -> Option<&Arc<OutputPort>> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Read every input port, then write every output port.
    ///
    /// Failures do not stop the fan-out; they are returned in port order.
    pub fn execute(&self) -> Vec<PortError> {
        let mut failures = read_all(&self.inputs);
        failures.extend(write_all(&self.outputs));
        failures
    }
}

/// Read `ports`, collecting failures.
pub fn read_all(ports: &[Arc<InputPort>]) -> Vec<PortError> {
    ports.iter().filter_map(|p| p.read().err()).collect()
}

/// Write `ports`, collecting failures.
pub fn write_all(ports: &[Arc<OutputPort>]) -> Vec<PortError> {
    ports.iter().filter_map(|p| p.write().err()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeDriver {
        speeds: (f64, f64),
        statuses: Arc<Mutex<Vec<DriverStatus>>>,
    }

    impl MotorDriver for FakeDriver {
        fn set_speed_percent(&mut self, left: f64, right: f64) -> Result<(), AdapterError> {
            self.speeds = (left, right);
            Ok(())
        }
        fn speed_percent(&self) -> (f64, f64) {
            self.speeds
        }
        fn status_change(&mut self, status: DriverStatus) {
            self.statuses.lock().push(status);
        }
    }

    #[test]
    fn input_port_writes_box() {
        let b = ValueBox::new("distance", 0.0);
        let port = InputPort::new("uss", "plc", b.clone(), FnInput(|| Ok(Value::Float(0.42))));
        port.read().unwrap();
        assert_eq!(b.read(), Value::Float(0.42));
    }

    #[test]
    fn input_port_reports_box_mismatch() {
        let b = ValueBox::new("flag", false);
        let port = InputPort::new("bad", "plc", b, FnInput(|| Ok(Value::Float(1.0))));
        assert!(matches!(port.read(), Err(PortError::Box { .. })));
    }

    #[test]
    fn motor_output_drives_one_side() {
        let fake = FakeDriver::default();
        let statuses = Arc::clone(&fake.statuses);
        let driver: Arc<Mutex<Box<dyn MotorDriver>>> = Arc::new(Mutex::new(Box::new(fake)));
        let left = ValueBox::new("left", 0.0);
        let right = ValueBox::new("right", 0.0);
        let mut io = IoSystem::builder();
        io.output(OutputPort::new(
            "m_left",
            "plc",
            left.clone(),
            MotorOutput::new(Arc::clone(&driver), MotorSide::Left),
        ))
        .unwrap();
        io.output(OutputPort::new(
            "m_right",
            "plc",
            right.clone(),
            MotorOutput::new(Arc::clone(&driver), MotorSide::Right),
        ))
        .unwrap();
        let io = io.build();

        left.write(30.0).unwrap();
        right.write(-20.0).unwrap();
        assert!(io.execute().is_empty());
        assert_eq!(driver.lock().speed_percent(), (30.0, -20.0));

        left.write(150.0).unwrap();
        let failures = io.execute();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].port(), "m_left");
        assert_eq!(driver.lock().speed_percent(), (30.0, -20.0));
        assert!(!io.execute().is_empty());
        assert_eq!(*statuses.lock(), vec![DriverStatus::Fault]);

        left.write(10.0).unwrap();
        assert!(io.execute().is_empty());
        assert_eq!(driver.lock().speed_percent(), (10.0, -20.0));
        assert_eq!(
            *statuses.lock(),
            vec![DriverStatus::Fault, DriverStatus::Enabled]
        );
    }

    #[test]
    fn duplicate_port_rejected() {
        let mut io = IoSystem::builder();
        let b = ValueBox::new("x", 0.0);
        io.input(InputPort::new("p", "u", b.clone(), FnInput(|| Ok(Value::Float(0.0)))))
            .unwrap();
        assert!(matches!(
            io.output(OutputPort::new("p", "u", b, FnOutput(|_: &Value| Ok(())))),
            Err(PortError::Duplicate(_))
        ));
    }

    #[test]
    fn ports_filtered_by_unit() {
        let mut io = IoSystem::builder();
        for (name, unit) in [("a", "u1"), ("b", "u2"), ("c", "u1")] {
            io.input(InputPort::new(
                name,
                unit,
                ValueBox::new(name, 0.0),
                FnInput(|| Ok(Value::Float(1.0))),
            ))
            .unwrap();
        }
        let io = io.build();
        let names: Vec<_> = io.inputs_for("u1").iter().map(|p| p.name().to_owned()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(io.input("b").is_some());
        assert!(io.output("b").is_none());
    }
}
