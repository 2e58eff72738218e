//! Box plugin chain elements.
//!
//! A plugin transforms or observes the value on its way into a box. The
//! chain runs left to right inside [`ValueBox::write`](crate::ValueBox::write)
//! in two passes. [`Plugin::process`] computes every output without touching
//! shared state; once the whole chain accepted the value, the box commits
//! the side effects of each step. Edge events fire before the new value
//! becomes visible to box subscribers, and a rejected write leaves no trace.

use crate::error::BoxError;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tandem_common::pubsub::Publisher;

/// Range edge published by [`Clipper`] and [`Guard`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeEvent {
    /// Input just left `[min, max]`.
    OutOfRange {
        /// Raw input value.
        value: f64,
    },
    /// Input just re-entered `[min, max]`.
    BackInRange {
        /// Raw input value.
        value: f64,
    },
}

/// Identity transform that publishes every changed value on its own channel.
pub struct Monitor {
    channel: Arc<Publisher<Value>>,
    last: Option<Value>,
}

impl Monitor {
    /// Create a monitor with a named channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            channel: Arc::new(Publisher::new(name)),
            last: None,
        }
    }

    /// Change channel.
    pub fn channel(&self) -> Arc<Publisher<Value>> {
        Arc::clone(&self.channel)
    }

    fn commit(&mut self, output: &Value) {
        if self.last.as_ref() != Some(output) {
            self.last = Some(output.clone());
            self.channel.publish_or_log(output);
        }
    }
}

/// Edge detector shared by clipper and guard.
struct RangeWatch {
    min: f64,
    max: f64,
    outside: Arc<AtomicBool>,
    events: Arc<Publisher<RangeEvent>>,
}

impl RangeWatch {
    fn new(name: String, min: f64, max: f64) -> Result<Self, BoxError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(BoxError::InvalidPlugin(format!(
                "{name}: min {min} must not exceed max {max}"
            )));
        }
        Ok(Self {
            min,
            max,
            outside: Arc::new(AtomicBool::new(false)),
            events: Arc::new(Publisher::new(name)),
        })
    }

    /// Whether `x` is out of range. NaN has no place in a range and is
    /// rejected.
    fn classify(&self, x: f64) -> Result<bool, String> {
        if x.is_nan() {
            return Err("NaN input".into());
        }
        Ok(x < self.min || x > self.max)
    }

    /// Record the accepted input `x`, publishing an edge if the state flips.
    fn commit(&self, input: &Value) {
        let Some(x) = input.as_f64() else { return };
        let out = x < self.min || x > self.max;
        if out != self.outside.swap(out, Ordering::AcqRel) {
            let event = if out {
                RangeEvent::OutOfRange { value: x }
            } else {
                RangeEvent::BackInRange { value: x }
            };
            self.events.publish_or_log(&event);
        }
    }
}

/// Saturates numeric values to `[min, max]` and publishes range edges.
pub struct Clipper {
    watch: RangeWatch,
}

impl Clipper {
    /// # Errors
    /// `InvalidPlugin` if `min > max` or a bound is NaN.
    pub fn new(min: f64, max: f64) -> Result<Self, BoxError> {
        Ok(Self {
            watch: RangeWatch::new("clipper".into(), min, max)?,
        })
    }

    /// Edge event channel.
    pub fn events(&self) -> Arc<Publisher<RangeEvent>> {
        Arc::clone(&self.watch.events)
    }

    /// Shared flag, `true` while the last input was saturated.
    pub fn saturation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.watch.outside)
    }

    /// Bounds.
    pub fn bounds(&self) -> (f64, f64) {
        (self.watch.min, self.watch.max)
    }

    fn process(&self, value: Value) -> Result<Value, String> {
        let x = value.as_f64().ok_or("non-numeric value")?;
        if self.watch.classify(x)? {
            Ok(value.with_f64(x.clamp(self.watch.min, self.watch.max)))
        } else {
            Ok(value)
        }
    }
}

/// Publishes range edges without altering the value.
pub struct Guard {
    watch: RangeWatch,
}

impl Guard {
    /// # Errors
    /// `InvalidPlugin` if `min > max` or a bound is NaN.
    pub fn new(min: f64, max: f64) -> Result<Self, BoxError> {
        Ok(Self {
            watch: RangeWatch::new("guard".into(), min, max)?,
        })
    }

    /// Edge event channel.
    pub fn events(&self) -> Arc<Publisher<RangeEvent>> {
        Arc::clone(&self.watch.events)
    }

    /// Shared flag, `true` while the last input was out of range.
    pub fn violation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.watch.outside)
    }

    fn process(&self, value: Value) -> Result<Value, String> {
        let x = value.as_f64().ok_or("non-numeric value")?;
        self.watch.classify(x)?;
        Ok(value)
    }
}

/// Affine map through two calibration points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mapper {
    gain: f64,
    offset: f64,
}

impl Mapper {
    /// Map `(x0 → y0)` and `(x1 → y1)`.
    ///
    /// # Errors
    /// `InvalidPlugin` if `x0 == x1`.
    pub fn new((x0, y0): (f64, f64), (x1, y1): (f64, f64)) -> Result<Self, BoxError> {
        let dx = x1 - x0;
        if dx == 0.0 || !dx.is_finite() {
            return Err(BoxError::InvalidPlugin(format!(
                "mapper: calibration points need distinct finite x (got {x0}, {x1})"
            )));
        }
        let gain = (y1 - y0) / dx;
        Ok(Self {
            gain,
            offset: y0 - gain * x0,
        })
    }

    /// Mapped value of `x`.
    pub fn map(&self, x: f64) -> f64 {
        self.gain * x + self.offset
    }

    fn process(&self, value: Value) -> Result<Value, String> {
        let x = value.as_f64().ok_or("non-numeric value")?;
        Ok(value.with_f64(self.map(x)))
    }
}

/// Plugin function signature for [`Plugin::Custom`].
pub type CustomFn = Box<dyn FnMut(Value) -> Result<Value, String> + Send>;

/// Kinds of box plugin.
pub enum Plugin {
    /// See [`Monitor`].
    Monitor(Monitor),
    /// See [`Clipper`].
    Clipper(Clipper),
    /// See [`Guard`].
    Guard(Guard),
    /// See [`Mapper`].
    Mapper(Mapper),
    /// User transform.
    Custom {
        /// Name reported in errors.
        name: String,
        /// Transform.
        func: CustomFn,
    },
}

impl Plugin {
    /// Custom plugin from a closure.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: FnMut(Value) -> Result<Value, String> + Send + 'static,
    {
        Self::Custom {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Short name.
    pub fn name(&self) -> &str {
        match self {
            Self::Monitor(_) => "monitor",
            Self::Clipper(_) => "clipper",
            Self::Guard(_) => "guard",
            Self::Mapper(_) => "mapper",
            Self::Custom { name, .. } => name,
        }
    }

    /// Whether the plugin only accepts numeric boxes.
    pub fn requires_numeric(&self) -> bool {
        matches!(self, Self::Clipper(_) | Self::Guard(_) | Self::Mapper(_))
    }

    /// Run the plugin on `value`.
    ///
    /// Built-in plugins only compute here; their flags, edge events and
    /// channels change in [`commit`](Self::commit).
    pub fn process(&mut self, value: Value) -> Result<Value, String> {
        match self {
            Self::Monitor(_) => Ok(value),
            Self::Clipper(p) => p.process(value),
            Self::Guard(p) => p.process(value),
            Self::Mapper(p) => p.process(value),
            Self::Custom { func, .. } => func(value),
        }
    }

    /// Apply the state change of an accepted step from `input` to `output`.
    pub(crate) fn commit(&mut self, input: &Value, output: &Value) {
        match self {
            Self::Monitor(p) => p.commit(output),
            Self::Clipper(p) => p.watch.commit(input),
            Self::Guard(p) => p.watch.commit(input),
            Self::Mapper(_) | Self::Custom { .. } => {}
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Plugin").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapper_two_point() {
        let m = Mapper::new((0.0, 32.0), (100.0, 212.0)).unwrap();
        assert!((m.map(37.0) - 98.6).abs() < 1e-9);
        assert!(Mapper::new((1.0, 0.0), (1.0, 5.0)).is_err());
    }

    #[test]
    fn clipper_rejects_inverted_bounds() {
        assert!(Clipper::new(1.0, -1.0).is_err());
        assert!(Guard::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn guard_reports_without_clipping() {
        let guard = Guard::new(0.0, 10.0).unwrap();
        let flag = guard.violation_flag();
        let mut plugin = Plugin::Guard(guard);
        let out = plugin.process(Value::Float(12.0)).unwrap();
        assert_eq!(out, Value::Float(12.0));
        assert!(!flag.load(Ordering::Acquire));
        plugin.commit(&Value::Float(12.0), &out);
        assert!(flag.load(Ordering::Acquire));
    }

    #[test]
    fn nan_is_rejected_by_range_plugins() {
        let clipper = Clipper::new(-1.0, 1.0).unwrap();
        let flag = clipper.saturation_flag();
        let mut plugin = Plugin::Clipper(clipper);
        assert!(plugin.process(Value::Float(f64::NAN)).is_err());
        assert!(Plugin::Guard(Guard::new(0.0, 1.0).unwrap())
            .process(Value::Float(f64::NAN))
            .is_err());
        assert!(!flag.load(Ordering::Acquire));
        assert_eq!(
            plugin.process(Value::Float(f64::INFINITY)),
            Ok(Value::Float(1.0))
        );
    }

    #[test]
    fn custom_error_passes_through() {
        let mut p = Plugin::custom("reject", |_| Err("nope".into()));
        assert_eq!(p.process(Value::Int(1)), Err("nope".to_string()));
        assert_eq!(p.name(), "reject");
        assert!(!p.requires_numeric());
    }
}
