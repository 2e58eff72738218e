//! Measurement filters.
//!
//! Moving average in two forms, selected by depth:
//! - summing: recompute the window sum every sample, O(N), no drift
//! - recursive: `m ← m + (x_new − x_old)/N`, O(1), for deep windows
//!
//! and a first-order low-pass (`flp`, zero disables).

use core::f64::consts::PI;
use std::collections::VecDeque;
use tandem_common::consts::RECURSIVE_AVERAGE_DEPTH;

/// A filter applied once per controller sample.
pub trait SignalFilter: Send {
    /// Filter one sample taken `ts` seconds after the previous one.
    fn apply(&mut self, x: f64, ts: f64) -> f64;

    /// Current output.
    fn value(&self) -> f64;
}

// ─── Moving Average ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    Summing,
    Recursive,
}

/// Mean of the last `depth` samples.
///
/// The window is prefilled with the initial value, so the output is defined
/// from the first sample on.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    form: Form,
    window: VecDeque<f64>,
    mean: f64,
}

impl MovingAverage {
    /// Pick the form by depth (recursive at and above the threshold).
    ///
    /// A zero depth is treated as one.
    pub fn new(depth: usize, initial: f64) -> Self {
        if depth >= RECURSIVE_AVERAGE_DEPTH {
            Self::recursive(depth, initial)
        } else {
            Self::summing(depth, initial)
        }
    }

    /// Summing form regardless of depth.
    pub fn summing(depth: usize, initial: f64) -> Self {
        Self::with_form(Form::Summing, depth, initial)
    }

    /// Recursive form regardless of depth.
    pub fn recursive(depth: usize, initial: f64) -> Self {
        Self::with_form(Form::Recursive, depth, initial)
    }

    fn with_form(form: Form, depth: usize, initial: f64) -> Self {
        let depth = depth.max(1);
        Self {
            form,
            window: std::iter::repeat_n(initial, depth).collect(),
            mean: initial,
        }
    }

    /// Window length.
    pub fn depth(&self) -> usize {
        self.window.len()
    }

    /// True for the recursive form.
    pub fn is_recursive(&self) -> bool {
        self.form == Form::Recursive
    }

    /// Push a sample and return the new mean.
    pub fn push(&mut self, x: f64) -> f64 {
        let oldest = self.window.pop_front().unwrap_or(x);
        self.window.push_back(x);
        let n = self.window.len() as f64;
        self.mean = match self.form {
            Form::Summing => self.window.iter().sum::<f64>() / n,
            Form::Recursive => self.mean + (x - oldest) / n,
        };
        self.mean
    }

    /// Current mean.
    pub fn mean(&self) -> f64 {
        self.mean
    }
}

impl SignalFilter for MovingAverage {
    fn apply(&mut self, x: f64, _ts: f64) -> f64 {
        self.push(x)
    }

    fn value(&self) -> f64 {
        self.mean
    }
}

// ─── Low-Pass Filter (1st-order) ────────────────────────────────────

/// First-order low-pass with corner frequency `flp` (Hz).
///
/// ```text
/// alpha = 2π·flp·dt / (1 + 2π·flp·dt)
/// y[n] = y[n-1] + alpha × (x[n] - y[n-1])
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LowPass {
    flp: f64,
    prev_output: f64,
}

impl LowPass {
    /// Low-pass at `flp` Hz starting from `initial`. `flp <= 0` passes through.
    pub fn new(flp: f64, initial: f64) -> Self {
        Self {
            flp,
            prev_output: initial,
        }
    }
}

impl SignalFilter for LowPass {
    fn apply(&mut self, x: f64, ts: f64) -> f64 {
        if self.flp <= 0.0 || ts <= 0.0 {
            self.prev_output = x;
            return x;
        }
        let omega = 2.0 * PI * self.flp * ts;
        let alpha = omega / (1.0 + omega);
        self.prev_output += alpha * (x - self.prev_output);
        self.prev_output
    }

    fn value(&self) -> f64 {
        self.prev_output
    }
}
