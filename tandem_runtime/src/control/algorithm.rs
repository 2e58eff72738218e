//! Discrete difference equations for the algorithm node.
//!
//! Backward Euler throughout; integrators of PI, PIDT1 and PIDT1p use
//! trapezoidal accumulation. Gains live in boxes and are read by
//! `configure`, so a gain change takes effect on the next sample after the
//! controller reconfigures.
//!
//! | Algorithm | Parameters | Difference equation |
//! |-----------|-----------|---------------------|
//! | P | Kp | `u = Kp·e` |
//! | PI | Kp, Ki | `I += Ki·Ts·(e + e₁)/2`, `u = Kp·e + I` |
//! | PID | Kp, Ki, Kd | `I += Ki·Ts·e`, `u = Kp·e + I + Kd·(e − e₁)/Ts` |
//! | PT1 | K, T | `(T + Ts)·u = T·u₁ + K·Ts·e` |
//! | PT1PT1 | K, T1, T2 | two PT1 stages, gain on the first |
//! | Lead | K, T, α | `(αT + Ts)·u = αT·u₁ + K·((T + Ts)·e − T·e₁)` |
//! | PIDT1 | Kp, Ki, Kd, T1 | trapezoid I, `(T1 + Ts)·D = T1·D₁ + Kd·(e − e₁)` |
//! | PIDT1p | as PIDT1 | integrator frozen while the actuator saturates |

use super::node::param;
use crate::error::ControlError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tandem_image::ValueBox;

/// A discrete SISO transfer function `e → u`.
pub trait DifferenceEquation: Send {
    /// Short algorithm name.
    fn name(&self) -> &'static str;

    /// Parameter boxes read by `configure`.
    fn parameters(&self) -> Vec<ValueBox>;

    /// Recompute coefficients from the parameter boxes for sampling time `ts`.
    fn configure(&mut self, ts: f64) -> Result<(), ControlError>;

    /// Advance one sample.
    fn step(&mut self, e: f64) -> f64;

    /// Clear the internal state.
    fn reset(&mut self);
}

fn non_negative(b: &ValueBox) -> Result<f64, ControlError> {
    let v = param(b)?;
    if !v.is_finite() || v < 0.0 {
        return Err(ControlError::InvalidParameter {
            name: b.id().to_string(),
            reason: format!("must be finite and >= 0, got {v}"),
        });
    }
    Ok(v)
}

fn finite(b: &ValueBox) -> Result<f64, ControlError> {
    let v = param(b)?;
    if !v.is_finite() {
        return Err(ControlError::InvalidParameter {
            name: b.id().to_string(),
            reason: format!("must be finite, got {v}"),
        });
    }
    Ok(v)
}

// ─── P ──────────────────────────────────────────────────────────────

/// Proportional.
#[derive(Debug)]
pub struct P {
    kp_box: ValueBox,
    kp: f64,
}

impl P {
    /// P algorithm with gain box `kp`.
    pub fn new(kp: ValueBox) -> Self {
        Self { kp_box: kp, kp: 0.0 }
    }
}

impl DifferenceEquation for P {
    fn name(&self) -> &'static str {
        "P"
    }

    fn parameters(&self) -> Vec<ValueBox> {
        vec![self.kp_box.clone()]
    }

    fn configure(&mut self, _ts: f64) -> Result<(), ControlError> {
        self.kp = finite(&self.kp_box)?;
        Ok(())
    }

    fn step(&mut self, e: f64) -> f64 {
        self.kp * e
    }

    fn reset(&mut self) {}
}

// ─── PI ─────────────────────────────────────────────────────────────

/// Proportional-integral with trapezoidal integration.
#[derive(Debug)]
pub struct Pi {
    kp_box: ValueBox,
    ki_box: ValueBox,
    kp: f64,
    ki_ts_half: f64,
    integral: f64,
    prev_error: f64,
}

impl Pi {
    /// PI algorithm with gain boxes `kp` and `ki`.
    pub fn new(kp: ValueBox, ki: ValueBox) -> Self {
        Self {
            kp_box: kp,
            ki_box: ki,
            kp: 0.0,
            ki_ts_half: 0.0,
            integral: 0.0,
            prev_error: 0.0,
        }
    }

    /// Integrator state.
    pub fn integral(&self) -> f64 {
        self.integral
    }
}

impl DifferenceEquation for Pi {
    fn name(&self) -> &'static str {
        "PI"
    }

    fn parameters(&self) -> Vec<ValueBox> {
        vec![self.kp_box.clone(), self.ki_box.clone()]
    }

    fn configure(&mut self, ts: f64) -> Result<(), ControlError> {
        self.kp = finite(&self.kp_box)?;
        self.ki_ts_half = finite(&self.ki_box)? * ts / 2.0;
        Ok(())
    }

    fn step(&mut self, e: f64) -> f64 {
        self.integral += self.ki_ts_half * (e + self.prev_error);
        self.prev_error = e;
        self.kp * e + self.integral
    }

    fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
    }
}

// ─── PID ────────────────────────────────────────────────────────────

/// Proportional-integral-derivative, backward Euler.
///
/// Zero Ki disables the integrator; zero Kd disables the derivative.
#[derive(Debug)]
pub struct Pid {
    kp_box: ValueBox,
    ki_box: ValueBox,
    kd_box: ValueBox,
    kp: f64,
    ki_ts: f64,
    kd_over_ts: f64,
    integral: f64,
    prev_error: f64,
}

impl Pid {
    /// PID algorithm with gain boxes `kp`, `ki`, `kd`.
    pub fn new(kp: ValueBox, ki: ValueBox, kd: ValueBox) -> Self {
        Self {
            kp_box: kp,
            ki_box: ki,
            kd_box: kd,
            kp: 0.0,
            ki_ts: 0.0,
            kd_over_ts: 0.0,
            integral: 0.0,
            prev_error: 0.0,
        }
    }
}

impl DifferenceEquation for Pid {
    fn name(&self) -> &'static str {
        "PID"
    }

    fn parameters(&self) -> Vec<ValueBox> {
        vec![self.kp_box.clone(), self.ki_box.clone(), self.kd_box.clone()]
    }

    fn configure(&mut self, ts: f64) -> Result<(), ControlError> {
        self.kp = finite(&self.kp_box)?;
        self.ki_ts = finite(&self.ki_box)? * ts;
        self.kd_over_ts = finite(&self.kd_box)? / ts;
        Ok(())
    }

    fn step(&mut self, e: f64) -> f64 {
        let p_term = self.kp * e;

        let i_term = if self.ki_ts != 0.0 {
            self.integral += self.ki_ts * e;
            self.integral
        } else {
            self.integral = 0.0;
            0.0
        };

        let d_term = self.kd_over_ts * (e - self.prev_error);
        self.prev_error = e;

        p_term + i_term + d_term
    }

    fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
    }
}

// ─── PT1 / PT1PT1 ───────────────────────────────────────────────────

/// One backward-Euler first-order lag stage: `y = a·y₁ + b·x`.
#[derive(Debug, Clone, Copy, Default)]
struct Lag {
    a: f64,
    b: f64,
    y: f64,
}

impl Lag {
    fn configure(&mut self, gain: f64, t: f64, ts: f64) {
        self.a = t / (t + ts);
        self.b = gain * ts / (t + ts);
    }

    fn step(&mut self, x: f64) -> f64 {
        self.y = self.a * self.y + self.b * x;
        self.y
    }
}

/// First-order lag.
#[derive(Debug)]
pub struct Pt1 {
    k_box: ValueBox,
    t_box: ValueBox,
    lag: Lag,
}

impl Pt1 {
    /// PT1 with gain box `k` and time constant box `t` (seconds).
    pub fn new(k: ValueBox, t: ValueBox) -> Self {
        Self {
            k_box: k,
            t_box: t,
            lag: Lag::default(),
        }
    }
}

impl DifferenceEquation for Pt1 {
    fn name(&self) -> &'static str {
        "PT1"
    }

    fn parameters(&self) -> Vec<ValueBox> {
        vec![self.k_box.clone(), self.t_box.clone()]
    }

    fn configure(&mut self, ts: f64) -> Result<(), ControlError> {
        let k = finite(&self.k_box)?;
        let t = non_negative(&self.t_box)?;
        self.lag.configure(k, t, ts);
        Ok(())
    }

    fn step(&mut self, e: f64) -> f64 {
        self.lag.step(e)
    }

    fn reset(&mut self) {
        self.lag.y = 0.0;
    }
}

/// Two cascaded first-order lags.
#[derive(Debug)]
pub struct Pt1Pt1 {
    k_box: ValueBox,
    t1_box: ValueBox,
    t2_box: ValueBox,
    first: Lag,
    second: Lag,
}

impl Pt1Pt1 {
    /// PT1PT1 with gain box `k` and time constant boxes `t1`, `t2`.
    pub fn new(k: ValueBox, t1: ValueBox, t2: ValueBox) -> Self {
        Self {
            k_box: k,
            t1_box: t1,
            t2_box: t2,
            first: Lag::default(),
            second: Lag::default(),
        }
    }
}

impl DifferenceEquation for Pt1Pt1 {
    fn name(&self) -> &'static str {
        "PT1PT1"
    }

    fn parameters(&self) -> Vec<ValueBox> {
        vec![self.k_box.clone(), self.t1_box.clone(), self.t2_box.clone()]
    }

    fn configure(&mut self, ts: f64) -> Result<(), ControlError> {
        let k = finite(&self.k_box)?;
        self.first.configure(k, non_negative(&self.t1_box)?, ts);
        self.second.configure(1.0, non_negative(&self.t2_box)?, ts);
        Ok(())
    }

    fn step(&mut self, e: f64) -> f64 {
        let x = self.first.step(e);
        self.second.step(x)
    }

    fn reset(&mut self) {
        self.first.y = 0.0;
        self.second.y = 0.0;
    }
}

// ─── Lead ───────────────────────────────────────────────────────────

/// First-order lead with pole ratio `α`.
#[derive(Debug)]
pub struct Lead {
    k_box: ValueBox,
    t_box: ValueBox,
    alpha_box: ValueBox,
    k: f64,
    t: f64,
    alpha_t: f64,
    ts: f64,
    prev_error: f64,
    prev_output: f64,
}

impl Lead {
    /// Lead with gain box `k`, time constant box `t`, ratio box `alpha`.
    pub fn new(k: ValueBox, t: ValueBox, alpha: ValueBox) -> Self {
        Self {
            k_box: k,
            t_box: t,
            alpha_box: alpha,
            k: 0.0,
            t: 0.0,
            alpha_t: 0.0,
            ts: 0.0,
            prev_error: 0.0,
            prev_output: 0.0,
        }
    }
}

impl DifferenceEquation for Lead {
    fn name(&self) -> &'static str {
        "Lead"
    }

    fn parameters(&self) -> Vec<ValueBox> {
        vec![self.k_box.clone(), self.t_box.clone(), self.alpha_box.clone()]
    }

    fn configure(&mut self, ts: f64) -> Result<(), ControlError> {
        self.k = finite(&self.k_box)?;
        self.t = non_negative(&self.t_box)?;
        self.alpha_t = non_negative(&self.alpha_box)? * self.t;
        self.ts = ts;
        Ok(())
    }

    fn step(&mut self, e: f64) -> f64 {
        let u = (self.alpha_t * self.prev_output
            + self.k * ((self.t + self.ts) * e - self.t * self.prev_error))
            / (self.alpha_t + self.ts);
        self.prev_error = e;
        self.prev_output = u;
        u
    }

    fn reset(&mut self) {
        self.prev_error = 0.0;
        self.prev_output = 0.0;
    }
}

// ─── PIDT1 / PIDT1p ─────────────────────────────────────────────────

/// PID with first-order filtered derivative and trapezoidal integrator.
///
/// Built with [`Pidt1::with_anti_windup`] it becomes PIDT1p: the integrator
/// holds while the saturation flag (usually a clipper's) is set.
#[derive(Debug)]
pub struct Pidt1 {
    kp_box: ValueBox,
    ki_box: ValueBox,
    kd_box: ValueBox,
    t1_box: ValueBox,
    saturated: Option<Arc<AtomicBool>>,
    kp: f64,
    ki_ts_half: f64,
    kd: f64,
    t1: f64,
    ts: f64,
    integral: f64,
    derivative: f64,
    prev_error: f64,
}

impl Pidt1 {
    /// PIDT1 with gain boxes and derivative time constant box `t1`.
    pub fn new(kp: ValueBox, ki: ValueBox, kd: ValueBox, t1: ValueBox) -> Self {
        Self {
            kp_box: kp,
            ki_box: ki,
            kd_box: kd,
            t1_box: t1,
            saturated: None,
            kp: 0.0,
            ki_ts_half: 0.0,
            kd: 0.0,
            t1: 0.0,
            ts: 0.0,
            integral: 0.0,
            derivative: 0.0,
            prev_error: 0.0,
        }
    }

    /// PIDT1p: integrator frozen while `saturated` is set.
    pub fn with_anti_windup(
        kp: ValueBox,
        ki: ValueBox,
        kd: ValueBox,
        t1: ValueBox,
        saturated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            saturated: Some(saturated),
            ..Self::new(kp, ki, kd, t1)
        }
    }

    /// Integrator state.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    fn frozen(&self) -> bool {
        self.saturated
            .as_ref()
            .is_some_and(|s| s.load(Ordering::Acquire))
    }
}

impl DifferenceEquation for Pidt1 {
    fn name(&self) -> &'static str {
        if self.saturated.is_some() {
            "PIDT1p"
        } else {
            "PIDT1"
        }
    }

    fn parameters(&self) -> Vec<ValueBox> {
        vec![
            self.kp_box.clone(),
            self.ki_box.clone(),
            self.kd_box.clone(),
            self.t1_box.clone(),
        ]
    }

    fn configure(&mut self, ts: f64) -> Result<(), ControlError> {
        self.kp = finite(&self.kp_box)?;
        self.ki_ts_half = finite(&self.ki_box)? * ts / 2.0;
        self.kd = finite(&self.kd_box)?;
        self.t1 = non_negative(&self.t1_box)?;
        self.ts = ts;
        Ok(())
    }

    fn step(&mut self, e: f64) -> f64 {
        if !self.frozen() {
            self.integral += self.ki_ts_half * (e + self.prev_error);
        }
        self.derivative = (self.t1 * self.derivative + self.kd * (e - self.prev_error))
            / (self.t1 + self.ts);
        self.prev_error = e;
        self.kp * e + self.integral + self.derivative
    }

    fn reset(&mut self) {
        self.integral = 0.0;
        self.derivative = 0.0;
        self.prev_error = 0.0;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TS: f64 = 0.1;

    fn b(id: &str, v: f64) -> ValueBox {
        ValueBox::new(id, v)
    }

    #[test]
    fn proportional() {
        let mut p = P::new(b("kp", 2.5));
        p.configure(TS).unwrap();
        assert!((p.step(2.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn pi_trapezoid() {
        let mut pi = Pi::new(b("kp", 0.0), b("ki", 2.0));
        pi.configure(TS).unwrap();
        // I₁ = 2·0.1·(1 + 0)/2 = 0.1, then +0.2 per sample
        assert!((pi.step(1.0) - 0.1).abs() < 1e-12);
        assert!((pi.step(1.0) - 0.3).abs() < 1e-12);
        pi.reset();
        assert_eq!(pi.integral(), 0.0);
    }

    #[test]
    fn pid_derivative_kick() {
        let mut pid = Pid::new(b("kp", 0.0), b("ki", 0.0), b("kd", 1.0));
        pid.configure(TS).unwrap();
        assert!(pid.step(0.0).abs() < 1e-12);
        assert!((pid.step(1.0) - 10.0).abs() < 1e-9);
        assert!(pid.step(1.0).abs() < 1e-9);
    }

    #[test]
    fn pt1_converges_to_gain() {
        let mut pt1 = Pt1::new(b("k", 3.0), b("t", 0.5));
        pt1.configure(TS).unwrap();
        let first = pt1.step(1.0);
        assert!((first - 3.0 * TS / 0.6).abs() < 1e-12);
        let last = (0..500).map(|_| pt1.step(1.0)).last().unwrap();
        assert!((last - 3.0).abs() < 1e-6);
    }

    #[test]
    fn pt1pt1_is_slower_than_pt1() {
        let mut one = Pt1::new(b("k", 1.0), b("t", 0.5));
        let mut two = Pt1Pt1::new(b("k", 1.0), b("t1", 0.5), b("t2", 0.5));
        one.configure(TS).unwrap();
        two.configure(TS).unwrap();
        for _ in 0..5 {
            assert!(two.step(1.0) < one.step(1.0));
        }
        let last = (0..1000).map(|_| two.step(1.0)).last().unwrap();
        assert!((last - 1.0).abs() < 1e-6);
    }

    #[test]
    fn lead_static_gain() {
        let mut lead = Lead::new(b("k", 2.0), b("t", 1.0), b("alpha", 0.1));
        lead.configure(TS).unwrap();
        let first = lead.step(1.0);
        // (αT + Ts)·u = K·(T + Ts) → 0.2·u = 2.2
        assert!((first - 11.0).abs() < 1e-9);
        let last = (0..500).map(|_| lead.step(1.0)).last().unwrap();
        assert!((last - 2.0).abs() < 1e-6);
    }

    #[test]
    fn pidt1p_freezes_integrator() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut c = Pidt1::with_anti_windup(
            b("kp", 0.0),
            b("ki", 1.0),
            b("kd", 0.0),
            b("t1", 0.0),
            Arc::clone(&flag),
        );
        assert_eq!(c.name(), "PIDT1p");
        c.configure(TS).unwrap();
        c.step(1.0);
        let before = c.integral();
        flag.store(true, Ordering::Release);
        for _ in 0..10 {
            c.step(1.0);
        }
        assert_eq!(c.integral(), before);
        flag.store(false, Ordering::Release);
        c.step(1.0);
        assert!(c.integral() > before);
    }

    #[test]
    fn negative_time_constant_rejected() {
        let mut pt1 = Pt1::new(b("k", 1.0), b("t", -1.0));
        assert!(matches!(
            pt1.configure(TS),
            Err(ControlError::InvalidParameter { .. })
        ));
    }
}
