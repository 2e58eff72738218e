//! Runtime-wide defaults.
//!
//! Single source of truth for timing defaults shared by in-process cyclers
//! and cycling worker processes.

use std::time::Duration;

/// Default reporting window of the cycle-time monitor.
pub const MONITOR_WINDOW: Duration = Duration::from_secs(5);

/// Default relative tolerance of the effective cycle time (10 %).
pub const CYCLE_TOLERANCE: f64 = 0.10;

/// Moving-average depth at and above which the recursive form is used.
pub const RECURSIVE_AVERAGE_DEPTH: usize = 10_000;

/// Default cycle time of a control unit (100 ms).
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_millis(100);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(CYCLE_TOLERANCE > 0.0 && CYCLE_TOLERANCE < 1.0);
        assert!(MONITOR_WINDOW > DEFAULT_CYCLE_TIME);
        assert!(RECURSIVE_AVERAGE_DEPTH > 1);
    }
}
