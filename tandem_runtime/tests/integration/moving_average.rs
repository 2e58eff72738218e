//! Moving average forms agree with the arithmetic mean of the window.

use proptest::prelude::*;
use tandem_runtime::control::{MovingAverage, SignalFilter};

fn window_mean(history: &[f64], depth: usize, initial: f64) -> f64 {
    let padded: Vec<f64> = std::iter::repeat_n(initial, depth)
        .chain(history.iter().copied())
        .collect();
    let tail = &padded[padded.len() - depth..];
    tail.iter().sum::<f64>() / depth as f64
}

proptest! {
    #[test]
    fn forms_track_the_window_mean(
        depth in 1usize..32,
        initial in -100.0f64..100.0,
        samples in prop::collection::vec(-1000.0f64..1000.0, 1..200),
    ) {
        let mut summing = MovingAverage::summing(depth, initial);
        let mut recursive = MovingAverage::recursive(depth, initial);
        for (i, &x) in samples.iter().enumerate() {
            let s = summing.push(x);
            let r = recursive.push(x);
            let expected = window_mean(&samples[..=i], depth, initial);
            prop_assert!((s - expected).abs() < 1e-9, "summing {s} vs {expected}");
            prop_assert!((r - expected).abs() < 1e-6, "recursive {r} vs {expected}");
        }
    }
}

#[test]
fn form_selected_by_depth() {
    assert!(!MovingAverage::new(8, 0.0).is_recursive());
    assert!(MovingAverage::new(10_000, 0.0).is_recursive());
    assert_eq!(MovingAverage::new(0, 1.0).depth(), 1);
}

#[test]
fn deep_recursive_window_settles() {
    let mut avg = MovingAverage::new(10_000, 0.0);
    for _ in 0..10_000 {
        avg.apply(2.0, 0.001);
    }
    assert!((avg.value() - 2.0).abs() < 1e-6);
}
