//! Hann-windowed moving-average filter.
//!
//! Smooths the corrected voltage and the current before the filtered power is
//! integrated. The window is the symmetric Hann window with zero end taps:
//!
//! ```text
//! w[n] = 0.5 * (1 - cos(2*pi*n / (N-1)))      n = 0..N-1
//! y    = 2 * sum(history[i] * w[i]) / (N - 1)
//! ```
//!
//! Since `sum(w) == (N-1)/2`, a full history of a constant `c` yields exactly `c`.
//! The history always holds `N` samples, oldest first.

use std::collections::VecDeque;
use std::f64::consts::PI;

/// Online FIR smoother with a Hann window.
#[derive(Debug, Clone)]
pub struct HannFilter {
    window: Vec<f64>,
    history: VecDeque<f64>,
    // Previous result:
    output: f64,
}

impl HannFilter {
    /// Create a filter with `taps` coefficients whose history is pre-filled with
    /// `initial_value`. Fewer than 2 taps is raised to 2.
    pub fn new(taps: usize, initial_value: f64) -> Self {
        let taps = taps.max(2);
        let mut filter = Self {
            window: hann_window(taps),
            history: VecDeque::with_capacity(taps),
            output: initial_value,
        };
        filter.reset(initial_value);
        filter
    }

    /// Number of taps.
    pub fn taps(&self) -> usize {
        self.window.len()
    }

    /// Last output value.
    pub fn output(&self) -> f64 {
        self.output
    }

    /// Process a single sample and return the smoothed value.
    ///
    /// Non-finite input is dropped and the previous output is returned unchanged.
    pub fn process(&mut self, input: f64) -> f64 {
        if !input.is_finite() {
            return self.output;
        }

        self.history.pop_front();
        self.history.push_back(input);

        let weighted: f64 = self
            .history
            .iter()
            .zip(&self.window)
            .map(|(x, w)| x * w)
            .sum();
        self.output = 2.0 * weighted / (self.window.len() - 1) as f64;
        self.output
    }

    /// Overwrite the whole history and the last output with `value`.
    pub fn reset(&mut self, value: f64) {
        self.history.clear();
        self.history.extend(std::iter::repeat(value).take(self.window.len()));
        self.output = value;
    }
}

fn hann_window(taps: usize) -> Vec<f64> {
    let denom = (taps - 1) as f64;
    (0..taps)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f64 / denom).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_symmetric_with_zero_ends() {
        let w = hann_window(25);
        assert_eq!(w.len(), 25);
        assert!(w[0].abs() < 1e-12);
        assert!(w[24].abs() < 1e-12);
        assert!((w[12] - 1.0).abs() < 1e-12);
        for n in 0..25 {
            assert!((w[n] - w[24 - n]).abs() < 1e-12);
        }
        let sum: f64 = w.iter().sum();
        assert!((sum - 12.0).abs() < 1e-9);
    }

    #[test]
    fn three_tap_round_trip() {
        let mut filter = HannFilter::new(3, 0.0);
        let outputs: Vec<f64> = [1.0, 1.0, 1.0].iter().map(|&x| filter.process(x)).collect();

        assert!(outputs.iter().all(|y| y.is_finite()));
        assert!((0.0..=2.0).contains(&outputs[2]));
        // The 3-tap window only weighs the middle sample.
        assert_eq!(outputs, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn converges_to_constant_input() {
        let mut filter = HannFilter::new(25, 0.0);
        let mut y = 0.0;
        for _ in 0..30 {
            y = filter.process(5.0);
        }
        assert!((y - 5.0).abs() < 0.5);
    }

    #[test]
    fn non_finite_input_keeps_previous_output() {
        let mut filter = HannFilter::new(5, 2.0);
        let before = filter.process(3.0);

        assert_eq!(filter.process(f64::NAN), before);
        assert_eq!(filter.process(f64::INFINITY), before);
        assert_eq!(filter.process(f64::NEG_INFINITY), before);

        // The dropped samples never entered the history.
        let mut reference = HannFilter::new(5, 2.0);
        reference.process(3.0);
        assert_eq!(filter.process(4.0), reference.process(4.0));
    }

    #[test]
    fn outputs_stay_finite_for_finite_inputs() {
        let mut filter = HannFilter::new(7, 0.0);
        for i in 0..200 {
            let x = ((i as f64) * 0.37).sin() * 1e6 - 3.0;
            assert!(filter.process(x).is_finite());
        }
    }

    #[test]
    fn reset_discards_state() {
        let mut filter = HannFilter::new(4, 0.0);
        filter.process(10.0);
        filter.process(-3.0);

        filter.reset(1.5);
        assert_eq!(filter.output(), 1.5);
        assert!((filter.process(1.5) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn taps_clamped_to_two() {
        let mut filter = HannFilter::new(1, 4.0);
        assert_eq!(filter.taps(), 2);
        assert!(filter.process(4.0).is_finite());
    }
}
