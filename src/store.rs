use std::collections::VecDeque;
use std::sync::Arc;

use crate::dsp::spectrum::SpectralFrame;

/// Latest spectrum plus the bounded amplitude history the detector and the
/// BPM estimator read from.
///
/// `amplitudes[i]` and `averages[i]` always describe the same tick.
pub struct RollingStore {
    capacity: usize,
    average_len: usize,
    latest: Option<Arc<SpectralFrame>>,
    // trailing samples feeding the dynamic average (warm-up included)
    baseline: VecDeque<f64>,
    amplitudes: VecDeque<f64>,
    averages: VecDeque<f64>,
    dynamic_threshold: f64,
}

impl RollingStore {
    pub fn new(capacity: usize, average_len: usize) -> Self {
        let capacity = capacity.max(1);
        let average_len = average_len.max(1);
        Self {
            capacity,
            average_len,
            latest: None,
            baseline: VecDeque::with_capacity(average_len),
            amplitudes: VecDeque::with_capacity(capacity),
            averages: VecDeque::with_capacity(capacity),
            dynamic_threshold: 0.0,
        }
    }

    pub fn update_frame(&mut self, frame: Arc<SpectralFrame>) {
        self.latest = Some(frame);
    }

    /// Feed the moving baseline without recording the sample.
    pub fn observe(&mut self, sample: f64) -> f64 {
        self.baseline.push_back(sample);
        while self.baseline.len() > self.average_len {
            self.baseline.pop_front();
        }
        self.dynamic_threshold =
            self.baseline.iter().sum::<f64>() / (self.baseline.len() as f64);
        self.dynamic_threshold
    }

    /// Feed the baseline and append the sample with its average to the
    /// measurement history. Oldest entries fall off past `capacity`.
    pub fn record(&mut self, sample: f64) -> f64 {
        let avg = self.observe(sample);
        self.amplitudes.push_back(sample);
        self.averages.push_back(avg);
        while self.amplitudes.len() > self.capacity {
            self.amplitudes.pop_front();
            self.averages.pop_front();
        }
        avg
    }

    pub fn latest_frame(&self) -> Option<Arc<SpectralFrame>> {
        self.latest.clone()
    }

    pub fn dynamic_threshold(&self) -> f64 {
        self.dynamic_threshold
    }

    /// Amplitude and dynamic-average histories as parallel slices.
    pub fn history(&mut self) -> (&[f64], &[f64]) {
        let a = self.amplitudes.make_contiguous();
        let b = self.averages.make_contiguous();
        (&*a, &*b)
    }

    pub fn amplitude_history(&self) -> Vec<f64> {
        self.amplitudes.iter().copied().collect()
    }

    pub fn average_history(&self) -> Vec<f64> {
        self.averages.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_none() && self.baseline.is_empty() && self.amplitudes.is_empty()
    }

    pub fn clear(&mut self) {
        self.latest = None;
        self.baseline.clear();
        self.amplitudes.clear();
        self.averages.clear();
        self.dynamic_threshold = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dsp::spectrum::SpectralAnalyzer;

    #[test]
    fn warmup_samples_move_threshold_but_not_history() {
        let mut store = RollingStore::new(10, 4);
        store.observe(100.0);
        store.observe(120.0);
        assert_eq!(store.dynamic_threshold(), 110.0);
        assert_eq!(store.len(), 0);

        let avg = store.record(140.0);
        assert_eq!(avg, 120.0);
        assert_eq!(store.amplitude_history(), vec![140.0]);
        assert_eq!(store.average_history(), vec![120.0]);
    }

    #[test]
    fn average_only_spans_the_trailing_window() {
        let mut store = RollingStore::new(10, 2);
        for v in [10.0, 20.0, 30.0] {
            store.record(v);
        }
        assert_eq!(store.dynamic_threshold(), 25.0);
        assert_eq!(store.average_history(), vec![10.0, 15.0, 25.0]);
    }

    #[test]
    fn history_is_bounded_and_parallel() {
        let mut store = RollingStore::new(3, 1);
        for v in 0..7 {
            store.record(v as f64);
        }
        let (amps, avgs) = store.history();
        assert_eq!(amps, &[4.0, 5.0, 6.0]);
        assert_eq!(amps.len(), avgs.len());
        assert_eq!(store.capacity(), 3);
    }

    #[test]
    fn clear_restores_initial_state() {
        let cfg = Config::default();
        let analyzer = SpectralAnalyzer::new(&cfg);
        let mut store = RollingStore::new(5, 2);
        let (frame, _) = analyzer.analyze(&[1.0; 52]);
        store.update_frame(Arc::new(frame));
        store.record(3.0);

        store.clear();
        assert!(store.is_empty());
        assert!(store.latest_frame().is_none());
        assert_eq!(store.dynamic_threshold(), 0.0);
        assert_eq!(store.history().0.len(), 0);
    }
}
