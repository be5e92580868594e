use crate::detector::count_peaks;

/// One entry of the live BPM series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BpmSample {
    pub timestamp: f64,
    pub bpm: u32,
}

/// Peak count × multiplier over the measurement window, no smoothing.
///
/// The multiplier is `60 / measured seconds`; 4 for the default 15 s of
/// measurement after a 5 s warm-up in a 20 s session.
pub struct BpmEstimator {
    multiplier: u32,
    current: u32,
    series: Vec<BpmSample>,
}

impl BpmEstimator {
    pub fn new(multiplier: u32) -> Self {
        Self {
            multiplier,
            current: 0,
            series: Vec::new(),
        }
    }

    pub fn bpm_for(&self, peaks: usize) -> u32 {
        u32::try_from(peaks).unwrap_or(u32::MAX).saturating_mul(self.multiplier)
    }

    /// Recount the history and append the result to the series.
    pub fn update(&mut self, timestamp: f64, amplitudes: &[f64], averages: &[f64]) -> u32 {
        self.current = self.bpm_for(count_peaks(amplitudes, averages));
        self.series.push(BpmSample { timestamp, bpm: self.current });
        self.current
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn series(&self) -> &[BpmSample] {
        &self.series
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn reset(&mut self) {
        self.current = 0;
        self.series.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_peaks_make_twelve_bpm() {
        let mut est = BpmEstimator::new(4);
        let bpm = est.update(5.0, &[1.0, 5.0, 2.0, 8.0, 3.0, 9.0, 1.0], &[0.0; 7]);
        assert_eq!(bpm, 12);
        assert_eq!(est.current(), 12);
        assert_eq!(est.series(), &[BpmSample { timestamp: 5.0, bpm: 12 }]);
    }

    #[test]
    fn empty_history_reads_zero() {
        let mut est = BpmEstimator::new(4);
        assert_eq!(est.update(0.0, &[], &[]), 0);
        assert_eq!(est.update(0.05, &[120.0], &[120.0]), 0);
        assert_eq!(est.series().len(), 2);
    }

    #[test]
    fn multiplier_is_configurable() {
        let est = BpmEstimator::new(6);
        assert_eq!(est.bpm_for(10), 60);
        assert_eq!(est.multiplier(), 6);
    }

    #[test]
    fn reset_clears_series() {
        let mut est = BpmEstimator::new(4);
        est.update(1.0, &[0.0, 1.0, 0.0], &[0.0; 3]);
        est.reset();
        assert_eq!(est.current(), 0);
        assert!(est.series().is_empty());
    }
}
