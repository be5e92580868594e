//! Heartbeat peak detection.
//!
//! Two scans share this module: a count over the amplitude history (feeds
//! the BPM estimate) and a per-tick threshold check with a debounce gap
//! (produces timestamped `PeakEvent`s).

use std::ops::RangeInclusive;

use crate::config::Config;
use crate::dsp::spectrum::SpectralFrame;

/// One confirmed heart sound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEvent {
    /// Seconds since session start.
    pub timestamp: f64,
    pub bin: usize,
    pub magnitude_db: f64,
}

/// Indices `i` with both neighbours present where `amplitudes[i]` is a
/// strict local maximum above `averages[i]`. Only the common prefix of the
/// two slices is scanned.
pub fn find_peaks(amplitudes: &[f64], averages: &[f64]) -> Vec<usize> {
    let n = amplitudes.len().min(averages.len());
    if n < 3 {
        return Vec::new();
    }
    (1..n - 1)
        .filter(|&i| {
            let a = amplitudes[i];
            a > amplitudes[i - 1] && a > amplitudes[i + 1] && a > averages[i]
        })
        .collect()
}

pub fn count_peaks(amplitudes: &[f64], averages: &[f64]) -> usize {
    find_peaks(amplitudes, averages).len()
}

/// Minimum spacing between confirmed peaks.
///
/// `secondary_delay` targets the S2 component following each S1;
/// `refractory_interval` is the generic double-count guard. Both are
/// measured from the same last confirmed peak, so the stricter one decides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebouncePolicy {
    pub secondary_delay: f64,
    pub refractory_interval: f64,
}

impl DebouncePolicy {
    pub fn min_gap(&self) -> f64 {
        self.secondary_delay.max(self.refractory_interval)
    }

    /// True when the two constants disagree, i.e. one of them has no effect.
    pub fn is_ambiguous(&self) -> bool {
        (self.secondary_delay - self.refractory_interval).abs() > f64::EPSILON
    }

    pub fn allows(&self, last_accepted: Option<f64>, timestamp: f64) -> bool {
        match last_accepted {
            None => true,
            Some(last) => timestamp > last + self.min_gap(),
        }
    }
}

/// Session-scoped threshold+debounce detector.
pub struct PeakDetector {
    band: RangeInclusive<usize>,
    threshold_db: f64,
    policy: DebouncePolicy,
    last_accepted: Option<f64>,
    events: Vec<PeakEvent>,
}

impl PeakDetector {
    pub fn new(band: RangeInclusive<usize>, threshold_db: f64, policy: DebouncePolicy) -> Self {
        Self {
            band,
            threshold_db,
            policy,
            last_accepted: None,
            events: Vec::new(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.peak_band.clone(), cfg.peak_threshold_db, cfg.debounce())
    }

    /// Strongest bin in the band that is above the threshold.
    pub fn exceedance(&self, frame: &SpectralFrame) -> Option<(usize, f64)> {
        frame.strongest_in(&self.band).filter(|&(_, db)| db > self.threshold_db)
    }

    /// Confirm a candidate at `timestamp` if the debounce gap has passed.
    pub fn admit(&mut self, timestamp: f64) -> bool {
        if self.policy.allows(self.last_accepted, timestamp) {
            self.last_accepted = Some(timestamp);
            true
        } else {
            false
        }
    }

    /// Run the threshold+debounce scan on one frame.
    pub fn scan(&mut self, timestamp: f64, frame: &SpectralFrame) -> Option<PeakEvent> {
        let (bin, magnitude_db) = self.exceedance(frame)?;
        if !self.admit(timestamp) {
            return None;
        }
        let event = PeakEvent { timestamp, bin, magnitude_db };
        self.events.push(event);
        Some(event)
    }

    pub fn last_accepted(&self) -> Option<f64> {
        self.last_accepted
    }

    pub fn events(&self) -> &[PeakEvent] {
        &self.events
    }

    pub fn policy(&self) -> DebouncePolicy {
        self.policy
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.events.clear();
    }
}
