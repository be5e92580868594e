use std::ops::RangeInclusive;

use crate::detector::DebouncePolicy;
use crate::error::ConfigError;

// Defaults (overridable via CLI)
pub const SAMPLE_RATE: f32 = 44_100.0;
/// Number of reported bins is `BINS + 1`; bin 25 sits near 540 Hz at 44.1 kHz.
pub const BINS: usize = 25;
/// Half the FFT length. Bin spacing is `SAMPLE_RATE * 0.5 / SAMPLING_RATE_CONSTANT`.
pub const SAMPLING_RATE_CONSTANT: usize = 1024;
pub const INPUT_GAIN: f32 = 8.0;
pub const LOW_PASS_CUTOFF: f32 = 420.0;
pub const BANDPASS_CENTER: f32 = 220.0;
pub const BANDPASS_WIDTH: f32 = 200.0;
pub const EQ_POS_GAIN: f32 = 4.0;
pub const EQ_NEG_CENTER: f32 = 10_210.0;
pub const EQ_NEG_WIDTH: f32 = 9_790.0;
pub const EQ_NEG_GAIN: f32 = -4.0;
pub const PEAK_THRESHOLD: f64 = 125.0;
pub const PEAK_BAND: RangeInclusive<usize> = 2..=8;
pub const SECONDARY_DELAY: f64 = 0.5;
pub const REFRACTORY_INTERVAL: f64 = 0.4;
pub const WARMUP: f64 = 5.0;
pub const MEASURE_WINDOW: f64 = 20.0;
pub const TICK_INTERVAL: f64 = 0.05;
pub const AVERAGE_WINDOW: f64 = 1.0;
pub const BPM_MULTIPLIER: u32 = 4;
pub const EVENT_CAPACITY: usize = 256;

/// Analysis constants for one stethoscope session.
///
/// Filter widths are half-widths: a stage centered at `c` with width `w`
/// spans `c - w ..= c + w`, so the default band-pass covers 20–420 Hz and
/// the attenuating equalizer covers 420–20000 Hz.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub sample_rate: f32,
    pub bins: usize,
    pub sampling_rate_constant: usize,

    // filter chain
    pub input_gain: f32,
    pub low_pass_cutoff_hz: f32,
    pub band_pass_center_hz: f32,
    pub band_pass_width_hz: f32,
    pub eq_pos_gain_db: f32,
    pub eq_neg_center_hz: f32,
    pub eq_neg_width_hz: f32,
    pub eq_neg_gain_db: f32,

    // detection
    pub peak_threshold_db: f64,
    pub peak_band: RangeInclusive<usize>,
    pub secondary_delay_s: f64,
    pub refractory_interval_s: f64,

    // timing
    pub warmup_s: f64,
    pub measure_window_s: f64,
    pub tick_interval_s: f64,
    pub average_window_s: f64,
    pub bpm_multiplier: u32,

    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            bins: BINS,
            sampling_rate_constant: SAMPLING_RATE_CONSTANT,
            input_gain: INPUT_GAIN,
            low_pass_cutoff_hz: LOW_PASS_CUTOFF,
            band_pass_center_hz: BANDPASS_CENTER,
            band_pass_width_hz: BANDPASS_WIDTH,
            eq_pos_gain_db: EQ_POS_GAIN,
            eq_neg_center_hz: EQ_NEG_CENTER,
            eq_neg_width_hz: EQ_NEG_WIDTH,
            eq_neg_gain_db: EQ_NEG_GAIN,
            peak_threshold_db: PEAK_THRESHOLD,
            peak_band: PEAK_BAND,
            secondary_delay_s: SECONDARY_DELAY,
            refractory_interval_s: REFRACTORY_INTERVAL,
            warmup_s: WARMUP,
            measure_window_s: MEASURE_WINDOW,
            tick_interval_s: TICK_INTERVAL,
            average_window_s: AVERAGE_WINDOW,
            bpm_multiplier: BPM_MULTIPLIER,
            event_capacity: EVENT_CAPACITY,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value, requirement: "finite and > 0" })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value, requirement: "finite and >= 0" })
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value, requirement: "finite" })
    }
}

fn below_nyquist(name: &'static str, hz: f64, sample_rate: f64) -> Result<(), ConfigError> {
    let nyquist = sample_rate * 0.5;
    if hz < nyquist {
        Ok(())
    } else {
        Err(ConfigError::AboveNyquist { name, hz, nyquist })
    }
}

impl Config {
    /// Rejects anything that would make a stage, the analyzer or the
    /// session clock misbehave. Called by every constructor that takes a
    /// `Config`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sr = self.sample_rate as f64;
        positive("sample_rate", sr)?;
        if self.bins == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "bins",
                value: 0.0,
                requirement: ">= 1",
            });
        }
        if self.sampling_rate_constant < self.bins {
            return Err(ConfigError::InvalidParameter {
                name: "sampling_rate_constant",
                value: self.sampling_rate_constant as f64,
                requirement: ">= bins",
            });
        }

        positive("input_gain", self.input_gain as f64)?;
        positive("low_pass_cutoff_hz", self.low_pass_cutoff_hz as f64)?;
        below_nyquist("low_pass_cutoff_hz", self.low_pass_cutoff_hz as f64, sr)?;
        positive("band_pass_center_hz", self.band_pass_center_hz as f64)?;
        positive("band_pass_width_hz", self.band_pass_width_hz as f64)?;
        below_nyquist("band_pass_center_hz", self.band_pass_center_hz as f64, sr)?;
        finite("eq_pos_gain_db", self.eq_pos_gain_db as f64)?;
        positive("eq_neg_center_hz", self.eq_neg_center_hz as f64)?;
        positive("eq_neg_width_hz", self.eq_neg_width_hz as f64)?;
        below_nyquist("eq_neg_center_hz", self.eq_neg_center_hz as f64, sr)?;
        finite("eq_neg_gain_db", self.eq_neg_gain_db as f64)?;

        finite("peak_threshold_db", self.peak_threshold_db)?;
        let (start, end) = (*self.peak_band.start(), *self.peak_band.end());
        if start > end || end > self.bins {
            return Err(ConfigError::PeakBand { start, end, bins: self.bins });
        }
        non_negative("secondary_delay_s", self.secondary_delay_s)?;
        non_negative("refractory_interval_s", self.refractory_interval_s)?;

        positive("tick_interval_s", self.tick_interval_s)?;
        if self.tick_interval_s * sr < 1.0 {
            return Err(ConfigError::InvalidParameter {
                name: "tick_interval_s",
                value: self.tick_interval_s,
                requirement: "at least one sample period",
            });
        }
        non_negative("warmup_s", self.warmup_s)?;
        positive("measure_window_s", self.measure_window_s)?;
        if self.measure_window_ticks() <= self.warmup_ticks() {
            return Err(ConfigError::InvalidParameter {
                name: "measure_window_s",
                value: self.measure_window_s,
                requirement: "longer than warmup_s by at least one tick",
            });
        }
        positive("average_window_s", self.average_window_s)?;
        if self.bpm_multiplier == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "bpm_multiplier",
                value: 0.0,
                requirement: ">= 1",
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "event_capacity",
                value: 0.0,
                requirement: ">= 1",
            });
        }
        Ok(())
    }

    /// Length of the real FFT feeding the analyzer.
    pub fn fft_len(&self) -> usize {
        self.sampling_rate_constant * 2
    }

    /// Frequency spacing between adjacent bins, in Hz.
    pub fn bin_width_hz(&self) -> f64 {
        (self.sample_rate as f64) * 0.5 / (self.sampling_rate_constant as f64)
    }

    fn ticks(&self, seconds: f64) -> usize {
        (seconds / self.tick_interval_s).round() as usize
    }

    pub fn warmup_ticks(&self) -> usize {
        self.ticks(self.warmup_s)
    }

    /// Total ticks in a session, warm-up included.
    pub fn measure_window_ticks(&self) -> usize {
        self.ticks(self.measure_window_s)
    }

    /// Ticks that contribute to the amplitude history.
    pub fn measured_ticks(&self) -> usize {
        self.measure_window_ticks().saturating_sub(self.warmup_ticks())
    }

    pub fn average_ticks(&self) -> usize {
        self.ticks(self.average_window_s).max(1)
    }

    /// Seconds of signal the count-based scan sees.
    pub fn measured_seconds(&self) -> f64 {
        (self.measured_ticks() as f64) * self.tick_interval_s
    }

    /// Multiplier that would turn a peak count over the measured span into
    /// beats per minute. 4.0 for the default 15 s span.
    pub fn implied_multiplier(&self) -> f64 {
        let secs = self.measured_seconds();
        if secs > 0.0 { 60.0 / secs } else { 0.0 }
    }

    pub fn debounce(&self) -> DebouncePolicy {
        DebouncePolicy {
            secondary_delay: self.secondary_delay_s,
            refractory_interval: self.refractory_interval_s,
        }
    }

    /// Switch to `sample_rate`, pulling the attenuating equalizer below the
    /// new Nyquist frequency if it no longer fits. The band is moved to
    /// span from the low-pass cutoff to 90% of Nyquist. Returns `true` when
    /// the equalizer was moved.
    pub fn fit_to_sample_rate(&mut self, sample_rate: f32) -> bool {
        self.sample_rate = sample_rate;
        let nyquist = sample_rate * 0.5;
        if self.eq_neg_center_hz < nyquist {
            return false;
        }
        let lo = self.low_pass_cutoff_hz;
        let hi = nyquist * 0.9;
        if !(hi > lo) {
            // nothing sensible fits; validate() reports it
            return false;
        }
        self.eq_neg_center_hz = (lo + hi) * 0.5;
        self.eq_neg_width_hz = (hi - lo) * 0.5;
        true
    }

    /// Samples between consecutive ticks at the configured rate.
    pub fn hop_samples(&self) -> usize {
        (((self.sample_rate as f64) * self.tick_interval_s).round() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.fft_len(), 2048);
        assert_eq!(cfg.warmup_ticks(), 100);
        assert_eq!(cfg.measure_window_ticks(), 400);
        assert_eq!(cfg.measured_ticks(), 300);
        assert_eq!(cfg.average_ticks(), 20);
        assert_eq!(cfg.hop_samples(), 2205);
    }

    #[test]
    fn default_multiplier_matches_measured_span() {
        let cfg = Config::default();
        assert_approx(cfg.measured_seconds(), 15.0, 1e-9);
        assert_approx(cfg.implied_multiplier(), cfg.bpm_multiplier as f64, 1e-9);
    }

    #[test]
    fn bin_width_matches_documented_table() {
        let cfg = Config::default();
        assert_approx(cfg.bin_width_hz(), 21.533203125, 1e-9);
    }

    #[test]
    fn negative_bandwidth_is_rejected() {
        let cfg = Config { band_pass_width_hz: -200.0, ..Config::default() };
        match cfg.validate() {
            Err(ConfigError::InvalidParameter { name, .. }) => {
                assert_eq!(name, "band_pass_width_hz");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn equalizer_above_nyquist_is_rejected() {
        let cfg = Config { sample_rate: 16_000.0, ..Config::default() };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::AboveNyquist { name: "eq_neg_center_hz", .. })
        ));
    }

    #[test]
    fn peak_band_must_fit_reported_bins() {
        let cfg = Config { peak_band: 2..=30, ..Config::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::PeakBand { start: 2, end: 30, bins: 25 }));
    }

    #[test]
    fn tick_shorter_than_a_sample_is_rejected() {
        let cfg = Config { tick_interval_s: 1e-7, ..Config::default() };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidParameter { name: "tick_interval_s", .. })
        ));
        // a couple of samples per tick is still allowed
        let cfg = Config { tick_interval_s: 2.0 / 44_100.0, ..Config::default() };
        cfg.validate().unwrap();
    }

    #[test]
    fn low_rate_pulls_cut_band_under_nyquist() {
        let mut cfg = Config::default();
        assert!(cfg.fit_to_sample_rate(16_000.0));
        cfg.validate().unwrap();
        assert_eq!(cfg.sample_rate, 16_000.0);
        assert_approx(cfg.eq_neg_center_hz as f64, 3810.0, 1e-3);
        assert_approx(cfg.eq_neg_width_hz as f64, 3390.0, 1e-3);

        let mut narrow = Config::default();
        assert!(narrow.fit_to_sample_rate(8_000.0));
        narrow.validate().unwrap();
    }

    #[test]
    fn full_rate_keeps_cut_band() {
        let mut cfg = Config::default();
        assert!(!cfg.fit_to_sample_rate(48_000.0));
        assert_eq!(cfg.eq_neg_center_hz, EQ_NEG_CENTER);
        assert_eq!(cfg.eq_neg_width_hz, EQ_NEG_WIDTH);
    }

    #[test]
    fn window_must_outlast_warmup() {
        let cfg = Config { warmup_s: 20.0, ..Config::default() };
        assert!(cfg.validate().is_err());
    }
}
