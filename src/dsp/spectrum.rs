//! FFT tap and magnitude spectrum.
//!
//! The tap turns the newest conditioned samples into an interleaved
//! `[re0, im0, re1, im1, ...]` buffer; the analyzer turns that buffer into
//! a `SpectralFrame` on the stethoscope's dB scale.

use std::ops::RangeInclusive;
use std::sync::Arc;

use realfft::{ num_complex::Complex, RealFftPlanner, RealToComplex };

use crate::config::Config;

/// Added to every dB value so typical levels stay positive. Every threshold
/// compared against `SpectralFrame::magnitudes_db` is on this scale.
pub const DB_OFFSET: f64 = 200.0;

/// Normalized magnitudes are clamped here before the log, so silence reads
/// exactly 0 dB after the offset.
pub const MAGNITUDE_FLOOR: f64 = 1e-10;

/// One analysis tick worth of spectrum. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    frequencies: Vec<f64>,
    magnitudes_db: Vec<f64>,
}

impl SpectralFrame {
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn magnitudes_db(&self) -> &[f64] {
        &self.magnitudes_db
    }

    pub fn len(&self) -> usize {
        self.magnitudes_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes_db.is_empty()
    }

    /// Loudest bin as `(bin, dB)`; ties resolve to the lower bin.
    pub fn peak(&self) -> Option<(usize, f64)> {
        strongest(self.magnitudes_db.iter().copied().enumerate())
    }

    /// Loudest value in the frame, 0 dB for an empty frame.
    pub fn max_db(&self) -> f64 {
        self.peak()
            .map(|(_, db)| db)
            .unwrap_or(0.0)
    }

    /// Loudest bin inside `band`, clipped to the frame.
    pub fn strongest_in(&self, band: &RangeInclusive<usize>) -> Option<(usize, f64)> {
        let start = *band.start();
        let end = (*band.end()).min(self.len().saturating_sub(1));
        if self.is_empty() || start > end {
            return None;
        }
        strongest((start..=end).map(|i| (i, self.magnitudes_db[i])))
    }
}

fn strongest(values: impl Iterator<Item = (usize, f64)>) -> Option<(usize, f64)> {
    values.fold(None, |best, (i, v)| {
        match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        }
    })
}

/// What the analyzer had to repair in its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputReport {
    /// Bins with no data because the buffer was short.
    pub missing_bins: usize,
    /// NaN/±inf components replaced by zero.
    pub non_finite: usize,
}

impl InputReport {
    pub fn is_clean(&self) -> bool {
        self.missing_bins == 0 && self.non_finite == 0
    }
}

pub struct SpectralAnalyzer {
    bins: usize,
    sampling_rate_constant: f64,
    sample_rate: f64,
}

impl SpectralAnalyzer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            bins: cfg.bins,
            sampling_rate_constant: cfg.sampling_rate_constant as f64,
            sample_rate: cfg.sample_rate as f64,
        }
    }

    /// Interleaved values needed for a complete frame.
    pub fn required_len(&self) -> usize {
        2 * (self.bins + 1)
    }

    pub fn frequency_of(&self, bin: usize) -> f64 {
        (self.sample_rate * 0.5 * (bin as f64)) / self.sampling_rate_constant
    }

    /// Build a frame of `bins + 1` entries. Never fails: short buffers and
    /// non-finite components are repaired and counted in the report.
    pub fn analyze(&self, interleaved: &[f32]) -> (SpectralFrame, InputReport) {
        let mut report = InputReport::default();
        let mut sanitize = |v: Option<&f32>| -> f64 {
            match v {
                Some(x) if x.is_finite() => *x as f64,
                Some(_) => {
                    report.non_finite += 1;
                    0.0
                }
                None => 0.0,
            }
        };

        let n = self.bins + 1;
        let mut frequencies = Vec::with_capacity(n);
        let mut magnitudes_db = Vec::with_capacity(n);
        for i in 0..n {
            let re = sanitize(interleaved.get(2 * i));
            let im = sanitize(interleaved.get(2 * i + 1));
            let norm = (2.0 * (re * re + im * im).sqrt()) / self.sampling_rate_constant;
            let db = 20.0 * norm.max(MAGNITUDE_FLOOR).log10() + DB_OFFSET;

            frequencies.push(self.frequency_of(i));
            magnitudes_db.push(db);
        }
        report.missing_bins = n.saturating_sub(interleaved.len() / 2);

        (SpectralFrame { frequencies, magnitudes_db }, report)
    }
}

/// Hann-windowed real FFT over the newest `fft_len` samples.
pub struct SpectrumTap {
    r2c: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    inbuf: Vec<f32>,
    outbuf: Vec<Complex<f32>>,
    interleaved: Vec<f32>,
}

#[inline]
fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = (std::f32::consts::PI * (i as f32)) / (n as f32);
            t.sin() * t.sin()
        })
        .collect()
}

impl SpectrumTap {
    pub fn new(fft_len: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(fft_len);
        let inbuf = r2c.make_input_vec();
        let outbuf = r2c.make_output_vec();
        let interleaved = vec![0.0f32; outbuf.len() * 2];
        Self {
            r2c,
            window: hann(fft_len),
            inbuf,
            outbuf,
            interleaved,
        }
    }

    pub fn fft_len(&self) -> usize {
        self.window.len()
    }

    /// Transform the last `fft_len` samples of `samples`. Shorter input is
    /// zero-padded at the front, so the newest sample always lands last.
    pub fn process(&mut self, samples: &[f32]) -> &[f32] {
        let n = self.fft_len();
        let take = samples.len().min(n);
        let pad = n - take;
        let recent = &samples[samples.len() - take..];

        self.inbuf[..pad].fill(0.0);
        for (j, &s) in recent.iter().enumerate() {
            let k = pad + j;
            self.inbuf[k] = if s.is_finite() { s * self.window[k] } else { 0.0 };
        }

        // buffer lengths come from the plan itself
        if self.r2c.process(&mut self.inbuf, &mut self.outbuf).is_err() {
            self.interleaved.fill(0.0);
            return &self.interleaved;
        }
        for (k, c) in self.outbuf.iter().enumerate() {
            self.interleaved[2 * k] = c.re;
            self.interleaved[2 * k + 1] = c.im;
        }
        &self.interleaved
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

    fn assert_frame_invariants(frame: &SpectralFrame) {
        assert_eq!(frame.frequencies().len(), frame.magnitudes_db().len());
        assert!(frame.frequencies().windows(2).all(|w| w[0] <= w[1]));
        assert!(frame.magnitudes_db().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn frequency_table_matches_bin_spacing() {
        let analyzer = SpectralAnalyzer::new(&Config::default());
        assert_approx(analyzer.frequency_of(1), 21.533203125, 1e-9);
        assert_approx(analyzer.frequency_of(2), 43.06640625, 1e-9);
        assert_approx(analyzer.frequency_of(8), 172.265625, 1e-9);
        assert_approx(analyzer.frequency_of(25), 538.330078125, 1e-9);
    }

    #[test]
    fn silence_maps_to_zero_db() {
        let analyzer = SpectralAnalyzer::new(&Config::default());
        let (frame, report) = analyzer.analyze(&vec![0.0; analyzer.required_len()]);
        assert!(report.is_clean());
        assert_eq!(frame.len(), 26);
        assert_frame_invariants(&frame);
        assert!(frame.magnitudes_db().iter().all(|&db| db == 0.0));
    }

    #[test]
    fn non_finite_and_short_input_are_sanitized() {
        let analyzer = SpectralAnalyzer::new(&Config::default());
        let buf = [f32::NAN, 1.0, f32::INFINITY, f32::NEG_INFINITY, 3.0, 4.0];
        let (frame, report) = analyzer.analyze(&buf);

        assert_eq!(frame.len(), 26);
        assert_frame_invariants(&frame);
        assert_eq!(report.non_finite, 3);
        assert_eq!(report.missing_bins, 23);
        // bin 2 carries |3 + 4i| = 5
        let expected = 20.0 * ((2.0 * 5.0) / 1024.0f64).log10() + DB_OFFSET;
        assert_approx(frame.magnitudes_db()[2], expected, 1e-9);
    }

    #[test]
    fn synthetic_bin_is_the_peak() {
        let analyzer = SpectralAnalyzer::new(&Config::default());
        let mut buf = vec![0.0f32; analyzer.required_len()];
        buf[2 * 5] = 300.0;
        buf[2 * 5 + 1] = -400.0;

        let (frame, _) = analyzer.analyze(&buf);
        assert_eq!(frame.peak().map(|(bin, _)| bin), Some(5));
        assert_eq!(frame.strongest_in(&(2..=8)).map(|(bin, _)| bin), Some(5));
        assert!(frame.strongest_in(&(6..=8)).is_some());
        assert_eq!(frame.strongest_in(&(40..=50)), None);
    }

    #[test]
    fn tone_through_tap_lands_in_its_bin() {
        let cfg = Config::default();
        let analyzer = SpectralAnalyzer::new(&cfg);
        let mut tap = SpectrumTap::new(cfg.fft_len());
        let bin = 6usize;
        let freq = (bin as f64) * cfg.bin_width_hz();
        let samples: Vec<f32> = (0..cfg.fft_len())
            .map(|i| {
                let t = (i as f64) / (cfg.sample_rate as f64);
                (0.5 * (2.0 * std::f64::consts::PI * freq * t).sin()) as f32
            })
            .collect();

        let (frame, report) = analyzer.analyze(tap.process(&samples));
        assert!(report.is_clean());
        assert_frame_invariants(&frame);

        let (peak_bin, peak_db) = frame.peak().unwrap();
        assert!(peak_bin.abs_diff(bin) <= 1, "peak at bin {peak_bin}");
        assert!((frame.frequencies()[peak_bin] - freq).abs() <= cfg.bin_width_hz());
        // Hann coherent gain 0.5: 2 * (0.5 * 1024 * 0.5) / 1024 = 0.5
        assert_approx(peak_db, 20.0 * 0.5f64.log10() + DB_OFFSET, 0.5);
    }

    #[test]
    fn short_sample_window_is_front_padded() {
        let mut tap = SpectrumTap::new(2048);
        let out = tap.process(&[0.0; 100]).to_vec();
        assert_eq!(out.len(), 2 * 1025);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
