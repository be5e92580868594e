//! Session lifecycle and the per-tick pipeline.
//!
//! `Idle → Thresholding → Measuring → Stopped`. A host calls `tick()` once
//! per `tick_interval_s`; the session never schedules anything itself.

use std::sync::Arc;

use crossbeam_channel::{ bounded, Receiver, Sender, TrySendError };

use crate::bpm::{ BpmEstimator, BpmSample };
use crate::config::Config;
use crate::detector::{ find_peaks, PeakDetector, PeakEvent };
use crate::dsp::spectrum::{ InputReport, SpectralAnalyzer, SpectralFrame, SpectrumTap };
use crate::error::ConfigError;
use crate::logger::Logger;
use crate::store::RollingStore;
use crate::{ log_debug, log_info, log_warn };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Warm-up: frames update the dynamic threshold only.
    Thresholding,
    Measuring,
    Stopped,
}

impl Phase {
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Thresholding | Phase::Measuring)
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged {
        timestamp: f64,
        phase: Phase,
    },
    TickUpdated {
        timestamp: f64,
        frame: Arc<SpectralFrame>,
        dynamic_threshold: f64,
        phase: Phase,
    },
    PeakConfirmed(PeakEvent),
    BpmEstimated {
        timestamp: f64,
        bpm: u32,
        is_final: bool,
    },
}

/// Result of a session that ran its full measurement window.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub bpm: u32,
    /// Local maxima counted over the amplitude history.
    pub peak_count: usize,
    pub confirmed_peaks: Vec<PeakEvent>,
    pub bpm_series: Vec<BpmSample>,
    pub ticks: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No session running; the input was ignored.
    Inactive,
    Thresholding {
        dynamic_threshold: f64,
    },
    Measuring {
        peak: Option<PeakEvent>,
        bpm: u32,
    },
    Finished(SessionSummary),
}

pub struct Session {
    config: Config,
    logger: Arc<Logger>,
    analyzer: SpectralAnalyzer,
    tap: SpectrumTap,
    store: RollingStore,
    detector: PeakDetector,
    estimator: BpmEstimator,
    phase: Phase,
    ticks: usize,
    summary: Option<SessionSummary>,
    subscribers: Vec<Sender<SessionEvent>>,
    dropped_events: u64,
}

impl Session {
    pub fn new(config: Config, logger: Arc<Logger>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            analyzer: SpectralAnalyzer::new(&config),
            tap: SpectrumTap::new(config.fft_len()),
            store: RollingStore::new(config.measured_ticks(), config.average_ticks()),
            detector: PeakDetector::from_config(&config),
            estimator: BpmEstimator::new(config.bpm_multiplier),
            phase: Phase::Idle,
            ticks: 0,
            summary: None,
            subscribers: Vec::new(),
            dropped_events: 0,
            config,
            logger,
        })
    }

    /// New event stream. Events are dropped (and counted) when a
    /// subscriber falls `event_capacity` events behind.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = bounded(self.config.event_capacity);
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: SessionEvent) {
        let mut dropped = 0u64;
        self.subscribers.retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        if dropped > 0 {
            self.dropped_events += dropped;
            let _ = log_debug!(self.logger, "event queue full, {} events dropped so far", self.dropped_events);
        }
    }

    fn timestamp(&self) -> f64 {
        (self.ticks as f64) * self.config.tick_interval_s
    }

    fn reset_state(&mut self) {
        self.store.clear();
        self.detector.reset();
        self.estimator.reset();
        self.ticks = 0;
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        let timestamp = self.timestamp();
        self.emit(SessionEvent::PhaseChanged { timestamp, phase });
    }

    /// Begin a session. Returns `false` (and changes nothing) if one is
    /// already running.
    pub fn start(&mut self) -> bool {
        if self.phase.is_running() {
            let _ = self.logger.warn("start() while a session is running; ignored");
            return false;
        }
        self.reset_state();
        self.summary = None;

        let cfg = &self.config;
        let _ = log_info!(
            self.logger,
            "session start  warmup={:.2}s window={:.2}s tick={:.3}s band={}..={} threshold={:.1}dB",
            cfg.warmup_s,
            cfg.measure_window_s,
            cfg.tick_interval_s,
            cfg.peak_band.start(),
            cfg.peak_band.end(),
            cfg.peak_threshold_db
        );
        let policy = self.detector.policy();
        if policy.is_ambiguous() {
            let _ = log_warn!(
                self.logger,
                "secondary delay {:.3}s and refractory interval {:.3}s differ; peaks are spaced by {:.3}s",
                policy.secondary_delay,
                policy.refractory_interval,
                policy.min_gap()
            );
        }
        let implied = cfg.implied_multiplier();
        if ((cfg.bpm_multiplier as f64) - implied).abs() > 1e-6 {
            let _ = log_warn!(
                self.logger,
                "bpm multiplier {} does not match the {:.2}s measured span (implies {:.3})",
                cfg.bpm_multiplier,
                cfg.measured_seconds(),
                implied
            );
        }

        let first = if self.config.warmup_ticks() == 0 { Phase::Measuring } else { Phase::Thresholding };
        self.set_phase(first);
        true
    }

    /// Abort the session and clear all rolling state. A second call is a
    /// no-op returning `false`.
    pub fn stop(&mut self) -> bool {
        if !self.phase.is_running() {
            return false;
        }
        let timestamp = self.timestamp();
        let _ = log_info!(self.logger, "session stopped at {:.2}s", timestamp);
        self.reset_state();
        self.phase = Phase::Stopped;
        self.emit(SessionEvent::PhaseChanged { timestamp, phase: Phase::Stopped });
        true
    }

    /// Advance one tick with an interleaved FFT buffer.
    pub fn tick(&mut self, interleaved: &[f32]) -> TickOutcome {
        if !self.phase.is_running() {
            return TickOutcome::Inactive;
        }
        let (frame, report) = self.analyzer.analyze(interleaved);
        self.advance(frame, report)
    }

    /// Advance one tick from conditioned time-domain samples; only the
    /// newest `fft_len` samples are used.
    pub fn tick_samples(&mut self, samples: &[f32]) -> TickOutcome {
        if !self.phase.is_running() {
            return TickOutcome::Inactive;
        }
        let (frame, report) = self.analyzer.analyze(self.tap.process(samples));
        self.advance(frame, report)
    }

    fn advance(&mut self, frame: SpectralFrame, report: InputReport) -> TickOutcome {
        let timestamp = self.timestamp();
        if !report.is_clean() {
            let _ = log_warn!(
                self.logger,
                "t={:.2}s sanitized spectral input: {} missing bins, {} non-finite values",
                timestamp,
                report.missing_bins,
                report.non_finite
            );
        }

        let frame = Arc::new(frame);
        let amplitude = frame.max_db();
        self.store.update_frame(frame.clone());

        let outcome = match self.phase {
            Phase::Measuring => {
                self.store.record(amplitude);
                let peak = self.detector.scan(timestamp, &frame);
                let (amps, avgs) = self.store.history();
                let bpm = self.estimator.update(timestamp, amps, avgs);
                TickOutcome::Measuring { peak, bpm }
            }
            _ => {
                let dynamic_threshold = self.store.observe(amplitude);
                TickOutcome::Thresholding { dynamic_threshold }
            }
        };

        let dynamic_threshold = self.store.dynamic_threshold();
        let phase = self.phase;
        self.emit(SessionEvent::TickUpdated { timestamp, frame, dynamic_threshold, phase });
        if let TickOutcome::Measuring { peak, bpm } = &outcome {
            if let Some(event) = peak {
                let _ = log_info!(
                    self.logger,
                    "peak t={:.2}s bin={} ({:.1} Hz) {:.1}dB",
                    event.timestamp,
                    event.bin,
                    self.analyzer.frequency_of(event.bin),
                    event.magnitude_db
                );
                self.emit(SessionEvent::PeakConfirmed(*event));
            }
            let bpm = *bpm;
            self.emit(SessionEvent::BpmEstimated { timestamp, bpm, is_final: false });
        }

        self.ticks += 1;
        if self.phase == Phase::Thresholding && self.ticks >= self.config.warmup_ticks() {
            let _ = log_info!(
                self.logger,
                "warm-up done, dynamic threshold {:.1}dB",
                self.store.dynamic_threshold()
            );
            self.set_phase(Phase::Measuring);
        }
        if self.ticks >= self.config.measure_window_ticks() {
            return TickOutcome::Finished(self.finish());
        }
        outcome
    }

    fn finish(&mut self) -> SessionSummary {
        let timestamp = self.timestamp();
        let (amps, avgs) = self.store.history();
        let peak_count = find_peaks(amps, avgs).len();
        let bpm = self.estimator.bpm_for(peak_count);
        let summary = SessionSummary {
            bpm,
            peak_count,
            confirmed_peaks: self.detector.events().to_vec(),
            bpm_series: self.estimator.series().to_vec(),
            ticks: self.ticks,
        };
        let _ = log_info!(
            self.logger,
            "session complete  bpm={} peaks={} confirmed={} ticks={}",
            summary.bpm,
            summary.peak_count,
            summary.confirmed_peaks.len(),
            summary.ticks
        );
        self.emit(SessionEvent::BpmEstimated { timestamp, bpm, is_final: true });

        self.reset_state();
        self.summary = Some(summary.clone());
        self.phase = Phase::Stopped;
        self.emit(SessionEvent::PhaseChanged { timestamp, phase: Phase::Stopped });
        summary
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Seconds since session start (0 outside a session).
    pub fn elapsed(&self) -> f64 {
        self.timestamp()
    }

    pub fn latest_spectral_frame(&self) -> Option<Arc<SpectralFrame>> {
        self.store.latest_frame()
    }

    pub fn latest_dynamic_threshold(&self) -> f64 {
        self.store.dynamic_threshold()
    }

    /// Live estimate while measuring, the final value once complete.
    pub fn current_bpm_estimate(&self) -> u32 {
        match &self.summary {
            Some(summary) if !self.phase.is_running() => summary.bpm,
            _ => self.estimator.current(),
        }
    }

    pub fn confirmed_peaks(&self) -> &[PeakEvent] {
        self.detector.events()
    }

    pub fn last_accepted_peak(&self) -> Option<f64> {
        self.detector.last_accepted()
    }

    pub fn bpm_series(&self) -> &[BpmSample] {
        self.estimator.series()
    }

    pub fn amplitude_history(&self) -> Vec<f64> {
        self.store.amplitude_history()
    }

    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Filter memory belongs to the host, but the tap is ours.
    pub fn fft_len(&self) -> usize {
        self.tap.fft_len()
    }
}

/// Drive `session` across an already-conditioned recording, one tick per
/// `hop_samples()`. Starts the session if needed; returns the summary when
/// the recording covers the whole window, otherwise stops the session and
/// returns `None`.
pub fn replay(session: &mut Session, conditioned: &[f32]) -> Option<SessionSummary> {
    if !session.phase().is_running() {
        session.start();
    }
    let hop = session.config().hop_samples();
    let fft_len = session.fft_len();
    let mut end = hop;
    while end <= conditioned.len() {
        let start = end.saturating_sub(fft_len);
        if let TickOutcome::Finished(summary) = session.tick_samples(&conditioned[start..end]) {
            return Some(summary);
        }
        end += hop;
    }
    let _ = log_warn!(
        session.logger,
        "recording ended after {:.2}s, before the {:.2}s window closed",
        (conditioned.len() as f64) / (session.config().sample_rate as f64),
        session.config().measure_window_s
    );
    session.stop();
    None
}
