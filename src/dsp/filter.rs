//! Signal conditioning ahead of the FFT tap.
//!
//! The default chain is boost → low-pass → band-pass → +EQ → −EQ, each a
//! `FilterStage` so a host can swap or drop any of them.

use biquad::{ Biquad, Coefficients, DirectForm2Transposed, Hertz, Type, Q_BUTTERWORTH_F32 };

use crate::config::Config;
use crate::error::ConfigError;

/// One per-sample transform in the conditioning cascade.
pub trait FilterStage: Send {
    fn name(&self) -> &'static str;
    fn process(&mut self, sample: f32) -> f32;
    /// Forget any filter memory.
    fn reset(&mut self);
}

/// Fixed linear gain.
pub struct Gain {
    factor: f32,
}

impl Gain {
    pub fn new(factor: f32) -> Result<Self, ConfigError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "input_gain",
                value: factor as f64,
                requirement: "finite and > 0",
            });
        }
        Ok(Self { factor })
    }
}

impl FilterStage for Gain {
    fn name(&self) -> &'static str {
        "boost"
    }

    #[inline]
    fn process(&mut self, sample: f32) -> f32 {
        sample * self.factor
    }

    fn reset(&mut self) {}
}

/// Second-order section (low-pass, band-pass or peaking EQ).
pub struct BiquadStage {
    name: &'static str,
    coefficients: Coefficients<f32>,
    state: DirectForm2Transposed<f32>,
}

impl BiquadStage {
    fn build(
        name: &'static str,
        kind: Type<f32>,
        sample_rate: f32,
        center_hz: f32,
        q: f32
    ) -> Result<Self, ConfigError> {
        let detail = |e: biquad::Errors| ConfigError::Filter { stage: name, detail: format!("{:?}", e) };
        let fs = Hertz::<f32>::from_hz(sample_rate).map_err(detail)?;
        let f0 = Hertz::<f32>::from_hz(center_hz).map_err(detail)?;
        let coefficients = Coefficients::<f32>::from_params(kind, fs, f0, q).map_err(detail)?;
        Ok(Self {
            name,
            coefficients,
            state: DirectForm2Transposed::<f32>::new(coefficients),
        })
    }

    /// Butterworth low-pass at `cutoff_hz`.
    pub fn low_pass(sample_rate: f32, cutoff_hz: f32) -> Result<Self, ConfigError> {
        Self::build("low-pass", Type::LowPass, sample_rate, cutoff_hz, Q_BUTTERWORTH_F32)
    }

    /// Band-pass spanning `center_hz ± width_hz`.
    pub fn band_pass(sample_rate: f32, center_hz: f32, width_hz: f32) -> Result<Self, ConfigError> {
        let q = quality("band-pass", center_hz, width_hz)?;
        Self::build("band-pass", Type::BandPass, sample_rate, center_hz, q)
    }

    /// Peaking equalizer over `center_hz ± width_hz` with `gain_db` at the center.
    pub fn equalizer(
        name: &'static str,
        sample_rate: f32,
        center_hz: f32,
        width_hz: f32,
        gain_db: f32
    ) -> Result<Self, ConfigError> {
        if !gain_db.is_finite() {
            return Err(ConfigError::Filter { stage: name, detail: format!("gain {gain_db} dB") });
        }
        let q = quality(name, center_hz, width_hz)?;
        Self::build(name, Type::PeakingEQ(gain_db), sample_rate, center_hz, q)
    }
}

/// Q for a band whose edges sit `width_hz` either side of `center_hz`.
fn quality(stage: &'static str, center_hz: f32, width_hz: f32) -> Result<f32, ConfigError> {
    if !(width_hz.is_finite() && width_hz > 0.0) {
        return Err(ConfigError::Filter { stage, detail: format!("bandwidth {width_hz} Hz") });
    }
    Ok(center_hz / (2.0 * width_hz))
}

impl FilterStage for BiquadStage {
    fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    fn process(&mut self, sample: f32) -> f32 {
        self.state.run(sample)
    }

    fn reset(&mut self) {
        self.state = DirectForm2Transposed::<f32>::new(self.coefficients);
    }
}

/// Ordered cascade of stages, applied sample by sample.
pub struct FilterChain {
    stages: Vec<Box<dyn FilterStage>>,
}

impl FilterChain {
    pub fn new(stages: Vec<Box<dyn FilterStage>>) -> Self {
        Self { stages }
    }

    /// The stethoscope cascade described by `cfg`.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let sr = cfg.sample_rate;
        let stages: Vec<Box<dyn FilterStage>> = vec![
            Box::new(Gain::new(cfg.input_gain)?),
            Box::new(BiquadStage::low_pass(sr, cfg.low_pass_cutoff_hz)?),
            Box::new(BiquadStage::band_pass(sr, cfg.band_pass_center_hz, cfg.band_pass_width_hz)?),
            Box::new(
                BiquadStage::equalizer(
                    "equalizer+",
                    sr,
                    cfg.band_pass_center_hz,
                    cfg.band_pass_width_hz,
                    cfg.eq_pos_gain_db
                )?
            ),
            Box::new(
                BiquadStage::equalizer(
                    "equalizer-",
                    sr,
                    cfg.eq_neg_center_hz,
                    cfg.eq_neg_width_hz,
                    cfg.eq_neg_gain_db
                )?
            )
        ];
        Ok(Self::new(stages))
    }

    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        self.stages.iter_mut().fold(sample, |x, stage| stage.process(x))
    }

    pub fn process_block(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            *s = self.process(*s);
        }
    }

    pub fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }

    /// Swap the stage at `index`, returning the old one. Out-of-range
    /// indices hand the new stage back untouched.
    pub fn replace_stage(
        &mut self,
        index: usize,
        stage: Box<dyn FilterStage>
    ) -> Result<Box<dyn FilterStage>, Box<dyn FilterStage>> {
        match self.stages.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, stage)),
            None => Err(stage),
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .map(|s| s.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
