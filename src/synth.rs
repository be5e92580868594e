//! Synthetic stethoscope input: a lub-dub pair per beat, silence between.
//! Stands in for the microphone when exercising the pipeline.

use std::f32::consts::PI;

#[derive(Clone, Debug, PartialEq)]
pub struct Heartbeat {
    pub bpm: f32,
    pub amplitude: f32,
    /// First heart sound: tone frequency (Hz) and duration (s).
    pub s1_hz: f32,
    pub s1_len_s: f32,
    /// Second heart sound, starting `s2_offset_s` after S1.
    pub s2_hz: f32,
    pub s2_len_s: f32,
    pub s2_offset_s: f32,
    pub s2_gain: f32,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            bpm: 72.0,
            amplitude: 0.3,
            s1_hz: 86.0,
            s1_len_s: 0.08,
            s2_hz: 129.0,
            s2_len_s: 0.06,
            s2_offset_s: 0.28,
            s2_gain: 0.6,
        }
    }
}

/// Hann-shaped tone burst added into `out` starting at `start`.
fn add_burst(out: &mut [f32], sr: f32, start: usize, len: usize, freq: f32, amp: f32) {
    for j in 0..len {
        let Some(slot) = out.get_mut(start + j) else {
            break;
        };
        let env = (PI * (j as f32) / (len as f32)).sin().powi(2);
        *slot += amp * env * ((2.0 * PI * freq * (j as f32)) / sr).sin();
    }
}

impl Heartbeat {
    pub fn with_bpm(bpm: f32) -> Self {
        Self { bpm, ..Self::default() }
    }

    pub fn period_s(&self) -> f32 {
        60.0 / self.bpm
    }

    /// Render `seconds` of signal at `sample_rate`. Beats start at t = 0.
    /// A rate with no usable period (zero, negative, non-finite, or shorter
    /// than one sample) renders silence.
    pub fn render(&self, sample_rate: f32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate * seconds).max(0.0) as usize;
        let mut out = vec![0.0f32; n];
        let sr = sample_rate as f64;
        let period = self.period_s() as f64;
        if !(sr > 0.0) || !(period.is_finite() && period * sr >= 1.0) {
            return out;
        }
        let s1_len = (self.s1_len_s * sample_rate) as usize;
        let s2_len = (self.s2_len_s * sample_rate) as usize;
        for beat in 0usize.. {
            let t0 = (beat as f64) * period;
            let start = (t0 * sr) as usize;
            if start >= n {
                break;
            }
            add_burst(&mut out, sample_rate, start, s1_len, self.s1_hz, self.amplitude);
            let s2_start = ((t0 + (self.s2_offset_s as f64)) * sr) as usize;
            add_burst(
                &mut out,
                sample_rate,
                s2_start,
                s2_len,
                self.s2_hz,
                self.amplitude * self.s2_gain
            );
        }
        out
    }
}
