//! Per-fragment signal conditioning
//!
//! Applied by the capture collector to every completed fragment:
//! a noise gate (noise suppression) followed by automatic gain control.

use crate::audio::source::CaptureConstraints;

/// Peak level the gain control steers towards
const TARGET_PEAK: f32 = 0.7;

/// Fraction of the distance to the desired gain covered per fragment
const GAIN_SMOOTHING: f32 = 0.3;

/// Noise gate and automatic gain control for mono f32 fragments
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    noise_gate: bool,
    auto_gain: bool,
    silence_threshold: f32,
    max_gain: f32,
    current_gain: f32,
}

impl SignalConditioner {
    pub fn new(constraints: &CaptureConstraints) -> Self {
        Self {
            noise_gate: constraints.noise_suppression,
            auto_gain: constraints.auto_gain_control,
            silence_threshold: constraints.silence_threshold.max(0.0),
            max_gain: constraints.max_gain.max(1.0),
            current_gain: 1.0,
        }
    }

    /// Condition one fragment in place
    pub fn apply(&mut self, fragment: &mut [f32]) {
        if fragment.is_empty() {
            return;
        }

        if self.noise_gate && rms(fragment) < self.silence_threshold {
            fragment.fill(0.0);
            return;
        }

        if self.auto_gain {
            let peak = fragment.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            if peak > 0.0 {
                let desired = (TARGET_PEAK / peak).clamp(1.0, self.max_gain);
                self.current_gain += (desired - self.current_gain) * GAIN_SMOOTHING;
            }
            for sample in fragment.iter_mut() {
                *sample = (*sample * self.current_gain).clamp(-1.0, 1.0);
            }
        }
    }

    pub fn current_gain(&self) -> f32 {
        self.current_gain
    }
}

/// Root mean square level of a block
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Convert f32 samples (range: -1.0 to 1.0) to i16 PCM
pub fn f32_to_i16_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}
