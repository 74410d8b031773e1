//! Tempo estimation from onset periodicity
//!
//! Short-time energy → positive energy flux (onset strength) → autocorrelation
//! over lags covering 60-200 BPM. A log-normal prior centred at 120 BPM
//! breaks ties between a tempo and its half/double.

use super::{extraction_error, DecodedAudio, TempoEstimator};
use crate::error::Result;
use radiohue_common::DescriptorKind;

const MIN_DURATION_SECS: f64 = 2.0;
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;
const PRIOR_CENTER_BPM: f64 = 120.0;

/// Built-in onset-autocorrelation tempo estimator
#[derive(Debug, Clone)]
pub struct OnsetTempoEstimator {
    frame_len: usize,
    hop_len: usize,
}

impl Default for OnsetTempoEstimator {
    fn default() -> Self {
        Self {
            frame_len: 512,
            hop_len: 256,
        }
    }
}

impl OnsetTempoEstimator {
    fn onset_envelope(&self, samples: &[f32]) -> Vec<f64> {
        let energies: Vec<f64> = samples
            .windows(self.frame_len)
            .step_by(self.hop_len)
            .map(|frame| frame.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>())
            .collect();

        let flux: Vec<f64> = energies
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).max(0.0))
            .collect();

        // Triangular smoothing so periods that fall between frames still peak
        const KERNEL: [f64; 5] = [1.0, 2.0, 3.0, 2.0, 1.0];
        (0..flux.len())
            .map(|i| {
                KERNEL
                    .iter()
                    .enumerate()
                    .filter_map(|(k, w)| {
                        (i + k)
                            .checked_sub(2)
                            .and_then(|j| flux.get(j))
                            .map(|v| v * w)
                    })
                    .sum::<f64>()
                    / 9.0
            })
            .collect()
    }
}

impl TempoEstimator for OnsetTempoEstimator {
    fn estimate_bpm(&self, audio: &DecodedAudio) -> Result<f64> {
        let fail = |reason: &str| extraction_error(DescriptorKind::Tempo, reason);

        if audio.duration_secs() < MIN_DURATION_SECS {
            return Err(fail("need at least 2 s of audio"));
        }

        let frame_rate = audio.sample_rate as f64 / self.hop_len as f64;
        let mut envelope = self.onset_envelope(&audio.samples);

        let peak = envelope.iter().cloned().fold(0.0f64, f64::max);
        if peak <= 1e-9 {
            return Err(fail("no onsets detected"));
        }
        let mean = envelope.iter().sum::<f64>() / envelope.len() as f64;
        envelope.iter_mut().for_each(|v| *v -= mean);

        let min_lag = (60.0 * frame_rate / MAX_BPM).floor().max(1.0) as usize;
        let max_lag = (60.0 * frame_rate / MIN_BPM).ceil() as usize;
        if max_lag + 1 >= envelope.len() {
            return Err(fail("onset envelope too short for tempo range"));
        }

        let autocorr = |lag: usize| -> f64 {
            let n = envelope.len() - lag;
            envelope[..n]
                .iter()
                .zip(&envelope[lag..])
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / n as f64
        };

        let scores: Vec<f64> = (min_lag - 1..=max_lag + 1).map(autocorr).collect();
        let score_at = |lag: usize| scores[lag - (min_lag - 1)];

        let mut best_lag = 0usize;
        let mut best_weighted = f64::NEG_INFINITY;
        for lag in min_lag..=max_lag {
            let bpm = 60.0 * frame_rate / lag as f64;
            let octaves = (bpm / PRIOR_CENTER_BPM).log2();
            let weighted = score_at(lag) * (-0.5 * octaves * octaves).exp();
            if weighted > best_weighted {
                best_weighted = weighted;
                best_lag = lag;
            }
        }

        if best_weighted <= 0.0 {
            return Err(fail("no periodic onset pattern"));
        }

        // Parabolic refinement around the peak
        let (left, center, right) = (
            score_at(best_lag - 1),
            score_at(best_lag),
            score_at(best_lag + 1),
        );
        let denom = left - 2.0 * center + right;
        let offset = if denom.abs() > f64::EPSILON {
            (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };

        let bpm = 60.0 * frame_rate / (best_lag as f64 + offset);
        Ok(bpm.clamp(MIN_BPM, MAX_BPM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, sample_rate: u32, seconds: f64) -> DecodedAudio {
        let n = (sample_rate as f64 * seconds) as usize;
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let click_len = (sample_rate as f64 * 0.01) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let bed = 0.05 * (2.0 * std::f32::consts::PI * 220.0 * t).sin();
                let click = if i % period < click_len {
                    0.8 * (2.0 * std::f32::consts::PI * 2000.0 * t).sin()
                } else {
                    0.0
                };
                bed + click
            })
            .collect();
        DecodedAudio::new(samples, sample_rate)
    }

    #[test]
    fn test_detects_click_tempo() {
        let bpm = OnsetTempoEstimator::default()
            .estimate_bpm(&click_track(120.0, 22050, 8.0))
            .unwrap();
        assert!((bpm - 120.0).abs() < 5.0, "estimated {} BPM", bpm);
    }

    #[test]
    fn test_faster_track_reads_faster() {
        let estimator = OnsetTempoEstimator::default();
        let slow = estimator.estimate_bpm(&click_track(90.0, 22050, 8.0)).unwrap();
        let fast = estimator.estimate_bpm(&click_track(150.0, 22050, 8.0)).unwrap();
        assert!(fast > slow, "slow {} fast {}", slow, fast);
    }

    #[test]
    fn test_silence_fails() {
        let silence = DecodedAudio::new(vec![0.0; 22050 * 4], 22050);
        assert!(OnsetTempoEstimator::default().estimate_bpm(&silence).is_err());
    }

    #[test]
    fn test_short_audio_fails() {
        let short = click_track(120.0, 22050, 1.0);
        assert!(OnsetTempoEstimator::default().estimate_bpm(&short).is_err());
    }
}
