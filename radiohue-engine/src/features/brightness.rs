//! Spectral brightness as the mean spectral centroid

use super::{extraction_error, BrightnessMeter, DecodedAudio};
use crate::error::Result;
use radiohue_common::DescriptorKind;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Built-in STFT spectral centroid meter
///
/// Hann-windowed frames; the result is the plain mean of per-frame centroids.
/// Silent frames contribute a centroid of zero.
#[derive(Debug, Clone)]
pub struct SpectralCentroidMeter {
    frame_len: usize,
    hop_len: usize,
}

impl Default for SpectralCentroidMeter {
    fn default() -> Self {
        Self {
            frame_len: 2048,
            hop_len: 512,
        }
    }
}

impl BrightnessMeter for SpectralCentroidMeter {
    fn brightness_hz(&self, audio: &DecodedAudio) -> Result<f64> {
        if audio.samples.len() < self.frame_len {
            return Err(extraction_error(
                DescriptorKind::Brightness,
                "audio shorter than one analysis frame",
            ));
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(self.frame_len);
        let window: Vec<f32> = (0..self.frame_len)
            .map(|i| {
                0.5 - 0.5
                    * (2.0 * std::f32::consts::PI * i as f32 / self.frame_len as f32).cos()
            })
            .collect();
        let bin_hz = audio.sample_rate as f64 / self.frame_len as f64;

        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.frame_len];
        let mut centroid_sum = 0.0f64;
        let mut frames = 0usize;

        for frame in audio.samples.windows(self.frame_len).step_by(self.hop_len) {
            for ((slot, &sample), &w) in buffer.iter_mut().zip(frame).zip(&window) {
                *slot = Complex::new(sample * w, 0.0);
            }
            fft.process(&mut buffer);

            let (weighted, total) = buffer[..=self.frame_len / 2].iter().enumerate().fold(
                (0.0f64, 0.0f64),
                |(weighted, total), (bin, value)| {
                    let magnitude = value.norm() as f64;
                    (weighted + bin as f64 * bin_hz * magnitude, total + magnitude)
                },
            );

            if total > 0.0 {
                centroid_sum += weighted / total;
            }
            frames += 1;
        }

        Ok(centroid_sum / frames as f64)
    }
}
