//! Integrated loudness (ITU-R BS.1770)
//!
//! K-weighting (high shelf then high pass), mean square over 400 ms blocks
//! with 75% overlap, absolute gate at -70 LUFS and relative gate 10 LU below
//! the absolute-gated level.

use super::{extraction_error, DecodedAudio, LoudnessMeter};
use crate::error::Result;
use radiohue_common::DescriptorKind;
use std::f64::consts::PI;

const BLOCK_SECS: f64 = 0.4;
const STEP_SECS: f64 = 0.1;
const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;

/// Second-order IIR section, direct form I
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
}

impl Biquad {
    /// Pre-filter stage 1: models the acoustic effect of the head
    fn high_shelf(sample_rate: f64) -> Self {
        let f0 = 1681.974450955533;
        let gain_db = 3.999843853973347;
        let q = 0.7071752369554196;

        let k = (PI * f0 / sample_rate).tan();
        let vh = 10f64.powf(gain_db / 20.0);
        let vb = vh.powf(0.4996667741545416);
        let a0 = 1.0 + k / q + k * k;

        Self {
            b: [
                (vh + vb * k / q + k * k) / a0,
                2.0 * (k * k - vh) / a0,
                (vh - vb * k / q + k * k) / a0,
            ],
            a: [2.0 * (k * k - 1.0) / a0, (1.0 - k / q + k * k) / a0],
        }
    }

    /// Pre-filter stage 2: RLB high pass
    fn high_pass(sample_rate: f64) -> Self {
        let f0 = 38.13547087602444;
        let q = 0.5003270373238773;

        let k = (PI * f0 / sample_rate).tan();
        let a0 = 1.0 + k / q + k * k;

        Self {
            b: [1.0, -2.0, 1.0],
            a: [2.0 * (k * k - 1.0) / a0, (1.0 - k / q + k * k) / a0],
        }
    }

    fn apply(&self, input: &[f64]) -> Vec<f64> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        input
            .iter()
            .map(|&x| {
                let y = self.b[0] * x + self.b[1] * x1 + self.b[2] * x2
                    - self.a[0] * y1
                    - self.a[1] * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

fn block_loudness(mean_square: f64) -> f64 {
    -0.691 + 10.0 * mean_square.log10()
}

/// Built-in BS.1770 integrated loudness meter
#[derive(Debug, Clone, Default)]
pub struct IntegratedLoudnessMeter;

impl LoudnessMeter for IntegratedLoudnessMeter {
    fn integrated_lufs(&self, audio: &DecodedAudio) -> Result<f64> {
        let fail = |reason: &str| extraction_error(DescriptorKind::Loudness, reason);

        let sample_rate = audio.sample_rate as f64;
        let block_len = (BLOCK_SECS * sample_rate).round() as usize;
        let step_len = (STEP_SECS * sample_rate).round() as usize;
        if block_len == 0 || step_len == 0 || audio.samples.len() < block_len {
            return Err(fail("audio shorter than one 400 ms block"));
        }

        let input: Vec<f64> = audio.samples.iter().map(|&s| s as f64).collect();
        let weighted = Biquad::high_pass(sample_rate).apply(&Biquad::high_shelf(sample_rate).apply(&input));

        let blocks: Vec<f64> = (0..=(weighted.len() - block_len) / step_len)
            .map(|i| {
                let block = &weighted[i * step_len..i * step_len + block_len];
                block.iter().map(|y| y * y).sum::<f64>() / block_len as f64
            })
            .collect();

        let above_absolute: Vec<f64> = blocks
            .iter()
            .copied()
            .filter(|&z| z > 0.0 && block_loudness(z) > ABSOLUTE_GATE_LUFS)
            .collect();
        if above_absolute.is_empty() {
            return Err(fail("all blocks below the absolute gate"));
        }

        let mean = |zs: &[f64]| zs.iter().sum::<f64>() / zs.len() as f64;
        let relative_gate = block_loudness(mean(&above_absolute)) + RELATIVE_GATE_LU;

        let gated: Vec<f64> = above_absolute
            .into_iter()
            .filter(|&z| block_loudness(z) > relative_gate)
            .collect();
        if gated.is_empty() {
            return Err(fail("all blocks below the relative gate"));
        }

        Ok(block_loudness(mean(&gated)))
    }
}
