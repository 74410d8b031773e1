//! Audio Test Fixture Generator
//!
//! Builds in-memory WAV files with a steady beat over a quiet tone bed, so
//! every built-in descriptor has something to measure.

use std::io::Cursor;

/// Parameters of a generated click track
#[derive(Debug, Clone)]
pub struct ClickTrack {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub bpm: f64,
}

impl Default for ClickTrack {
    fn default() -> Self {
        Self {
            duration_seconds: 4.0,
            sample_rate: 22050,
            bpm: 120.0,
        }
    }
}

/// Render a mono 16-bit WAV into memory
pub fn click_track_wav(track: &ClickTrack) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: track.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        let total = (track.duration_seconds * track.sample_rate as f64) as usize;
        let period = (60.0 / track.bpm * track.sample_rate as f64) as usize;
        let click_len = track.sample_rate as usize / 100;

        for i in 0..total {
            let t = i as f64 / track.sample_rate as f64;
            let bed = 0.05 * (2.0 * std::f64::consts::PI * 220.0 * t).sin();
            let click = if i % period < click_len {
                0.7 * (2.0 * std::f64::consts::PI * 2000.0 * t).sin()
            } else {
                0.0
            };
            let sample = ((bed + click) * i16::MAX as f64) as i16;
            writer.write_sample(sample).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}
