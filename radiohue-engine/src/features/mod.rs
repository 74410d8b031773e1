//! Descriptor extraction
//!
//! The facade turns a decoded artifact into a [`RawDescriptorSet`] by running
//! three independent capabilities: tempo, integrated loudness and spectral
//! brightness. Each capability sits behind its own trait so an external
//! analyser can replace the built-in one.
//!
//! Extraction is all-or-nothing. If any capability fails the whole call
//! fails with `Error::Extraction` and no partial set escapes.

mod brightness;
mod loudness;
mod tempo;

pub use brightness::SpectralCentroidMeter;
pub use loudness::IntegratedLoudnessMeter;
pub use tempo::OnsetTempoEstimator;

use crate::error::{Error, Result};
use crate::transcoder::DecodedArtifact;
use radiohue_common::DescriptorKind;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

/// Mono PCM samples in [-1.0, 1.0]
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Load a decoded sibling written by the transcoder
    pub fn load_wav(path: &Path) -> Result<Self> {
        let decode_error = |reason: String| Error::Decode {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = hound::WavReader::open(path)
            .map_err(|e| decode_error(format!("cannot open decoded audio: {}", e)))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| decode_error(e.to_string()))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| decode_error(e.to_string()))?
            }
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        Ok(Self::new(samples, spec.sample_rate))
    }
}

/// Raw perceptual descriptors of one capture
///
/// Ephemeral: produced and consumed within one pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDescriptorSet {
    pub tempo_bpm: f64,
    pub loudness_lufs: f64,
    pub brightness_hz: f64,
}

impl RawDescriptorSet {
    pub fn value(&self, kind: DescriptorKind) -> f64 {
        match kind {
            DescriptorKind::Tempo => self.tempo_bpm,
            DescriptorKind::Loudness => self.loudness_lufs,
            DescriptorKind::Brightness => self.brightness_hz,
        }
    }
}

/// Tempo estimation capability
pub trait TempoEstimator: Send + Sync {
    fn estimate_bpm(&self, audio: &DecodedAudio) -> Result<f64>;
}

/// Integrated loudness capability
pub trait LoudnessMeter: Send + Sync {
    fn integrated_lufs(&self, audio: &DecodedAudio) -> Result<f64>;
}

/// Spectral brightness capability
pub trait BrightnessMeter: Send + Sync {
    fn brightness_hz(&self, audio: &DecodedAudio) -> Result<f64>;
}

pub(crate) fn extraction_error(descriptor: DescriptorKind, reason: impl Into<String>) -> Error {
    Error::Extraction {
        descriptor,
        reason: reason.into(),
    }
}

/// Runs the three capabilities and assembles the descriptor set
#[derive(Clone)]
pub struct FeatureExtractionFacade {
    tempo: Arc<dyn TempoEstimator>,
    loudness: Arc<dyn LoudnessMeter>,
    brightness: Arc<dyn BrightnessMeter>,
}

impl FeatureExtractionFacade {
    pub fn new(
        tempo: Arc<dyn TempoEstimator>,
        loudness: Arc<dyn LoudnessMeter>,
        brightness: Arc<dyn BrightnessMeter>,
    ) -> Self {
        Self {
            tempo,
            loudness,
            brightness,
        }
    }

    /// Facade wired to the built-in estimators
    pub fn builtin() -> Self {
        Self::new(
            Arc::new(OnsetTempoEstimator::default()),
            Arc::new(IntegratedLoudnessMeter::default()),
            Arc::new(SpectralCentroidMeter::default()),
        )
    }

    /// Load the decoded artifact and extract its descriptors off the runtime
    pub async fn extract(&self, decoded: &DecodedArtifact) -> Result<RawDescriptorSet> {
        let facade = self.clone();
        let path = decoded.path.clone();

        tokio::task::spawn_blocking(move || {
            let audio = DecodedAudio::load_wav(&path)?;
            facade.extract_audio(&audio)
        })
        .await
        .map_err(|e| Error::Decode {
            path: decoded.path.clone(),
            reason: format!("extraction task failed: {}", e),
        })?
    }

    /// Extract descriptors from samples already in memory
    ///
    /// A capability that panics counts as that capability failing.
    pub fn extract_audio(&self, audio: &DecodedAudio) -> Result<RawDescriptorSet> {
        let tempo_bpm = guarded(DescriptorKind::Tempo, || self.tempo.estimate_bpm(audio))?;
        let loudness_lufs =
            guarded(DescriptorKind::Loudness, || self.loudness.integrated_lufs(audio))?;
        let brightness_hz =
            guarded(DescriptorKind::Brightness, || self.brightness.brightness_hz(audio))?;

        Ok(RawDescriptorSet {
            tempo_bpm,
            loudness_lufs,
            brightness_hz,
        })
    }
}

impl std::fmt::Debug for FeatureExtractionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractionFacade").finish_non_exhaustive()
    }
}

fn guarded<F>(kind: DescriptorKind, capability: F) -> Result<f64>
where
    F: FnOnce() -> Result<f64>,
{
    match catch_unwind(AssertUnwindSafe(capability)) {
        Ok(result) => checked(kind, result),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(extraction_error(kind, format!("capability panicked: {}", reason)))
        }
    }
}

/// Normalise any capability failure to an extraction error and reject NaN/inf
fn checked(kind: DescriptorKind, result: Result<f64>) -> Result<f64> {
    match result {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(value) => Err(extraction_error(kind, format!("non-finite result {}", value))),
        Err(e @ Error::Extraction { .. }) => Err(e),
        Err(e) => Err(extraction_error(kind, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);
    struct Failing;
    struct Panicking;

    impl TempoEstimator for Fixed {
        fn estimate_bpm(&self, _audio: &DecodedAudio) -> Result<f64> {
            Ok(self.0)
        }
    }
    impl LoudnessMeter for Fixed {
        fn integrated_lufs(&self, _audio: &DecodedAudio) -> Result<f64> {
            Ok(self.0)
        }
    }
    impl BrightnessMeter for Fixed {
        fn brightness_hz(&self, _audio: &DecodedAudio) -> Result<f64> {
            Ok(self.0)
        }
    }
    impl BrightnessMeter for Failing {
        fn brightness_hz(&self, _audio: &DecodedAudio) -> Result<f64> {
            Err(extraction_error(DescriptorKind::Brightness, "analyser crashed"))
        }
    }

    impl LoudnessMeter for Panicking {
        fn integrated_lufs(&self, _audio: &DecodedAudio) -> Result<f64> {
            panic!("filter state corrupted")
        }
    }

    fn audio() -> DecodedAudio {
        DecodedAudio::new(vec![0.0; 22050], 22050)
    }

    #[test]
    fn test_extract_assembles_all_three() {
        let facade = FeatureExtractionFacade::new(
            Arc::new(Fixed(120.0)),
            Arc::new(Fixed(-12.0)),
            Arc::new(Fixed(2500.0)),
        );
        let set = facade.extract_audio(&audio()).unwrap();
        assert_eq!(set.tempo_bpm, 120.0);
        assert_eq!(set.value(DescriptorKind::Loudness), -12.0);
        assert_eq!(set.brightness_hz, 2500.0);
    }

    #[test]
    fn test_brightness_failure_fails_whole_extraction() {
        let facade = FeatureExtractionFacade::new(
            Arc::new(Fixed(120.0)),
            Arc::new(Fixed(-12.0)),
            Arc::new(Failing),
        );
        match facade.extract_audio(&audio()) {
            Err(Error::Extraction { descriptor, .. }) => {
                assert_eq!(descriptor, DescriptorKind::Brightness)
            }
            other => panic!("expected extraction error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_result_rejected() {
        let facade = FeatureExtractionFacade::new(
            Arc::new(Fixed(f64::NAN)),
            Arc::new(Fixed(-12.0)),
            Arc::new(Fixed(2500.0)),
        );
        let err = facade.extract_audio(&audio()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ExtractionError);
    }

    #[test]
    fn test_panicking_capability_is_extraction_error() {
        let facade = FeatureExtractionFacade::new(
            Arc::new(Fixed(120.0)),
            Arc::new(Panicking),
            Arc::new(Fixed(2500.0)),
        );
        match facade.extract_audio(&audio()) {
            Err(Error::Extraction { descriptor, reason }) => {
                assert_eq!(descriptor, DescriptorKind::Loudness);
                assert!(reason.contains("filter state corrupted"), "{}", reason);
            }
            other => panic!("expected extraction error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_inside_extract_task_surfaces_as_extraction_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("DDR_100.decoded.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..22050 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let decoded = DecodedArtifact {
            source: crate::artifacts::ArtifactKey::new(
                radiohue_common::StationId::new("DDR").unwrap(),
                100,
            ),
            path,
            sample_rate: 22050,
            frames: 22050,
        };
        let facade = FeatureExtractionFacade::new(
            Arc::new(Fixed(120.0)),
            Arc::new(Panicking),
            Arc::new(Fixed(2500.0)),
        );

        let err = facade.extract(&decoded).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ExtractionError);
    }
}
