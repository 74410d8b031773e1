//! Container decoding
//!
//! Converts a captured container (mp3, aac, wav) into the canonical decoded
//! form: a mono 16-bit PCM WAV sibling next to the capture file. Live
//! captures are cut off mid-frame, so a truncated tail ends decoding instead
//! of failing it.

use crate::artifacts::{ArtifactKey, CaptureArtifact};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded sibling of a capture artifact
#[derive(Debug, Clone)]
pub struct DecodedArtifact {
    pub source: ArtifactKey,
    pub path: PathBuf,
    pub sample_rate: u32,
    pub frames: usize,
}

impl DecodedArtifact {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Converts a captured container into decoded audio
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    /// Fails with `Error::Decode` for malformed or unsupported containers
    async fn convert(&self, artifact: &CaptureArtifact) -> Result<DecodedArtifact>;
}

/// Transcoder backed by symphonia (decode) and hound (WAV output)
#[derive(Debug, Clone, Default)]
pub struct SymphoniaTranscoder;

impl SymphoniaTranscoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioTranscoder for SymphoniaTranscoder {
    async fn convert(&self, artifact: &CaptureArtifact) -> Result<DecodedArtifact> {
        let source = artifact.path.clone();
        let target = artifact.decoded_path();
        let key = artifact.key.clone();

        let (sample_rate, frames) = tokio::task::spawn_blocking({
            let target = target.clone();
            move || {
                let (samples, sample_rate) = decode_to_mono(&source)?;
                write_mono_wav(&target, &samples, sample_rate)?;
                Ok::<_, Error>((sample_rate, samples.len()))
            }
        })
        .await
        .map_err(|e| Error::Decode {
            path: artifact.path.clone(),
            reason: format!("decoder task failed: {}", e),
        })??;

        tracing::debug!(
            path = %target.display(),
            sample_rate,
            frames,
            "Decoded capture"
        );

        Ok(DecodedArtifact {
            source: key,
            path: target,
            sample_rate,
            frames,
        })
    }
}

/// Decode every packet of the default track and average channels to mono
fn decode_to_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let decode_error = |reason: String| Error::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let file = std::fs::File::open(path).map_err(|e| Error::filesystem(path, e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_error(format!("unrecognised container: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error("no audio track".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error(format!("unsupported codec: {}", e)))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut mono: Vec<f32> = Vec::new();
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) if !mono.is_empty() => {
                tracing::debug!(path = %path.display(), error = %e, "Stopping at damaged tail");
                break;
            }
            Err(e) => return Err(decode_error(format!("failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) | Err(SymphoniaError::IoError(_)) => {
                skipped += 1;
                continue;
            }
            Err(e) => return Err(decode_error(format!("decoder failed: {}", e))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        mono.extend(
            buffer
                .samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "Skipped corrupt packets");
    }
    if mono.is_empty() {
        return Err(decode_error("no decodable audio".to_string()));
    }
    if sample_rate == 0 {
        return Err(decode_error("sample rate unknown".to_string()));
    }

    Ok((mono, sample_rate))
}

fn write_mono_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let wav_error = |e: hound::Error| match e {
        hound::Error::IoError(io) => Error::filesystem(path, io),
        other => Error::Decode {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactState;
    use chrono::Utc;
    use radiohue_common::StationId;
    use tempfile::TempDir;

    fn artifact_at(path: PathBuf) -> CaptureArtifact {
        CaptureArtifact {
            key: ArtifactKey::new(StationId::new("DDR").unwrap(), 100),
            path,
            created_at: Utc::now(),
            expires_at: Utc::now(),
            state: ArtifactState::Captured,
        }
    }

    fn write_stereo_wav(path: &Path, sample_rate: u32, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (sample_rate as f32 * seconds) as usize;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let v = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5 * i16::MAX as f32) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_convert_writes_mono_sibling() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("DDR_100.wav");
        write_stereo_wav(&path, 22050, 0.5);

        let decoded = SymphoniaTranscoder::new()
            .convert(&artifact_at(path))
            .await
            .unwrap();

        assert_eq!(decoded.path, temp_dir.path().join("DDR_100.decoded.wav"));
        assert_eq!(decoded.sample_rate, 22050);
        assert!((decoded.duration_secs() - 0.5).abs() < 0.01);

        let reader = hound::WavReader::open(&decoded.path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
    }

    #[tokio::test]
    async fn test_garbage_is_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("DDR_100.mp3");
        std::fs::write(&path, vec![0x5Au8; 4096]).unwrap();

        let err = SymphoniaTranscoder::new()
            .convert(&artifact_at(path))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DecodeError);
    }
}
