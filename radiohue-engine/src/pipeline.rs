//! Capture pass orchestration
//!
//! capture → transcode → extract → map → dispatch, one station at a time so
//! results reach the consumer in a stable order. Any failure drops only the
//! station it happened to. Every captured artifact is marked consumed at the
//! end of the pass, which hands it to the retention sweeper.

use crate::artifacts::{ArtifactState, ArtifactStore, CaptureArtifact};
use crate::capture::{CaptureJob, CaptureSettings};
use crate::color::{ColorResult, PerceptualColorMapper};
use crate::dispatch::{DispatchClient, DispatchSettings};
use crate::error::{Error, ErrorKind, Result};
use crate::features::FeatureExtractionFacade;
use crate::retention::{RetentionSweeper, SweepReport};
use crate::scheduler::JobRunner;
use crate::transcoder::{AudioTranscoder, SymphoniaTranscoder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radiohue_common::events::{EventBus, PipelineEvent};
use radiohue_common::{time, RadiohueConfig, StationId, StationRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one capture pass
#[derive(Debug, Default)]
pub struct PassReport {
    pub dispatched: Vec<ColorResult>,
    pub skipped: Vec<(StationId, ErrorKind)>,
}

pub struct CapturePipeline {
    registry: StationRegistry,
    store: ArtifactStore,
    capture: CaptureJob,
    transcoder: Arc<dyn AudioTranscoder>,
    extractor: FeatureExtractionFacade,
    mapper: PerceptualColorMapper,
    dispatcher: DispatchClient,
    sweeper: RetentionSweeper,
    events: EventBus,
}

impl CapturePipeline {
    /// Wire the pipeline from validated configuration with the built-in capabilities
    pub fn from_config(config: &RadiohueConfig, store: ArtifactStore, events: EventBus) -> Result<Self> {
        let registry = config.station_registry()?;
        let capture = CaptureJob::new(store.clone(), CaptureSettings::from_config(config))?;
        let sweeper = RetentionSweeper::new(store.clone(), config.retention.sentinel_file.clone());

        Ok(Self {
            registry,
            store,
            capture,
            transcoder: Arc::new(SymphoniaTranscoder::new()),
            extractor: FeatureExtractionFacade::builtin(),
            mapper: PerceptualColorMapper::new(config.calibration),
            dispatcher: DispatchClient::new(DispatchSettings::from_config(&config.dispatch)),
            sweeper,
            events,
        })
    }

    /// Replace the container decoder
    pub fn with_transcoder(mut self, transcoder: Arc<dyn AudioTranscoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Replace the descriptor capabilities
    pub fn with_extractor(mut self, extractor: FeatureExtractionFacade) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Capture `stations` for one window and push a color for each that makes it through
    pub async fn run_capture_pass(&self, stations: &[StationId]) -> Result<PassReport> {
        let descriptors = self.registry.resolve(stations);
        if descriptors.is_empty() {
            warn!("Capture pass has no known stations, skipping");
            return Ok(PassReport::default());
        }

        let capture = self.capture.run(descriptors).await?;
        self.events.emit_lossy(PipelineEvent::CaptureCompleted {
            captured: capture.captured_ids(),
            failed: capture.failed_ids(),
            timestamp: time::now(),
        });

        let mut report = PassReport::default();
        for failure in &capture.failures {
            self.skip(&mut report, &failure.station, &failure.error);
        }

        for artifact in &capture.artifacts {
            match self.process(artifact, capture.window.start_time).await {
                Ok(result) => {
                    self.events.emit_lossy(PipelineEvent::ColorDispatched {
                        station: result.station_id.clone(),
                        rgb: result.rgb,
                        timestamp: time::now(),
                    });
                    report.dispatched.push(result);
                }
                Err(error) => self.skip(&mut report, artifact.station_id(), &error),
            }

            if let Err(e) = self.store.advance(&artifact.key, ArtifactState::Consumed).await {
                debug!(station = %artifact.station_id(), error = %e, "Artifact already released");
            }
        }

        info!(
            dispatched = report.dispatched.len(),
            skipped = report.skipped.len(),
            "Capture pass complete"
        );
        Ok(report)
    }

    /// Sweep expired artifacts now
    pub async fn run_cleanup_pass(&self) -> Result<SweepReport> {
        let report = self.sweeper.sweep(time::now()).await?;
        self.events.emit_lossy(PipelineEvent::SweepCompleted {
            deleted: report.deleted.len(),
            failures: report.failures,
            timestamp: time::now(),
        });
        Ok(report)
    }

    /// Close the downstream connection
    pub async fn shutdown(&self) {
        self.dispatcher.close().await;
    }

    async fn process(
        &self,
        artifact: &CaptureArtifact,
        window_start: DateTime<Utc>,
    ) -> Result<ColorResult> {
        let decoded = self.transcoder.convert(artifact).await?;
        self.store
            .advance(&artifact.key, ArtifactState::Transcoded)
            .await?;

        let descriptors = self.extractor.extract(&decoded).await?;
        debug!(
            station = %artifact.station_id(),
            tempo_bpm = descriptors.tempo_bpm,
            loudness_lufs = descriptors.loudness_lufs,
            brightness_hz = descriptors.brightness_hz,
            "Descriptors extracted"
        );

        let result = self
            .mapper
            .color_result(artifact.station_id().clone(), window_start, descriptors);
        self.dispatcher.send(&result).await?;
        debug!(station = %result.station_id, rgb = ?result.rgb, "Color dispatched");
        Ok(result)
    }

    fn skip(&self, report: &mut PassReport, station: &StationId, error: &Error) {
        warn!(
            station = %station,
            error_kind = %error.kind(),
            error = %error,
            "Station skipped this pass"
        );
        self.events.emit_lossy(PipelineEvent::StationSkipped {
            station: station.clone(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            timestamp: time::now(),
        });
        report.skipped.push((station.clone(), error.kind()));
    }
}

#[async_trait]
impl JobRunner for CapturePipeline {
    async fn run_capture(&self, stations: Vec<StationId>) -> Result<()> {
        self.run_capture_pass(&stations).await.map(|_| ())
    }

    async fn run_cleanup(&self) -> Result<()> {
        self.run_cleanup_pass().await.map(|_| ())
    }
}
