//! # radiohue capture engine
//!
//! Samples live radio streams on a slot schedule and turns each sample into a
//! color pushed to a downstream consumer:
//!
//! - **scheduler**: fires capture and cleanup slots, once per occurrence
//! - **capture**: one concurrent capture task per station, bounded by a deadline
//! - **transcoder**: container → mono WAV
//! - **features**: tempo, loudness and brightness descriptors (atomic)
//! - **color**: calibrated percentiles → HSLuv → sRGB
//! - **dispatch**: persistent WebSocket with a single reconnect-and-resend
//! - **retention**: expiry sweep of the artifact directory
//! - **pipeline**: the pass that chains them together

pub mod artifacts;
pub mod capture;
pub mod color;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod retention;
pub mod scheduler;
pub mod transcoder;

pub use artifacts::{ArtifactKey, ArtifactState, ArtifactStore, CaptureArtifact};
pub use capture::{CaptureJob, CaptureReport, CaptureSettings, CaptureWindow};
pub use color::{ColorResult, PerceptualColorMapper};
pub use dispatch::{DispatchClient, DispatchSettings, Envelope};
pub use error::{Error, ErrorKind, Result};
pub use features::{FeatureExtractionFacade, RawDescriptorSet};
pub use pipeline::{CapturePipeline, PassReport};
pub use retention::{RetentionSweeper, SweepReport};
pub use scheduler::{CaptureScheduler, JobRunner, SlotKey, SlotLedger};
pub use transcoder::{AudioTranscoder, DecodedArtifact, SymphoniaTranscoder};
