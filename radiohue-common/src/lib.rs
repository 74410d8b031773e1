//! # radiohue common library
//!
//! Shared code for the radiohue capture engine:
//! - Error type used by configuration and catalog loading
//! - Static TOML configuration and its validation
//! - Station catalog and calibration types
//! - Event types (PipelineEvent) and the EventBus
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod station;
pub mod time;

pub use config::{Calibration, CalibrationRange, DescriptorKind, RadiohueConfig};
pub use error::{Error, Result};
pub use station::{ContainerFormat, StationDescriptor, StationId, StationRegistry};
