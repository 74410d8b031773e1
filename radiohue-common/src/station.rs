//! Station catalog
//!
//! The catalog is loaded once from configuration and never changes for the
//! lifetime of the process. Capture tasks share it read-only through an `Arc`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Station identifier (e.g. `DDR`, `KUTX`)
///
/// Restricted to ASCII alphanumerics and `-` because `_` separates the id
/// from the expiry timestamp in artifact file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StationId(String);

impl StationId {
    /// Create a station id, rejecting characters that would break artifact naming
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidInput("station id is empty".to_string()));
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::InvalidInput(format!(
                "station id '{}' may only contain ASCII letters, digits and '-'",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StationId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<StationId> for String {
    fn from(id: StationId) -> Self {
        id.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container format delivered by a station's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp3,
    Aac,
    Wav,
}

impl ContainerFormat {
    /// File extension used for capture artifacts of this format
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp3 => "mp3",
            ContainerFormat::Aac => "aac",
            ContainerFormat::Wav => "wav",
        }
    }
}

/// Static description of one live station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationDescriptor {
    pub id: StationId,
    pub stream_address: Url,
    pub container_format: ContainerFormat,
}

/// Immutable catalog: station id → descriptor
#[derive(Debug, Clone)]
pub struct StationRegistry {
    stations: Arc<HashMap<StationId, StationDescriptor>>,
}

impl StationRegistry {
    /// Build the registry, rejecting an empty catalog and duplicate ids
    pub fn new(descriptors: Vec<StationDescriptor>) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(Error::Config("station catalog is empty".to_string()));
        }

        let mut stations = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let id = descriptor.id.clone();
            if stations.insert(id.clone(), descriptor).is_some() {
                return Err(Error::Config(format!("duplicate station id '{}'", id)));
            }
        }

        Ok(Self {
            stations: Arc::new(stations),
        })
    }

    pub fn get(&self, id: &StationId) -> Option<&StationDescriptor> {
        self.stations.get(id)
    }

    /// Look up a subset of stations, skipping ids that are not in the catalog
    pub fn resolve(&self, ids: &[StationId]) -> Vec<StationDescriptor> {
        ids.iter()
            .filter_map(|id| match self.stations.get(id) {
                Some(descriptor) => Some(descriptor.clone()),
                None => {
                    tracing::warn!(station = %id, "Unknown station id in capture subset, skipping");
                    None
                }
            })
            .collect()
    }

    /// All station ids, sorted for stable output
    pub fn ids(&self) -> Vec<StationId> {
        let mut ids: Vec<StationId> = self.stations.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
