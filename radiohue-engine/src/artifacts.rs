//! Capture artifact tracking
//!
//! Artifacts are on-disk files named `{stationId}_{expiryUnixSeconds}.{ext}`.
//! The decoded sibling swaps the extension for `decoded.wav`. The store keeps
//! the lifecycle state of every artifact this process created so that the
//! retention sweeper can tell in-flight files from reclaimable ones.
//!
//! State only moves forward: capturing → captured → transcoded → consumed.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use radiohue_common::time;
use radiohue_common::{ContainerFormat, StationId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Extension (after the stem) of decoded siblings
pub const DECODED_EXTENSION: &str = "decoded.wav";

/// Lifecycle state of a capture artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactState {
    /// File open, bytes still arriving
    Capturing,
    /// Cleanly stopped, waiting for the pipeline
    Captured,
    /// Decoded sibling written
    Transcoded,
    /// Pipeline done with it (success or skip); sweeper owns deletion
    Consumed,
}

/// Identity of an artifact: unique per (station, expiry)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub station_id: StationId,
    /// Unix seconds
    pub expires_at: i64,
}

impl ArtifactKey {
    pub fn new(station_id: StationId, expires_at: i64) -> Self {
        Self {
            station_id,
            expires_at,
        }
    }

    /// `{stationId}_{expiry}.{extension}`
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}_{}.{}", self.station_id, self.expires_at, extension)
    }

    /// Parse an artifact file name into its key and extension
    ///
    /// Returns `None` for anything that does not follow the naming
    /// convention (sentinel, ledger, stray files).
    pub fn parse_file_name(name: &str) -> Option<(ArtifactKey, &str)> {
        let (stem, extension) = name.split_once('.')?;
        if extension.is_empty() {
            return None;
        }
        let (station, expiry) = stem.rsplit_once('_')?;
        let expires_at = expiry.parse::<i64>().ok()?;
        let station_id = StationId::new(station).ok()?;
        Some((ArtifactKey::new(station_id, expires_at), extension))
    }
}

/// One tracked capture file
#[derive(Debug, Clone)]
pub struct CaptureArtifact {
    pub key: ArtifactKey,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: ArtifactState,
}

impl CaptureArtifact {
    pub fn station_id(&self) -> &StationId {
        &self.key.station_id
    }

    /// Decoded sibling path, derived by extension substitution
    pub fn decoded_path(&self) -> PathBuf {
        self.path.with_extension(DECODED_EXTENSION)
    }
}

/// In-memory registry of artifacts created by this process
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    entries: Arc<RwLock<HashMap<ArtifactKey, CaptureArtifact>>>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the artifact directory and the sentinel marker if missing
    pub async fn ensure_dir(&self, sentinel_file: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::filesystem(&self.dir, e))?;

        let sentinel = self.dir.join(sentinel_file);
        if tokio::fs::metadata(&sentinel).await.is_err() {
            tokio::fs::write(&sentinel, b"")
                .await
                .map_err(|e| Error::filesystem(&sentinel, e))?;
            tracing::debug!(path = %sentinel.display(), "Created sentinel file");
        }
        Ok(())
    }

    /// Key and capture path for a station's artifact expiring at `expires_at`
    pub fn path_for(
        &self,
        station_id: &StationId,
        expires_at: DateTime<Utc>,
        format: ContainerFormat,
    ) -> (ArtifactKey, PathBuf) {
        let key = ArtifactKey::new(station_id.clone(), time::unix_seconds(expires_at));
        let path = self.dir.join(key.file_name(format.extension()));
        (key, path)
    }

    /// Start tracking a new artifact in `Capturing` state
    ///
    /// A key that is already tracked names a file another capture owns.
    pub async fn register(&self, artifact: CaptureArtifact) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&artifact.key) {
            return Err(Error::filesystem(
                &artifact.path,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "artifact already tracked by another capture",
                ),
            ));
        }
        entries.insert(artifact.key.clone(), artifact);
        Ok(())
    }

    /// Move an artifact forward in its lifecycle
    ///
    /// Advancing to the current state is a no-op; moving backwards is rejected.
    pub async fn advance(&self, key: &ArtifactKey, state: ArtifactState) -> Result<()> {
        let mut entries = self.entries.write().await;
        let artifact = entries.get_mut(key).ok_or_else(|| {
            Error::Common(radiohue_common::Error::InvalidInput(format!(
                "artifact {}_{} is not tracked",
                key.station_id, key.expires_at
            )))
        })?;

        if state < artifact.state {
            return Err(Error::Common(radiohue_common::Error::InvalidInput(format!(
                "artifact {} cannot move from {:?} back to {:?}",
                artifact.path.display(),
                artifact.state,
                state
            ))));
        }
        artifact.state = state;
        Ok(())
    }

    pub async fn get(&self, key: &ArtifactKey) -> Option<CaptureArtifact> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn state_of(&self, key: &ArtifactKey) -> Option<ArtifactState> {
        self.entries.read().await.get(key).map(|a| a.state)
    }

    /// Stop tracking an artifact (after deletion, or a failed capture)
    pub async fn forget(&self, key: &ArtifactKey) -> Option<CaptureArtifact> {
        self.entries.write().await.remove(key)
    }

    /// True while the capture side still holds the artifact
    ///
    /// Only `capturing` and `captured` protect a file from the sweeper. Once
    /// transcoded, expiry alone decides, so a stalled pass cannot pin disk.
    pub async fn is_in_flight(&self, key: &ArtifactKey) -> bool {
        matches!(
            self.state_of(key).await,
            Some(ArtifactState::Capturing | ArtifactState::Captured)
        )
    }

    pub async fn snapshot(&self) -> Vec<CaptureArtifact> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(store: &ArtifactStore, station: &str, expires_at: i64) -> CaptureArtifact {
        let station_id = StationId::new(station).unwrap();
        let expires = radiohue_common::time::from_unix_seconds(expires_at).unwrap();
        let (key, path) = store.path_for(&station_id, expires, ContainerFormat::Mp3);
        CaptureArtifact {
            key,
            path,
            created_at: Utc::now(),
            expires_at: expires,
            state: ArtifactState::Capturing,
        }
    }

    #[test]
    fn test_file_name_round_trip() {
        let key = ArtifactKey::new(StationId::new("SOMA-FM").unwrap(), 1_700_000_120);
        let name = key.file_name("mp3");
        assert_eq!(name, "SOMA-FM_1700000120.mp3");

        let (parsed, ext) = ArtifactKey::parse_file_name(&name).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(ext, "mp3");
    }

    #[test]
    fn test_parse_decoded_sibling() {
        let (key, ext) = ArtifactKey::parse_file_name("DDR_1700000120.decoded.wav").unwrap();
        assert_eq!(key.station_id.as_str(), "DDR");
        assert_eq!(ext, DECODED_EXTENSION);
    }

    #[test]
    fn test_parse_ignores_foreign_names() {
        assert!(ArtifactKey::parse_file_name("starter.txt").is_none());
        assert!(ArtifactKey::parse_file_name("slots.json").is_none());
        assert!(ArtifactKey::parse_file_name("DDR_notanumber.mp3").is_none());
        assert!(ArtifactKey::parse_file_name("DDR_123").is_none());
    }

    #[test]
    fn test_decoded_path_substitutes_extension() {
        let store = ArtifactStore::new("/tmp/soundbytes");
        let a = artifact(&store, "KOOP", 42);
        assert_eq!(a.path, PathBuf::from("/tmp/soundbytes/KOOP_42.mp3"));
        assert_eq!(
            a.decoded_path(),
            PathBuf::from("/tmp/soundbytes/KOOP_42.decoded.wav")
        );
    }

    #[tokio::test]
    async fn test_state_advances_monotonically() {
        let store = ArtifactStore::new("/tmp/soundbytes");
        let a = artifact(&store, "DDR", 100);
        let key = a.key.clone();
        store.register(a).await.unwrap();

        assert!(store.is_in_flight(&key).await);
        store.advance(&key, ArtifactState::Captured).await.unwrap();
        assert!(store.is_in_flight(&key).await);

        store.advance(&key, ArtifactState::Transcoded).await.unwrap();
        assert!(store.advance(&key, ArtifactState::Capturing).await.is_err());
        assert_eq!(store.state_of(&key).await, Some(ArtifactState::Transcoded));
        assert!(!store.is_in_flight(&key).await);

        store.advance(&key, ArtifactState::Consumed).await.unwrap();
        assert!(!store.is_in_flight(&key).await);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_key() {
        let store = ArtifactStore::new("/tmp/soundbytes");
        store.register(artifact(&store, "DDR", 100)).await.unwrap();
        let err = store
            .register(artifact(&store, "DDR", 100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FilesystemError);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ensure_dir_creates_sentinel() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path().join("soundbytes"));
        store.ensure_dir("starter.txt").await.unwrap();
        assert!(temp_dir.path().join("soundbytes/starter.txt").exists());
        // Idempotent
        store.ensure_dir("starter.txt").await.unwrap();
    }
}
