//! Retention sweep of the artifact directory
//!
//! Runs on its own schedule and never waits for capture jobs. Expired files
//! are deleted unless the store still tracks them as capturing or captured.
//! Files whose names do not follow the artifact convention (the sentinel
//! among them) are left alone. Deletes are delete-if-exists, so overlapping
//! sweeps are harmless.

use crate::artifacts::{ArtifactKey, ArtifactStore};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    /// Expired but still capturing or awaiting transcode
    pub in_flight: usize,
    pub failures: usize,
}

#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: ArtifactStore,
    sentinel_file: String,
}

impl RetentionSweeper {
    pub fn new(store: ArtifactStore, sentinel_file: impl Into<String>) -> Self {
        Self {
            store,
            sentinel_file: sentinel_file.into(),
        }
    }

    /// Delete every artifact file with `expires_at <= now` that is not in flight
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let dir = self.store.dir();
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Artifact directory missing, nothing to sweep");
                return Ok(report);
            }
            Err(e) => return Err(Error::filesystem(dir, e)),
        };

        let cutoff = now.timestamp();
        let mut swept_keys: HashSet<ArtifactKey> = HashSet::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    let error = Error::filesystem(dir, e);
                    warn!(error_kind = %error.kind(), error = %error, "Failed to list artifact directory");
                    report.failures += 1;
                    break;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == self.sentinel_file {
                continue;
            }
            let Some((key, _extension)) = ArtifactKey::parse_file_name(name) else {
                continue;
            };
            if key.expires_at > cutoff {
                continue;
            }
            if self.store.is_in_flight(&key).await {
                debug!(file = name, "Expired artifact still in flight, keeping");
                report.in_flight += 1;
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted expired artifact");
                    report.deleted.push(path);
                    swept_keys.insert(key);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    swept_keys.insert(key);
                }
                Err(e) => {
                    let error = Error::filesystem(&path, e);
                    warn!(error_kind = %error.kind(), error = %error, "Failed to delete artifact");
                    report.failures += 1;
                }
            }
        }

        for key in &swept_keys {
            if !self.store.is_in_flight(key).await {
                self.store.forget(key).await;
            }
        }

        info!(
            deleted = report.deleted.len(),
            in_flight = report.in_flight,
            failures = report.failures,
            "Retention sweep complete"
        );
        Ok(report)
    }
}
