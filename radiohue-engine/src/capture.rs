//! Multi-station capture job
//!
//! One task per station, all started together. Each task records its
//! stream into its own artifact file until the window deadline, then the job
//! raises a shared stop token. Tasks check the token between chunks only, so a
//! chunk that has been read is always written in full. Tasks that are still
//! running once the grace period has passed are aborted and their files removed.

use crate::artifacts::{ArtifactKey, ArtifactState, ArtifactStore, CaptureArtifact};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use radiohue_common::{time, RadiohueConfig, StationDescriptor, StationId};
use std::collections::HashSet;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capture parameters, derived from `[capture]` and `[retention]`
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub window: Duration,
    pub stop_grace: Duration,
    pub connect_timeout: Duration,
    pub chunk_size: usize,
    /// Added to the window start to get each artifact's expiry
    pub expiry_margin: Duration,
    pub min_successes: Option<usize>,
}

impl CaptureSettings {
    pub fn from_config(config: &RadiohueConfig) -> Self {
        Self {
            window: config.capture.window(),
            stop_grace: config.capture.stop_grace(),
            connect_timeout: config.capture.connect_timeout(),
            chunk_size: config.capture.chunk_size,
            expiry_margin: Duration::from_secs(config.retention.expiry_margin_secs),
            min_successes: config.capture.min_successes,
        }
    }
}

/// The bounded interval one capture job records for
#[derive(Debug, Clone)]
pub struct CaptureWindow {
    pub stations: Vec<StationId>,
    pub start_time: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A station that produced no artifact this window
#[derive(Debug)]
pub struct StationFailure {
    pub station: StationId,
    pub error: Error,
}

/// Outcome of one capture job
#[derive(Debug)]
pub struct CaptureReport {
    pub window: CaptureWindow,
    /// Artifacts that reached `captured`
    pub artifacts: Vec<CaptureArtifact>,
    pub failures: Vec<StationFailure>,
}

impl CaptureReport {
    pub fn captured_ids(&self) -> Vec<StationId> {
        self.artifacts.iter().map(|a| a.station_id().clone()).collect()
    }

    pub fn failed_ids(&self) -> Vec<StationId> {
        self.failures.iter().map(|f| f.station.clone()).collect()
    }
}

/// State shared by the tasks of one job
#[derive(Clone)]
struct TaskContext {
    client: reqwest::Client,
    store: ArtifactStore,
    chunk_size: usize,
    stop: CancellationToken,
    expires_at: DateTime<Utc>,
}

type TaskOutcome = (StationId, Result<CaptureArtifact>);

/// Runs capture windows against a shared artifact store
#[derive(Clone)]
pub struct CaptureJob {
    client: reqwest::Client,
    store: ArtifactStore,
    settings: CaptureSettings,
}

impl CaptureJob {
    pub fn new(store: ArtifactStore, settings: CaptureSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(concat!("radiohue/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                Error::Common(radiohue_common::Error::Internal(format!(
                    "Failed to build HTTP client: {}",
                    e
                )))
            })?;

        Ok(Self {
            client,
            store,
            settings,
        })
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Capture every station in `stations` for one window
    ///
    /// Station failures are collected in the report; the job itself only
    /// fails when `min_successes` is set and not met.
    pub async fn run(&self, stations: Vec<StationDescriptor>) -> Result<CaptureReport> {
        let start_time = time::now();
        let deadline_at = Instant::now() + self.settings.window;
        let window = CaptureWindow {
            stations: stations.iter().map(|s| s.id.clone()).collect(),
            start_time,
            deadline: start_time + to_chrono(self.settings.window),
        };
        let expires_at = start_time + to_chrono(self.settings.expiry_margin);

        info!(
            stations = window.stations.len(),
            window_secs = self.settings.window.as_secs_f64(),
            "Starting capture window"
        );

        let ctx = TaskContext {
            client: self.client.clone(),
            store: self.store.clone(),
            chunk_size: self.settings.chunk_size,
            stop: CancellationToken::new(),
            expires_at,
        };

        let mut pending: HashSet<StationId> = HashSet::new();
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        for station in stations {
            if !pending.insert(station.id.clone()) {
                debug!(station = %station.id, "Station listed twice in window, capturing once");
                continue;
            }
            tasks.spawn(capture_station(ctx.clone(), station));
        }

        let mut artifacts = Vec::new();
        let mut failures = Vec::new();

        // Phase 1: let tasks run until the deadline
        let deadline = tokio::time::sleep_until(deadline_at);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => collect(joined, &mut pending, &mut artifacts, &mut failures),
                    None => break,
                },
                _ = &mut deadline => break,
            }
        }

        // Phase 2: cooperative stop, bounded by the grace period
        if !tasks.is_empty() {
            debug!(running = tasks.len(), "Window deadline reached, signalling stop");
            ctx.stop.cancel();

            let grace_at = Instant::now() + self.settings.stop_grace;
            loop {
                match tokio::time::timeout_at(grace_at, tasks.join_next()).await {
                    Ok(Some(joined)) => collect(joined, &mut pending, &mut artifacts, &mut failures),
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            running = tasks.len(),
                            "Capture tasks ignored stop signal, aborting"
                        );
                        tasks.abort_all();
                        while let Some(joined) = tasks.join_next().await {
                            collect(joined, &mut pending, &mut artifacts, &mut failures);
                        }
                        break;
                    }
                }
            }
        }

        // Anything still pending was aborted or panicked before reporting
        for station in pending {
            let key = ArtifactKey::new(station.clone(), time::unix_seconds(expires_at));
            discard(&self.store, &key).await;
            let error = Error::network(&station, "capture task did not stop within grace period");
            warn!(station = %station, error_kind = %error.kind(), error = %error, "Station capture failed");
            failures.push(StationFailure { station, error });
        }

        info!(
            captured = artifacts.len(),
            failed = failures.len(),
            "Capture window complete"
        );

        if let Some(required) = self.settings.min_successes {
            if artifacts.len() < required {
                for artifact in &artifacts {
                    if let Err(e) = self.store.advance(&artifact.key, ArtifactState::Consumed).await {
                        debug!(error = %e, "Failed to release artifact");
                    }
                }
                return Err(Error::InsufficientCaptures {
                    captured: artifacts.len(),
                    required,
                });
            }
        }

        Ok(CaptureReport {
            window,
            artifacts,
            failures,
        })
    }
}

fn collect(
    joined: std::result::Result<TaskOutcome, JoinError>,
    pending: &mut HashSet<StationId>,
    artifacts: &mut Vec<CaptureArtifact>,
    failures: &mut Vec<StationFailure>,
) {
    match joined {
        Ok((station, Ok(artifact))) => {
            pending.remove(&station);
            debug!(station = %station, path = %artifact.path.display(), "Station captured");
            artifacts.push(artifact);
        }
        Ok((station, Err(error))) => {
            pending.remove(&station);
            warn!(
                station = %station,
                error_kind = %error.kind(),
                error = %error,
                "Station capture failed"
            );
            failures.push(StationFailure { station, error });
        }
        // Station identity is recovered from `pending` afterwards
        Err(e) if e.is_panic() => warn!(error = %e, "Capture task panicked"),
        Err(_) => {}
    }
}

async fn capture_station(ctx: TaskContext, station: StationDescriptor) -> TaskOutcome {
    let result = record_stream(&ctx, &station).await;
    (station.id, result)
}

async fn record_stream(ctx: &TaskContext, station: &StationDescriptor) -> Result<CaptureArtifact> {
    let id = &station.id;

    let response = tokio::select! {
        sent = ctx.client.get(station.stream_address.clone()).send() => {
            sent.map_err(|e| Error::network(id, format!("connect failed: {}", e)))?
        }
        _ = ctx.stop.cancelled() => {
            return Err(Error::network(id, "stream did not respond before the window closed"));
        }
    };
    let response = response
        .error_for_status()
        .map_err(|e| Error::network(id, format!("bad response: {}", e)))?;

    let (key, path) = ctx
        .store
        .path_for(id, ctx.expires_at, station.container_format);
    // Claim the key before touching disk; never truncate another capture's file
    ctx.store
        .register(CaptureArtifact {
            key: key.clone(),
            path: path.clone(),
            created_at: time::now(),
            expires_at: ctx.expires_at,
            state: ArtifactState::Capturing,
        })
        .await?;
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            ctx.store.forget(&key).await;
            return Err(Error::filesystem(&path, e));
        }
    };

    let stream = response
        .bytes_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let reader = StreamReader::new(stream);
    tokio::pin!(reader);

    let written = async {
        let bytes = copy_chunks(ctx, id, &mut reader, &mut file, &path).await?;
        if bytes == 0 {
            return Err(Error::network(id, "stream delivered no audio"));
        }
        file.flush().await.map_err(|e| Error::filesystem(&path, e))?;
        file.sync_all().await.map_err(|e| Error::filesystem(&path, e))?;
        Ok::<u64, Error>(bytes)
    }
    .await;

    match written {
        Ok(bytes) => {
            ctx.store.advance(&key, ArtifactState::Captured).await?;
            debug!(station = %id, bytes, "Capture stopped cleanly");
            ctx.store.get(&key).await.ok_or_else(|| {
                Error::Common(radiohue_common::Error::Internal(format!(
                    "artifact {} vanished from store",
                    path.display()
                )))
            })
        }
        Err(error) => {
            drop(file);
            discard(&ctx.store, &key).await;
            Err(error)
        }
    }
}

/// Copy fixed-size chunks until the stop token fires or the stream ends
async fn copy_chunks<R>(
    ctx: &TaskContext,
    id: &StationId,
    reader: &mut R,
    file: &mut tokio::fs::File,
    path: &std::path::Path,
) -> Result<u64>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; ctx.chunk_size];
    let mut total = 0u64;

    loop {
        let read = tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };

        let n = read.map_err(|e| Error::network(id, format!("stream interrupted: {}", e)))?;
        if n == 0 {
            debug!(station = %id, "Stream ended before window deadline");
            break;
        }

        file.write_all(&buf[..n])
            .await
            .map_err(|e| Error::filesystem(path, e))?;
        total += n as u64;
    }

    Ok(total)
}

/// Remove a failed capture's file and stop tracking it
async fn discard(store: &ArtifactStore, key: &ArtifactKey) {
    let Some(artifact) = store.forget(key).await else {
        return;
    };
    match tokio::fs::remove_file(&artifact.path).await {
        Ok(()) => debug!(path = %artifact.path.display(), "Removed partial capture"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            let error = Error::filesystem(&artifact.path, e);
            warn!(error_kind = %error.kind(), error = %error, "Failed to remove partial capture");
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}
