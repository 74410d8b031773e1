//! Slot scheduler
//!
//! Polls the wall clock (UTC) and fires each configured slot at most once per
//! calendar day. A slot fires on the first poll that falls inside
//! `[slot_time, slot_time + misfire_grace)`. Fired occurrences are written to
//! a small JSON ledger before the job starts, so a restart inside the grace
//! window does not fire the same occurrence again.
//!
//! Jobs run on their own tasks. The poll loop never waits for them, and a
//! failing or panicking job never reaches it.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use radiohue_common::config::{JobKind, SlotSpec};
use radiohue_common::events::{EventBus, PipelineEvent};
use radiohue_common::{time, RadiohueConfig, StationId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Work the scheduler can start
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run_capture(&self, stations: Vec<StationId>) -> Result<()>;
    async fn run_cleanup(&self) -> Result<()>;
}

/// Identity of one slot occurrence
///
/// A capture slot and a cleanup slot at the same offset are distinct
/// occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub offset_secs: u32,
    pub job: JobKind,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    fired: BTreeSet<SlotKey>,
}

/// Persistent record of fired slot occurrences
#[derive(Debug)]
pub struct SlotLedger {
    path: PathBuf,
    fired: BTreeSet<SlotKey>,
}

impl SlotLedger {
    /// Load the ledger; a missing or unreadable file starts empty
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let fired = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<LedgerFile>(&content) {
                Ok(file) => file.fired,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Slot ledger corrupt, starting empty");
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                let error = Error::filesystem(&path, e);
                warn!(error_kind = %error.kind(), error = %error, "Slot ledger unreadable, starting empty");
                BTreeSet::new()
            }
        };

        debug!(path = %path.display(), entries = fired.len(), "Slot ledger loaded");
        Self { path, fired }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.fired.contains(key)
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }

    /// Record an occurrence and persist the ledger
    ///
    /// The in-memory record is kept even when persisting fails.
    pub async fn record(&mut self, key: SlotKey) -> Result<()> {
        self.fired.insert(key);
        self.persist().await
    }

    /// Drop entries older than the day before `today`
    pub fn prune(&mut self, today: NaiveDate) -> usize {
        let Some(keep_from) = today.pred_opt() else {
            return 0;
        };
        let before = self.fired.len();
        self.fired.retain(|key| key.date >= keep_from);
        before - self.fired.len()
    }

    async fn persist(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&LedgerFile {
            fired: self.fired.clone(),
        })
        .map_err(|e| {
            Error::Common(radiohue_common::Error::Internal(format!(
                "Failed to encode slot ledger: {}",
                e
            )))
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::filesystem(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::filesystem(&self.path, e))?;
        Ok(())
    }
}

/// Poll-loop parameters
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub poll_interval: Duration,
    pub misfire_grace: Duration,
}

pub struct CaptureScheduler {
    slots: Vec<SlotSpec>,
    settings: ScheduleSettings,
    ledger: SlotLedger,
    runner: Arc<dyn JobRunner>,
    events: EventBus,
    last_prune: Option<NaiveDate>,
}

impl CaptureScheduler {
    pub fn new(
        slots: Vec<SlotSpec>,
        settings: ScheduleSettings,
        ledger: SlotLedger,
        runner: Arc<dyn JobRunner>,
        events: EventBus,
    ) -> Self {
        let mut seen = HashSet::new();
        let slots = slots
            .into_iter()
            .filter(|slot| {
                let unique = seen.insert((slot.offset_secs, slot.job));
                if !unique {
                    warn!(
                        offset_secs = slot.offset_secs,
                        job = ?slot.job,
                        "Duplicate slot ignored; it would share an occurrence with an earlier slot"
                    );
                }
                unique
            })
            .collect();

        Self {
            slots,
            settings,
            ledger,
            runner,
            events,
            last_prune: None,
        }
    }

    /// Build from validated configuration, loading the ledger from the artifact directory
    pub async fn from_config(
        config: &RadiohueConfig,
        runner: Arc<dyn JobRunner>,
        events: EventBus,
    ) -> Result<Self> {
        let slots = config.schedule.expanded_slots()?;
        let ledger = SlotLedger::load(config.ledger_path()).await;
        let settings = ScheduleSettings {
            poll_interval: config.schedule.poll_interval(),
            misfire_grace: config.schedule.misfire_grace(),
        };
        Ok(Self::new(slots, settings, ledger, runner, events))
    }

    pub fn slots(&self) -> &[SlotSpec] {
        &self.slots
    }

    pub fn ledger(&self) -> &SlotLedger {
        &self.ledger
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            slots = self.slots.len(),
            poll_secs = self.settings.poll_interval.as_secs_f64(),
            "Scheduler started"
        );

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopping");
                    break;
                }
                _ = poll.tick() => {
                    self.tick_at(time::now()).await;
                }
            }
        }
    }

    /// Fire every slot due at `now` that has not fired yet; returns what fired
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Vec<SlotKey> {
        let today = now.date_naive();
        if self.last_prune != Some(today) {
            let pruned = self.ledger.prune(today);
            if pruned > 0 {
                debug!(pruned, "Pruned old slot ledger entries");
            }
            self.last_prune = Some(today);
        }

        let grace = ChronoDuration::milliseconds(self.settings.misfire_grace.as_millis() as i64);
        // Yesterday too: a late slot's grace window can cross midnight
        let days: Vec<NaiveDate> = [today.pred_opt(), Some(today)].into_iter().flatten().collect();

        let mut due = Vec::new();
        for slot in &self.slots {
            for &date in &days {
                let Some(slot_time) = slot_time(date, slot.offset_secs) else {
                    continue;
                };
                if slot_time <= now && now < slot_time + grace {
                    let key = SlotKey {
                        date,
                        offset_secs: slot.offset_secs,
                        job: slot.job,
                    };
                    if !self.ledger.contains(&key) {
                        due.push((key, slot.clone()));
                    }
                }
            }
        }

        let mut fired = Vec::with_capacity(due.len());
        for (key, slot) in due {
            if self.ledger.contains(&key) {
                continue;
            }
            if let Err(e) = self.ledger.record(key).await {
                warn!(error_kind = %e.kind(), error = %e, "Failed to persist slot ledger");
            }
            self.fire(key, slot, now);
            fired.push(key);
        }
        fired
    }

    fn fire(&self, key: SlotKey, slot: SlotSpec, now: DateTime<Utc>) {
        info!(
            date = %key.date,
            offset_secs = key.offset_secs,
            job = ?slot.job,
            "Slot fired"
        );
        self.events.emit_lossy(PipelineEvent::SlotFired {
            offset_secs: key.offset_secs,
            job: slot.job,
            timestamp: now,
        });

        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let outcome = match slot.job {
                JobKind::Capture => runner.run_capture(slot.stations).await,
                JobKind::Cleanup => runner.run_cleanup().await,
            };
            if let Err(e) = outcome {
                error!(job = ?slot.job, error_kind = %e.kind(), error = %e, "Scheduled job failed");
            }
        });
    }
}

fn slot_time(date: NaiveDate, offset_secs: u32) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight) + ChronoDuration::seconds(offset_secs as i64))
}
