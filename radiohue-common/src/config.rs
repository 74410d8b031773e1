//! Configuration loading and validation
//!
//! All configuration is static: it is read from one TOML file at start-up,
//! validated once, and never changes while the scheduler runs.
//!
//! # Config file resolution
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`RADIOHUE_CONFIG`)
//! 3. User config dir (`~/.config/radiohue/config.toml` on Linux)
//! 4. System config (`/etc/radiohue/config.toml`, Linux only)

use crate::station::{ContainerFormat, StationDescriptor, StationId, StationRegistry};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "RADIOHUE_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiohueConfig {
    /// Directory holding capture artifacts, decoded siblings, the sentinel
    /// file and the scheduler ledger
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub calibration: Calibration,

    pub schedule: ScheduleConfig,

    pub stations: Vec<StationConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Capture window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// How long each station is recorded per capture pass
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Time granted to tasks after the stop signal before they are aborted
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Bytes per read from the stream
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// When set, a pass with fewer captured stations is treated as failed
    #[serde(default)]
    pub min_successes: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            stop_grace_ms: default_stop_grace_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            chunk_size: default_chunk_size(),
            min_successes: None,
        }
    }
}

impl CaptureConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Artifact retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Artifacts expire this long after their capture window starts
    #[serde(default = "default_expiry_margin_secs")]
    pub expiry_margin_secs: u64,

    /// Expected worst-case time from end of capture to dispatch
    #[serde(default = "default_processing_allowance_secs")]
    pub processing_allowance_secs: u64,

    /// Marker file in the artifact directory that is never swept
    #[serde(default = "default_sentinel_file")]
    pub sentinel_file: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            expiry_margin_secs: default_expiry_margin_secs(),
            processing_allowance_secs: default_processing_allowance_secs(),
            sentinel_file: default_sentinel_file(),
        }
    }
}

/// Downstream consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub endpoint: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Pause before the single reconnect-and-resend attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl DispatchConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Descriptor kinds mapped onto color channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    Tempo,
    Loudness,
    Brightness,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptorKind::Tempo => "tempo",
            DescriptorKind::Loudness => "loudness",
            DescriptorKind::Brightness => "brightness",
        };
        f.write_str(name)
    }
}

/// Expected span of one descriptor kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRange {
    pub min: f64,
    pub max: f64,
}

impl CalibrationRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        let range = Self { min, max };
        range.check().map_err(Error::Config)?;
        Ok(range)
    }

    fn check(&self) -> std::result::Result<(), String> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(format!(
                "bounds must be finite (min {}, max {})",
                self.min, self.max
            ));
        }
        if self.min >= self.max {
            return Err(format!("min {} must be below max {}", self.min, self.max));
        }
        Ok(())
    }
}

/// Calibration ranges for all descriptor kinds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Beats per minute
    pub tempo: CalibrationRange,
    /// Integrated loudness, LUFS
    pub loudness: CalibrationRange,
    /// Mean spectral centroid, Hz
    pub brightness: CalibrationRange,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            tempo: CalibrationRange { min: 60.0, max: 140.0 },
            loudness: CalibrationRange { min: -18.0, max: -7.0 },
            brightness: CalibrationRange { min: 400.0, max: 6000.0 },
        }
    }
}

impl Calibration {
    pub fn range(&self, kind: DescriptorKind) -> CalibrationRange {
        match kind {
            DescriptorKind::Tempo => self.tempo,
            DescriptorKind::Loudness => self.loudness,
            DescriptorKind::Brightness => self.brightness,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for kind in [
            DescriptorKind::Tempo,
            DescriptorKind::Loudness,
            DescriptorKind::Brightness,
        ] {
            self.range(kind)
                .check()
                .map_err(|e| Error::Config(format!("calibration.{}: {}", kind, e)))?;
        }
        Ok(())
    }
}

/// Job kind attached to a schedule slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Capture,
    Cleanup,
}

/// How the slot table repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    /// `at` is `MM:SS` and fires every hour
    Hourly,
    /// `at` is `HH:MM:SS` and fires once a day
    Daily,
}

/// Scheduler settings and slot table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_repeat")]
    pub repeat: Repeat,

    /// How late a poll may be and still fire a slot
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,

    /// Fired-slot ledger, relative to the artifact directory
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,

    pub slots: Vec<SlotConfig>,
}

impl ScheduleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_secs)
    }

    /// Expand the slot table into day-relative offsets
    ///
    /// Hourly entries become 24 slots, one per hour of the day. The result is
    /// sorted by offset.
    pub fn expanded_slots(&self) -> Result<Vec<SlotSpec>> {
        let mut expanded = Vec::new();
        for slot in &self.slots {
            for offset_secs in parse_slot_offsets(&slot.at, self.repeat)? {
                expanded.push(SlotSpec {
                    offset_secs,
                    job: slot.job,
                    stations: slot.stations.clone(),
                });
            }
        }
        expanded.sort_by_key(|s| s.offset_secs);
        Ok(expanded)
    }
}

/// One configured slot, as written in the TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    pub at: String,
    pub job: JobKind,
    #[serde(default)]
    pub stations: Vec<StationId>,
}

/// Slot after expansion to a day-relative offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    /// Seconds after UTC midnight
    pub offset_secs: u32,
    pub job: JobKind,
    pub stations: Vec<StationId>,
}

/// One station entry in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: StationId,
    pub stream_url: String,
    pub format: ContainerFormat,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("soundbytes")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_window_secs() -> u64 {
    6
}

fn default_stop_grace_ms() -> u64 {
    1500
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    1024
}

fn default_expiry_margin_secs() -> u64 {
    120
}

fn default_processing_allowance_secs() -> u64 {
    60
}

fn default_sentinel_file() -> String {
    "starter.txt".to_string()
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_repeat() -> Repeat {
    Repeat::Hourly
}

fn default_misfire_grace_secs() -> u64 {
    30
}

fn default_ledger_file() -> PathBuf {
    PathBuf::from("slots.json")
}

impl RadiohueConfig {
    /// Parse configuration from TOML text (no validation)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read config {} failed: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every cross-field rule before the scheduler starts
    pub fn validate(&self) -> Result<()> {
        let registry = self.station_registry()?;

        self.calibration.validate()?;

        if self.capture.window_secs == 0 {
            return Err(Error::Config("capture.window_secs must be > 0".to_string()));
        }
        if self.capture.chunk_size == 0 {
            return Err(Error::Config("capture.chunk_size must be > 0".to_string()));
        }
        if let Some(min) = self.capture.min_successes {
            if min > registry.len() {
                return Err(Error::Config(format!(
                    "capture.min_successes {} exceeds catalog size {}",
                    min,
                    registry.len()
                )));
            }
        }

        let in_flight = self.capture.window_secs + self.retention.processing_allowance_secs;
        if self.retention.expiry_margin_secs <= in_flight {
            return Err(Error::Config(format!(
                "retention.expiry_margin_secs ({}) must exceed window + processing allowance ({})",
                self.retention.expiry_margin_secs, in_flight
            )));
        }
        if self.retention.sentinel_file.trim().is_empty() {
            return Err(Error::Config("retention.sentinel_file is empty".to_string()));
        }

        let endpoint = Url::parse(&self.dispatch.endpoint).map_err(|e| {
            Error::Config(format!(
                "dispatch.endpoint '{}' is not a URL: {}",
                self.dispatch.endpoint, e
            ))
        })?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "dispatch.endpoint must use ws:// or wss://, got '{}'",
                self.dispatch.endpoint
            )));
        }

        if self.schedule.poll_interval_secs == 0 {
            return Err(Error::Config("schedule.poll_interval_secs must be > 0".to_string()));
        }
        if self.schedule.slots.is_empty() {
            return Err(Error::Config("schedule.slots is empty".to_string()));
        }
        for slot in &self.schedule.slots {
            parse_slot_offsets(&slot.at, self.schedule.repeat)?;
            if slot.job == JobKind::Capture {
                if slot.stations.is_empty() {
                    return Err(Error::Config(format!(
                        "capture slot '{}' lists no stations",
                        slot.at
                    )));
                }
                if let Some(unknown) = slot.stations.iter().find(|id| registry.get(id).is_none()) {
                    return Err(Error::Config(format!(
                        "capture slot '{}' references unknown station '{}'",
                        slot.at, unknown
                    )));
                }
            }
        }

        // Two slots of the same kind at one offset would share an occurrence
        let mut seen = HashSet::new();
        for slot in self.schedule.expanded_slots()? {
            if !seen.insert((slot.offset_secs, slot.job)) {
                return Err(Error::Config(format!(
                    "two {:?} slots fire at {:02}:{:02}:{:02}; merge their station lists",
                    slot.job,
                    slot.offset_secs / 3600,
                    slot.offset_secs / 60 % 60,
                    slot.offset_secs % 60
                )));
            }
        }

        Ok(())
    }

    /// Build the immutable station registry from the catalog section
    pub fn station_registry(&self) -> Result<StationRegistry> {
        let mut descriptors = Vec::with_capacity(self.stations.len());
        for station in &self.stations {
            let stream_address = Url::parse(&station.stream_url).map_err(|e| {
                Error::Config(format!(
                    "station '{}' has invalid stream_url '{}': {}",
                    station.id, station.stream_url, e
                ))
            })?;
            if !matches!(stream_address.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "station '{}' stream_url must be http(s), got '{}'",
                    station.id, station.stream_url
                )));
            }
            descriptors.push(StationDescriptor {
                id: station.id.clone(),
                stream_address,
                container_format: station.format,
            });
        }
        StationRegistry::new(descriptors)
    }

    /// Absolute (or artifact-dir relative) path of the scheduler ledger
    pub fn ledger_path(&self) -> PathBuf {
        self.artifact_dir.join(&self.schedule.ledger_file)
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.artifact_dir.join(&self.retention.sentinel_file)
    }
}

/// Parse a slot's `at` field into day-relative offsets in seconds
///
/// `Hourly` accepts `MM:SS` and yields one offset per hour; `Daily` accepts
/// `HH:MM:SS` (or `HH:MM`) and yields one offset.
pub fn parse_slot_offsets(at: &str, repeat: Repeat) -> Result<Vec<u32>> {
    let parts: Vec<u32> = at
        .split(':')
        .map(|p| p.trim().parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::Config(format!("slot time '{}' is not numeric", at)))?;

    match repeat {
        Repeat::Hourly => {
            let &[minutes, seconds] = parts.as_slice() else {
                return Err(Error::Config(format!(
                    "hourly slot time '{}' must be MM:SS",
                    at
                )));
            };
            if minutes >= 60 || seconds >= 60 {
                return Err(Error::Config(format!("hourly slot time '{}' out of range", at)));
            }
            let within_hour = minutes * 60 + seconds;
            Ok((0..24).map(|hour| hour * 3600 + within_hour).collect())
        }
        Repeat::Daily => {
            let (hours, minutes, seconds) = match *parts.as_slice() {
                [h, m] => (h, m, 0),
                [h, m, s] => (h, m, s),
                _ => {
                    return Err(Error::Config(format!(
                        "daily slot time '{}' must be HH:MM[:SS]",
                        at
                    )))
                }
            };
            if hours >= 24 || minutes >= 60 || seconds >= 60 {
                return Err(Error::Config(format!("daily slot time '{}' out of range", at)));
            }
            Ok(vec![hours * 3600 + minutes * 60 + seconds])
        }
    }
}

/// Resolve which config file to load
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: user config directory
    if let Some(path) = dirs::config_dir().map(|d| d.join("radiohue").join("config.toml")) {
        if path.exists() {
            return Ok(path);
        }
    }

    // Priority 4: system-wide config
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/radiohue/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config(format!(
        "No config file found. Pass --config, set {}, or create ~/.config/radiohue/config.toml",
        CONFIG_ENV_VAR
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hourly_offsets_expand_to_every_hour() {
        let offsets = parse_slot_offsets("06:20", Repeat::Hourly).unwrap();
        assert_eq!(offsets.len(), 24);
        assert_eq!(offsets[0], 380);
        assert_eq!(offsets[23], 23 * 3600 + 380);
    }

    #[test]
    fn test_daily_offsets() {
        assert_eq!(parse_slot_offsets("01:02:03", Repeat::Daily).unwrap(), vec![3723]);
        assert_eq!(parse_slot_offsets("23:59", Repeat::Daily).unwrap(), vec![86_340]);
    }

    #[test]
    fn test_slot_offsets_reject_malformed() {
        assert!(parse_slot_offsets("60:00", Repeat::Hourly).is_err());
        assert!(parse_slot_offsets("1:2:3", Repeat::Hourly).is_err());
        assert!(parse_slot_offsets("24:00", Repeat::Daily).is_err());
        assert!(parse_slot_offsets("ab:cd", Repeat::Daily).is_err());
    }

    #[test]
    fn test_calibration_range_rejects_inverted() {
        assert!(CalibrationRange::new(140.0, 60.0).is_err());
        assert!(CalibrationRange::new(1.0, 1.0).is_err());
        assert!(CalibrationRange::new(f64::NAN, 1.0).is_err());
        assert!(CalibrationRange::new(60.0, 140.0).is_ok());
    }

    #[test]
    fn test_default_calibration_is_valid() {
        assert!(Calibration::default().validate().is_ok());
    }
}
