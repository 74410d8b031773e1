//! Downstream dispatch over a persistent WebSocket
//!
//! One connection per client, opened lazily and reused. Sends are serialised
//! behind the connection mutex so results leave in the order they were
//! handed over. A failed send drops the connection, waits the retry backoff,
//! reconnects and resends exactly once; a second failure is a dispatch error
//! and the result is dropped by the caller.

use crate::color::ColorResult;
use crate::error::{Error, Result};
use futures::{FutureExt, SinkExt, StreamExt};
use radiohue_common::config::DispatchConfig;
use radiohue_common::time;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub const SCHEMA_VERSION: u32 = 1;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Wire form of a color result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: u32,
    pub station: String,
    /// Unix seconds
    pub timestamp: i64,
    pub rgb: [u8; 3],
    pub raw: RawValues,
}

/// Descriptor values truncated toward zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawValues {
    pub tempo_bpm: i64,
    pub loudness_lufs: i64,
    pub brightness_hz: i64,
}

impl From<&ColorResult> for Envelope {
    fn from(result: &ColorResult) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            station: result.station_id.to_string(),
            timestamp: time::unix_seconds(result.timestamp),
            rgb: result.rgb,
            raw: RawValues {
                tempo_bpm: result.raw.tempo_bpm.trunc() as i64,
                loudness_lufs: result.raw.loudness_lufs.trunc() as i64,
                brightness_hz: result.raw.brightness_hz.trunc() as i64,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub retry_backoff: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_timeout: config.connect_timeout(),
            send_timeout: config.send_timeout(),
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// Pushes color results to the configured endpoint
pub struct DispatchClient {
    settings: DispatchSettings,
    connection: Mutex<Option<WsStream>>,
}

impl DispatchClient {
    /// Create a client; the connection is opened on first send
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            settings,
            connection: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.settings.endpoint
    }

    /// Serialise and push one result, with one reconnect-and-resend on failure
    pub async fn send(&self, result: &ColorResult) -> Result<()> {
        let payload = serde_json::to_string(&Envelope::from(result))
            .map_err(|e| Error::Dispatch(format!("failed to encode envelope: {}", e)))?;

        let mut connection = self.connection.lock().await;

        let first = match self.attempt(&mut connection, &payload).await {
            Ok(()) => return Ok(()),
            Err(reason) => reason,
        };

        warn!(
            station = %result.station_id,
            endpoint = %self.settings.endpoint,
            error = %first,
            "Dispatch failed, reconnecting"
        );
        tokio::time::sleep(self.settings.retry_backoff).await;

        self.attempt(&mut connection, &payload)
            .await
            .map_err(|second| {
                Error::Dispatch(format!(
                    "{} unreachable after retry: {} (first attempt: {})",
                    self.settings.endpoint, second, first
                ))
            })
    }

    /// Close the connection if one is open
    pub async fn close(&self) {
        let Some(mut ws) = self.connection.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(Duration::from_secs(5), ws.close(None)).await {
            Ok(Ok(())) => debug!("Dispatch connection closed"),
            Ok(Err(e)) => debug!(error = %e, "Error closing dispatch connection"),
            Err(_) => debug!("Timed out closing dispatch connection"),
        }
    }

    /// One send on the current (or a fresh) connection; drops the connection on failure
    async fn attempt(
        &self,
        connection: &mut Option<WsStream>,
        payload: &str,
    ) -> std::result::Result<(), String> {
        let outcome = self.send_on(connection, payload).await;
        if outcome.is_err() {
            *connection = None;
        }
        outcome
    }

    async fn send_on(
        &self,
        connection: &mut Option<WsStream>,
        payload: &str,
    ) -> std::result::Result<(), String> {
        if connection.is_none() {
            *connection = Some(self.connect().await?);
        }
        let Some(ws) = connection.as_mut() else {
            return Err("no connection".to_string());
        };

        drain_inbound(ws)?;

        match tokio::time::timeout(
            self.settings.send_timeout,
            ws.send(Message::Text(payload.to_string())),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("send failed: {}", e)),
            Err(_) => Err("send timed out".to_string()),
        }
    }

    async fn connect(&self) -> std::result::Result<WsStream, String> {
        let endpoint = self.settings.endpoint.as_str();
        match tokio::time::timeout(self.settings.connect_timeout, connect_async(endpoint)).await {
            Ok(Ok((ws, _response))) => {
                info!(endpoint, "Dispatch connection established");
                Ok(ws)
            }
            Ok(Err(e)) => Err(format!("connect failed: {}", e)),
            Err(_) => Err("connect timed out".to_string()),
        }
    }
}

impl std::fmt::Debug for DispatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClient")
            .field("endpoint", &self.settings.endpoint)
            .finish()
    }
}

/// Consume frames the peer already sent (acks, pings) without waiting
///
/// A close frame or end of stream means the connection is gone.
fn drain_inbound(ws: &mut WsStream) -> std::result::Result<(), String> {
    loop {
        match ws.next().now_or_never() {
            None => return Ok(()),
            Some(None) => return Err("connection closed by peer".to_string()),
            Some(Some(Ok(Message::Close(_)))) => {
                return Err("peer closed the connection".to_string())
            }
            Some(Some(Ok(_))) => continue,
            Some(Some(Err(e))) => return Err(format!("connection error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::RawDescriptorSet;
    use chrono::TimeZone;
    use radiohue_common::StationId;

    #[test]
    fn test_envelope_truncates_toward_zero() {
        let result = ColorResult {
            station_id: StationId::new("KOOP").unwrap(),
            timestamp: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            rgb: [10, 20, 30],
            raw: RawDescriptorSet {
                tempo_bpm: 117.9,
                loudness_lufs: -9.8,
                brightness_hz: 2345.6,
            },
        };

        let envelope = Envelope::from(&result);
        assert_eq!(envelope.schema_version, 1);
        assert_eq!(envelope.station, "KOOP");
        assert_eq!(envelope.timestamp, 1_700_000_000);
        assert_eq!(
            envelope.raw,
            RawValues {
                tempo_bpm: 117,
                loudness_lufs: -9,
                brightness_hz: 2345,
            }
        );
    }
}
