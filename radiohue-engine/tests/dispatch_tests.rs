//! Dispatch client integration tests against a local WebSocket consumer

mod helpers;

use chrono::TimeZone;
use helpers::{spawn_counting_rejector, spawn_ws_sink, SinkBehavior};
use radiohue_common::StationId;
use radiohue_engine::dispatch::{DispatchClient, DispatchSettings};
use radiohue_engine::{ColorResult, ErrorKind, RawDescriptorSet};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn settings(endpoint: String) -> DispatchSettings {
    DispatchSettings {
        endpoint,
        connect_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        retry_backoff: Duration::from_millis(50),
    }
}

fn result(station: &str, rgb: [u8; 3]) -> ColorResult {
    ColorResult {
        station_id: StationId::new(station).unwrap(),
        timestamp: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        rgb,
        raw: RawDescriptorSet {
            tempo_bpm: 121.7,
            loudness_lufs: -11.2,
            brightness_hz: 1834.9,
        },
    }
}

#[tokio::test]
async fn test_envelope_shape() {
    let mut sink = spawn_ws_sink(SinkBehavior::KeepOpen).await;
    let client = DispatchClient::new(settings(sink.url()));

    client.send(&result("DDR", [12, 200, 34])).await.unwrap();

    let json: serde_json::Value = serde_json::from_str(&sink.next_message().await).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "schema_version": 1,
            "station": "DDR",
            "timestamp": 1_700_000_000,
            "rgb": [12, 200, 34],
            "raw": {
                "tempo_bpm": 121,
                "loudness_lufs": -11,
                "brightness_hz": 1834
            }
        })
    );
}

#[tokio::test]
async fn test_connection_is_reused_and_ordered() {
    let mut sink = spawn_ws_sink(SinkBehavior::KeepOpen).await;
    let client = DispatchClient::new(settings(sink.url()));

    for station in ["DDR", "BFF", "KOOP"] {
        client.send(&result(station, [1, 2, 3])).await.unwrap();
    }

    for expected in ["DDR", "BFF", "KOOP"] {
        let json: serde_json::Value = serde_json::from_str(&sink.next_message().await).unwrap();
        assert_eq!(json["station"], expected);
    }
    assert_eq!(sink.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_connection_is_reestablished() {
    let mut sink = spawn_ws_sink(SinkBehavior::CloseAfterFirst).await;
    let client = DispatchClient::new(settings(sink.url()));

    client.send(&result("DDR", [1, 1, 1])).await.unwrap();
    sink.next_message().await;

    // Let the close frame reach the client
    tokio::time::sleep(Duration::from_millis(200)).await;

    client.send(&result("BFF", [2, 2, 2])).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&sink.next_message().await).unwrap();
    assert_eq!(json["station"], "BFF");
    assert_eq!(sink.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_after_two_attempts() {
    let (url, attempts) = spawn_counting_rejector().await;
    let client = DispatchClient::new(settings(url));

    let err = client.send(&result("DDR", [0, 0, 0])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DispatchError);

    // The rejector may still be counting the second accept
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
