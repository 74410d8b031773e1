//! Test Helper Utilities
//!
//! Shared fixtures for the radiohue-engine integration tests: synthetic audio,
//! a fake live-stream server and a fake downstream consumer.

#![allow(dead_code)]

pub mod audio_generator;
pub mod stream_server;
pub mod ws_sink;

pub use audio_generator::{click_track_wav, ClickTrack};
pub use stream_server::{refused_url, spawn_stream_server};
pub use ws_sink::{spawn_counting_rejector, spawn_ws_sink, SinkBehavior, WsSink};
