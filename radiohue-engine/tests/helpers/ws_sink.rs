//! Fake downstream consumer
//!
//! A WebSocket listener that forwards every text frame it receives to the
//! test over a channel.

use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkBehavior {
    /// Keep every connection open
    KeepOpen,
    /// Close each connection after its first message
    CloseAfterFirst,
}

pub struct WsSink {
    pub addr: SocketAddr,
    pub messages: mpsc::UnboundedReceiver<String>,
    pub connections: Arc<AtomicUsize>,
}

impl WsSink {
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Next message, failing the test after two seconds
    pub async fn next_message(&mut self) -> String {
        tokio::time::timeout(std::time::Duration::from_secs(2), self.messages.recv())
            .await
            .expect("timed out waiting for dispatch")
            .expect("sink closed")
    }
}

pub async fn spawn_ws_sink(behavior: SinkBehavior) -> WsSink {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind sink");
    let addr = listener.local_addr().expect("local addr");
    let (tx, messages) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            tokio::spawn(async move {
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        let _ = tx.send(text.to_string());
                        if behavior == SinkBehavior::CloseAfterFirst {
                            let _ = ws.close(None).await;
                            break;
                        }
                    }
                }
            });
        }
    });

    WsSink {
        addr,
        messages,
        connections,
    }
}

/// Accept TCP connections and drop them before the handshake; returns the
/// endpoint URL and the number of connection attempts seen
pub async fn spawn_counting_rejector() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind rejector");
    let addr = listener.local_addr().expect("local addr");
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    (format!("ws://{}/ws", addr), attempts)
}
