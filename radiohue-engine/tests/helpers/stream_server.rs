//! Fake live-stream server
//!
//! Serves a fixed body in small chunks and then keeps the connection open
//! without sending anything more, the way a live station looks once the
//! capture has caught up with it.

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;

async fn live(body: Arc<Vec<u8>>) -> Response {
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        body.chunks(4096).map(|c| Ok(c.to_vec())).collect();
    let stream = futures::stream::iter(chunks).chain(futures::stream::pending());
    Body::from_stream(stream).into_response()
}

async fn finite(body: Arc<Vec<u8>>) -> Response {
    Body::from(body.as_ref().clone()).into_response()
}

/// Start a server on an ephemeral port
///
/// Routes: `/live` (body then stall), `/finite` (body then close),
/// `/missing` (404).
pub async fn spawn_stream_server(body: Vec<u8>) -> SocketAddr {
    let body = Arc::new(body);
    let live_body = Arc::clone(&body);
    let finite_body = Arc::clone(&body);

    let app = Router::new()
        .route("/live", get(move || live(Arc::clone(&live_body))))
        .route("/finite", get(move || finite(Arc::clone(&finite_body))))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stream server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An http URL on a port nothing listens on
pub async fn refused_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}/live", addr)
}
