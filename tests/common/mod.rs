//! Loopback HTTP server that records what it receives.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
};
use tokio::sync::mpsc;

#[derive(Debug)]
pub struct Recorded {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

async fn record(
    State(tx): State<mpsc::UnboundedSender<Recorded>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let redirect = uri.path() == "/moved";
    let _ = tx.send(Recorded {
        method,
        uri,
        headers,
        body,
    });

    if redirect {
        (StatusCode::FOUND, [("location", "/elsewhere")], "").into_response()
    } else {
        (StatusCode::OK, "recorded").into_response()
    }
}

/// Spawn the server; returns its base URL and the stream of recorded requests.
pub async fn spawn_recorder() -> (String, mpsc::UnboundedReceiver<Recorded>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().fallback(record).with_state(tx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr: SocketAddr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    (format!("http://{}", addr), rx)
}

/// Spawn a listener that accepts connections and never answers. Returns its base
/// URL and the number of connections accepted so far.
pub async fn spawn_silent() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            open.push(socket);
        }
    });

    (format!("http://{}", addr), accepted)
}
