//! Helpers shared by the unit tests: local HTTP servers standing in for the
//! playlist host and the track CDN.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::Router;
use futures_util::StreamExt;

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A 200 body that sends one chunk and then never finishes.
pub fn stalled_body() -> Body {
    let first = futures_util::stream::once(async {
        Ok::<_, std::io::Error>(Bytes::from_static(b"ID3 partial"))
    });
    Body::from_stream(first.chain(futures_util::stream::pending()))
}

/// Poll `check` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
