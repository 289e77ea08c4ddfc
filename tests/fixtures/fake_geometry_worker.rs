//! Stand-in geometry worker for integration tests.
//!
//! Speaks the same `-port:<int> -childof:<pid>` command-line contract as a
//! real `compute.geometry` worker (§6) and serves `/healthcheck` and
//! `/isbusy` (§4.2). A test-only `/set-busy/:n` endpoint lets the test
//! driver flip the reported busy count without a real compute workload —
//! this endpoint does not exist on the real worker and is not part of the
//! dispatcher's contract.

use axum::extract::Path;
use axum::routing::{get, post};
use axum::Router;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn parse_colon_arg(arg: &str, prefix: &str) -> Option<String> {
    arg.strip_prefix(prefix).map(str::to_string)
}

#[tokio::main]
async fn main() {
    let mut port: Option<u16> = None;
    for arg in std::env::args().skip(1) {
        if let Some(v) = parse_colon_arg(&arg, "-port:") {
            port = v.parse().ok();
        }
    }
    let port = port.expect("fake-geometry-worker requires -port:<int>");

    let busy = Arc::new(AtomicU64::new(0));

    let app = Router::new()
        .route("/healthcheck", get(|| async { "ok" }))
        .route(
            "/isbusy",
            get({
                let busy = busy.clone();
                move || {
                    let busy = busy.clone();
                    async move { busy.load(Ordering::SeqCst).to_string() }
                }
            }),
        )
        .route(
            "/set-busy/{n}",
            post({
                let busy = busy.clone();
                move |Path(n): Path<u64>| {
                    let busy = busy.clone();
                    async move {
                        busy.store(n, Ordering::SeqCst);
                        "ok"
                    }
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("bind fake worker port");
    axum::serve(listener, app).await.expect("serve fake worker");
}
