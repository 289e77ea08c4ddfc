//! The dispatcher's own thin HTTP surface (§1.1, §4.8).
//!
//! This is deliberately narrow and is NOT a reverse proxy: `/api/v1/dispatch`
//! returns the chosen worker's `(host, port)` as JSON, it does not forward
//! request bodies, enforce auth, or stream responses — those remain the
//! external collaborator's concern (§6). A second, separate listener on
//! `ParentPort` serves `/idle-seconds`, the control channel workers poll
//! to decide whether to self-terminate (§4.7).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

/// `GET /api/v1/health` — dispatcher self-health: pool occupancy and the
/// count of workers per lifecycle state.
async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let registry = ctx.scheduler.registry();
    let ready = registry.snapshot_ready_ports().await;
    let non_dead = registry.non_dead_count().await;
    Json(json!({
        "status": "ok",
        "spawn_count": ctx.config.spawn_count,
        "non_dead_workers": non_dead,
        "ready_workers": ready.len(),
        "ready_ports": ready,
    }))
}

/// `POST /api/v1/dispatch` — calls `Scheduler::acquire_worker` and returns
/// the chosen worker's endpoint, or a 503 body via `DispatcherError`'s
/// `IntoResponse` impl when none became available in time.
async fn dispatch(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Value>, crate::error::DispatcherError> {
    let (host, port) = ctx.scheduler.acquire_worker().await?;
    Ok(Json(json!({ "host": host, "port": port })))
}

/// Builds the dispatcher's own REST router — `/api/v1/health` and
/// `/api/v1/dispatch` — bound to `config.rest_port`.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/dispatch", post(dispatch))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Serve the dispatcher's own REST surface until the process exits.
pub async fn serve_rest_api(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let addr: SocketAddr = ([127, 0, 0, 1], ctx.config.rest_port).into();
    let router = build_router(ctx);
    info!(%addr, "dispatcher REST API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// `GET /idle-seconds` on `ParentPort` — the control channel geometry
/// workers poll to decide whether to self-terminate per their `-idlespan`
/// argument (§4.7, §6). Kept as a separate listener (not merged into the
/// REST router above) because it is bound to an operator-configured port
/// distinct from `RestPort` and must stay reachable even if the REST API
/// is disabled or fails to bind.
async fn idle_seconds(State(ctx): State<Arc<AppContext>>) -> String {
    ctx.activity_clock.idle_seconds().await.to_string()
}

/// Serve the `/idle-seconds` listener on `config.parent_port` until the
/// process exits. A `parent_port` of 0 disables this listener entirely —
/// workers spawned with no `-parentport` argument never poll it.
pub async fn serve_idle_seconds(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    if ctx.config.parent_port == 0 {
        return Ok(());
    }
    let addr: SocketAddr = ([127, 0, 0, 1], ctx.config.parent_port).into();
    let router = Router::new()
        .route("/idle-seconds", get(idle_seconds))
        .with_state(ctx);
    info!(%addr, "parent-activity listener for geometry workers is up");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config(rest_port: u16, parent_port: u16) -> DaemonConfig {
        DaemonConfig {
            spawn_count: 1,
            child_idle_span_secs: 0,
            spawn_on_startup: false,
            parent_port,
            rest_port,
            rhino_sysdir: None,
            log: "info".into(),
            worker_executable: PathBuf::from("sleep"),
            port_range_start: 19601,
            port_range_len: 8,
        }
    }

    #[tokio::test]
    async fn health_reports_empty_pool() {
        let ctx = AppContext::new(test_config(19701, 0));
        let router = build_router(ctx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:19701")
            .await
            .expect("bind rest test port");
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let resp = reqwest::get("http://127.0.0.1:19701/api/v1/health")
            .await
            .expect("health request");
        assert!(resp.status().is_success());
        let body: Value = resp.json().await.expect("health json body");
        assert_eq!(body["non_dead_workers"], 0);
        assert_eq!(body["ready_workers"], 0);
    }

    #[tokio::test]
    async fn idle_seconds_reports_negative_one_before_any_dispatch() {
        let ctx = AppContext::new(test_config(0, 0));
        assert_eq!(ctx.activity_clock.idle_seconds().await, -1);
        let body = idle_seconds(State(ctx)).await;
        assert_eq!(body, "-1");
    }

    #[tokio::test]
    async fn idle_seconds_listener_serves_after_a_dispatch_attempt() {
        let ctx = AppContext::new(test_config(19702, 19703));
        ctx.activity_clock.update_last_call().await;

        let ctx_for_listener = ctx.clone();
        tokio::spawn(async move {
            serve_idle_seconds(ctx_for_listener).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let resp = reqwest::get("http://127.0.0.1:19703/idle-seconds")
            .await
            .expect("idle-seconds request");
        assert!(resp.status().is_success());
        let text = resp.text().await.expect("idle-seconds body");
        let idle: i64 = text.trim().parse().expect("idle seconds should parse");
        assert!((0..=1).contains(&idle));
    }
}
