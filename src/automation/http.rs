//! Loopback HTTP transport for the automation endpoints. Grounded on
//! `Lowband21-ferrex/server`'s `axum::Router` + `Arc<AppState>` shape, bound
//! exclusively to 127.0.0.1 per spec §4.L ("rejects non-local connections").

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{handle_intent, AutomationContext, RequestEnvelope};

pub async fn serve(ctx: Arc<AutomationContext>, port: u16, cancellation: CancellationToken) -> std::io::Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let router = Router::new()
        .route("/clop/optimise", post(optimise))
        .route("/clop/share", post(share))
        .route("/clop/teams/card", post(teams_card))
        .route("/clop/status", get(status))
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "automation HTTP listener bound to loopback");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancellation.cancelled().await })
        .await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn require_auth(ctx: &AutomationContext, headers: &HeaderMap) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    if ctx.authorised(bearer_token(headers)) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized", "message": "missing or invalid bearer token" })),
        ))
    }
}

async fn optimise(
    State(ctx): State<Arc<AutomationContext>>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    if let Err(response) = require_auth(&ctx, &headers) {
        return response.into_response();
    }
    let envelope = RequestEnvelope {
        intent: "optimise".to_string(),
        request_id: None,
        keep_alive: false,
        payload: Some(payload),
    };
    let response = handle_intent(&ctx, envelope).await;
    (StatusCode::OK, Json(response)).into_response()
}

async fn share(
    State(ctx): State<Arc<AutomationContext>>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    if let Err(response) = require_auth(&ctx, &headers) {
        return response.into_response();
    }
    // Sharing reuses the optimise pipeline; the caller distinguishes intent
    // by endpoint, not by payload shape.
    let envelope = RequestEnvelope {
        intent: "optimise".to_string(),
        request_id: None,
        keep_alive: false,
        payload: Some(payload),
    };
    let response = handle_intent(&ctx, envelope).await;
    (StatusCode::OK, Json(response)).into_response()
}

async fn teams_card(State(ctx): State<Arc<AutomationContext>>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(response) = require_auth(&ctx, &headers) {
        return response.into_response();
    }
    if !ctx.settings.get(crate::settings::keys::ENABLE_TEAMS_ADAPTIVE_CARDS) {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found", "message": "teams cards disabled" }))).into_response();
    }
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn status(State(ctx): State<Arc<AutomationContext>>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(response) = require_auth(&ctx, &headers) {
        return response.into_response();
    }
    let envelope = RequestEnvelope {
        intent: "status".to_string(),
        request_id: None,
        keep_alive: false,
        payload: None,
    };
    let response = handle_intent(&ctx, envelope).await;
    (StatusCode::OK, Json(response)).into_response()
}
