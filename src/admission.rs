//! The admission filter (spec §4.6): gates `/api/notify/*` on API-key auth,
//! subscription resolution, effective-limit assembly, and the atomic
//! evaluator, then tags error bodies with the request path before they
//! leave the process (spec §7).

use crate::config::Config;
use crate::error::{AppError, RateLimitDenial, Result};
use crate::limits;
use crate::resolver;
use crate::store::{CounterBackend, DurableStore};
use crate::types::RateLimitResult;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Shared application state, handed to every handler and middleware layer.
pub struct AppState {
    pub durable: DurableStore,
    pub counters: Arc<dyn CounterBackend>,
    pub config: Config,
}

pub async fn admission_middleware(State(state): State<Arc<AppState>>, request: Request<Body>, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();

    match authorize_and_admit(&state, &request).await {
        Err(err) => tag_error_path(err.into_response(), &path).await,
        Ok(AdmissionOutcome::Denied(result)) => {
            if result.soft_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(result.soft_delay_ms)).await;
            }
            let denial = AppError::RateLimited(RateLimitDenial {
                limit_type: result.exceeded_kind.expect("denial always carries the exceeded kind"),
                throttle_type: result.throttle,
                limit: result.ceiling,
                current: result.current_count,
                retry_after_seconds: result.retry_after_seconds,
            });
            tag_error_path(denial.into_response(), &path).await
        }
        Ok(AdmissionOutcome::Admitted(result)) => {
            let mut response = next.run(request).await;
            apply_admitted_headers(&mut response, &result);
            response
        }
    }
}

enum AdmissionOutcome {
    Admitted(RateLimitResult),
    Denied(RateLimitResult),
}

async fn authorize_and_admit(state: &AppState, request: &Request<Body>) -> Result<AdmissionOutcome> {
    let api_key = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim();

    if api_key.is_empty() {
        return Err(AppError::AuthMissing);
    }

    let (client, _) = state
        .durable
        .get_client_with_plan(api_key)
        .await?
        .ok_or(AppError::AuthInvalid)?;

    if !client.active {
        return Err(AppError::ClientInactive);
    }

    let plan = resolver::resolve(state.counters.as_ref(), &state.durable, client.id, api_key).await?;
    let Some(plan) = plan else {
        return Err(AppError::NoActiveSubscription);
    };

    let global_rules = state.durable.get_active_global_rules().await?;
    let effective_limits = limits::assemble(&client, &plan, &global_rules);

    let result = crate::evaluator::evaluate(
        state.counters.as_ref(),
        &client,
        &effective_limits,
        &state.config.throttling,
    )
    .await?;

    if result.allowed {
        Ok(AdmissionOutcome::Admitted(result))
    } else {
        Ok(AdmissionOutcome::Denied(result))
    }
}

fn apply_admitted_headers(response: &mut Response, result: &RateLimitResult) {
    if result.ceiling == 0 {
        return;
    }
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&result.ceiling.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&result.remaining.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), v);
    }
}

/// Stamp the `path` field into an error JSON body once the response has
/// reached the outermost layer, preserving rate-limit headers set earlier.
async fn tag_error_path(response: Response, path: &str) -> Response {
    let status = response.status();
    let carried_headers: Vec<(HeaderName, HeaderValue)> = ["retry-after", "x-ratelimit-limit", "x-ratelimit-remaining"]
        .into_iter()
        .filter_map(|name: &'static str| {
            response
                .headers()
                .get(name)
                .map(|v| (HeaderName::from_static(name), v.clone()))
        })
        .collect();

    let body = response.into_body();
    let bytes = match axum::body::to_bytes(body, 64 * 1024).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read error body for path tagging");
            return (status, "internal error").into_response();
        }
    };

    let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("path".to_string(), json!(path));
    }

    let mut out = (status, Json(value)).into_response();
    for (name, value) in carried_headers {
        out.headers_mut().insert(name, value);
    }
    out
}
