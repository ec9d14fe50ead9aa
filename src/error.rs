use crate::types::{LimitKind, ThrottleType};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// The extra fields a 429 response carries beyond the common error shape.
#[derive(Debug, Clone)]
pub struct RateLimitDenial {
    pub limit_type: LimitKind,
    pub throttle_type: ThrottleType,
    pub limit: u32,
    pub current: u64,
    pub retry_after_seconds: u64,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing X-API-Key header")]
    AuthMissing,

    #[error("Invalid API key")]
    AuthInvalid,

    #[error("Client is inactive")]
    ClientInactive,

    #[error("no active subscription for this client")]
    NoActiveSubscription,

    #[error("rate limit exceeded")]
    RateLimited(RateLimitDenial),

    #[error("counter store unavailable: {0}")]
    CounterStoreUnavailable(String),

    #[error("durable store unavailable: {0}")]
    DurableStoreUnavailable(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::AuthMissing | AppError::AuthInvalid => StatusCode::UNAUTHORIZED,
            AppError::ClientInactive => StatusCode::FORBIDDEN,
            AppError::NoActiveSubscription => StatusCode::TOO_MANY_REQUESTS,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::CounterStoreUnavailable(_) | AppError::DurableStoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_) | AppError::Io(_) | AppError::Toml(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::AuthMissing => "Unauthorized",
            AppError::AuthInvalid => "Unauthorized",
            AppError::ClientInactive => "Forbidden",
            AppError::NoActiveSubscription => "Too Many Requests",
            AppError::RateLimited(_) => "Too Many Requests",
            AppError::CounterStoreUnavailable(_) | AppError::DurableStoreUnavailable(_) => {
                "Service Unavailable"
            }
            AppError::MalformedRequest(_) => "Bad Request",
            _ => "Internal Server Error",
        }
    }
}

// Response body shape: `{timestamp, status, error, message, path}`, with
// `limitType`/`throttleType`/`limit`/`current`/`retryAfterSeconds` added for
// rate-limit denials. `path` is filled in by `crate::admission::tag_error_path`
// once the response reaches the outermost middleware layer, since `AppError`
// itself has no access to the request URI.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.error_code();
        let message = self.to_string();
        let timestamp = chrono::Utc::now().to_rfc3339();

        let mut body = json!({
            "timestamp": timestamp,
            "status": status.as_u16(),
            "error": error,
            "message": message,
            "path": serde_json::Value::Null,
        });

        if let AppError::RateLimited(ref denial) = self {
            body["limitType"] = json!(denial.limit_type);
            body["throttleType"] = json!(denial.throttle_type);
            body["limit"] = json!(denial.limit);
            body["current"] = json!(denial.current);
            body["retryAfterSeconds"] = json!(denial.retry_after_seconds);
        }

        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited(ref denial) = self {
            let headers = response.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&denial.retry_after_seconds.to_string()) {
                headers.insert("Retry-After", v);
            }
            if let Ok(v) = HeaderValue::from_str(&denial.limit.to_string()) {
                headers.insert("X-RateLimit-Limit", v);
            }
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        }

        response
    }
}
