use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A subscription plan a client is enrolled in.
///
/// Invariant: `window_limit` is `Some` iff `window_seconds` is `Some`, and
/// both are positive when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub monthly_limit: u32,
    pub window_limit: Option<u32>,
    pub window_seconds: Option<u32>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    /// Effectively active iff `active` and (no `expires_at`, or it is in the future).
    pub fn is_effectively_active(&self) -> bool {
        if !self.active {
            return false;
        }
        match self.expires_at {
            Some(expiry) => expiry > Utc::now(),
            None => true,
        }
    }
}

/// A registered caller of the notification API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub plan_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A system-wide rate limit rule. Per-client rules are not modelled here —
/// those come from the client's plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub id: Uuid,
    pub limit_value: u32,
    /// Absent means "per calendar month".
    pub global_window_seconds: Option<u32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// The kind of ceiling an [`EffectiveLimit`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitKind {
    Global,
    Monthly,
    Window,
}

impl LimitKind {
    /// Evaluation priority: GLOBAL < MONTHLY < WINDOW (global checked first).
    fn priority(self) -> u8 {
        match self {
            LimitKind::Global => 0,
            LimitKind::Monthly => 1,
            LimitKind::Window => 2,
        }
    }
}

/// A single ceiling materialized for a specific request. Built fresh per
/// admission decision; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveLimit {
    pub kind: LimitKind,
    pub limit: u32,
    /// `Some` for WINDOW and optionally for GLOBAL; `None` means "per
    /// calendar month" for that kind.
    pub window_seconds: Option<u32>,
    /// Present for WINDOW and MONTHLY (client-scoped); absent for GLOBAL.
    pub client_id: Option<Uuid>,
}

impl EffectiveLimit {
    pub fn window(limit: u32, window_seconds: u32, client_id: Uuid) -> Self {
        Self {
            kind: LimitKind::Window,
            limit,
            window_seconds: Some(window_seconds),
            client_id: Some(client_id),
        }
    }

    pub fn monthly(limit: u32, client_id: Uuid) -> Self {
        Self {
            kind: LimitKind::Monthly,
            limit,
            window_seconds: None,
            client_id: Some(client_id),
        }
    }

    pub fn global(limit: u32, window_seconds: Option<u32>) -> Self {
        Self {
            kind: LimitKind::Global,
            limit,
            window_seconds,
            client_id: None,
        }
    }

    /// A ceiling of 0 means "disabled" and is skipped by the evaluator.
    pub fn is_disabled(&self) -> bool {
        self.limit == 0
    }

    /// Sort key implementing the GLOBAL < MONTHLY < WINDOW priority order.
    pub fn priority(&self) -> u8 {
        self.kind.priority()
    }
}

/// Whether a denial carries a cooperative delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThrottleType {
    None,
    Soft,
    Hard,
}

/// The outcome of one admission decision.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit_hit: Option<LimitKind>,
    pub current_count: u64,
    pub ceiling: u32,
    pub remaining: u64,
    pub retry_after_seconds: u64,
    pub exceeded_kind: Option<LimitKind>,
    pub global_usage_ratio: Option<f64>,
    pub throttle: ThrottleType,
    pub soft_delay_ms: u64,
}

impl RateLimitResult {
    /// An empty effective-limit list admits unconditionally.
    pub fn admit_unconditional() -> Self {
        Self {
            allowed: true,
            limit_hit: None,
            current_count: 0,
            ceiling: 0,
            remaining: u64::MAX,
            retry_after_seconds: 0,
            exceeded_kind: None,
            global_usage_ratio: None,
            throttle: ThrottleType::None,
            soft_delay_ms: 0,
        }
    }
}

/// Inbound body for `POST /api/notify/{sms,email}`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyRequest {
    pub recipient: String,
    pub message: String,
}

impl NotifyRequest {
    pub fn is_valid(&self) -> bool {
        !self.recipient.trim().is_empty() && !self.message.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyResponse {
    pub success: bool,
    pub id: Uuid,
    pub channel: Channel,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}
