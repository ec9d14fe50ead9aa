//! Subscription resolver + cache (spec §4.2): resolves a client id to the
//! currently effective plan, or the NONE sentinel, through the counter
//! store's read-through cache.

use crate::error::Result;
use crate::store::{CounterBackend, DurableStore, SubCacheValue};
use crate::types::SubscriptionPlan;
use chrono::Utc;
use uuid::Uuid;

const NEGATIVE_CACHE_TTL_SECONDS: u64 = 300;
const NO_EXPIRY_TTL_SECONDS: u64 = 3600;
const EXPIRED_PLAN_TTL_SECONDS: u64 = 60;
const MIN_POSITIVE_TTL_SECONDS: u64 = 60;
const MAX_POSITIVE_TTL_SECONDS: u64 = 3600;

/// Resolve the currently effective plan for `client_id`, or `None` (the §4.2
/// NONE sentinel) if there isn't one.
pub async fn resolve(
    counters: &dyn CounterBackend,
    durable: &DurableStore,
    client_id: Uuid,
    api_key: &str,
) -> Result<Option<SubscriptionPlan>> {
    match counters.get_subscription_cache(client_id).await? {
        SubCacheValue::Expired => return Ok(None),
        SubCacheValue::Plan(plan) => return Ok(Some(plan)),
        SubCacheValue::Miss => {}
    }

    let fetched = durable.get_client_with_plan(api_key).await?;

    let Some((_, plan)) = fetched else {
        counters
            .set_subscription_expired(client_id, NEGATIVE_CACHE_TTL_SECONDS)
            .await?;
        return Ok(None);
    };

    if !plan.is_effectively_active() {
        counters
            .set_subscription_expired(client_id, NEGATIVE_CACHE_TTL_SECONDS)
            .await?;
        return Ok(None);
    }

    let ttl = positive_cache_ttl(&plan);
    counters.set_subscription_cache(client_id, &plan, ttl).await?;
    Ok(Some(plan))
}

/// The positive-cache TTL for an effectively-active plan (spec §4.2 step 6).
fn positive_cache_ttl(plan: &SubscriptionPlan) -> u64 {
    match plan.expires_at {
        None => NO_EXPIRY_TTL_SECONDS,
        Some(expiry) => {
            let remaining = (expiry - Utc::now()).num_seconds();
            if remaining <= 0 {
                EXPIRED_PLAN_TTL_SECONDS
            } else {
                ((remaining / 2) as u64).clamp(MIN_POSITIVE_TTL_SECONDS, MAX_POSITIVE_TTL_SECONDS)
            }
        }
    }
}
