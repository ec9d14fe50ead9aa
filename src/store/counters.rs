//! The shared counter store (spec §4.1, §4.2, §4.4): Redis-backed atomic
//! multi-limit check-and-increment plus the subscription cache.

use super::scripts::MULTI_LIMIT_EVAL;
use crate::error::{AppError, Result};
use crate::types::SubscriptionPlan;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::debug;
use uuid::Uuid;

const EXPIRED_SENTINEL: &str = "EXPIRED";

/// Result of the §4.4 atomic evaluator, in terms of raw counter-store keys.
#[derive(Debug, Clone)]
pub enum EvalOutcome {
    Admitted {
        /// Post-increment count for each key, same order as the input.
        counts: Vec<u64>,
        /// The maximum TTL across all incremented keys.
        max_ttl_seconds: u64,
    },
    Denied {
        /// Index (in the input order) of the first ceiling that was already met.
        failed_index: usize,
        current_count: u64,
        ceiling: u32,
        residual_ttl_seconds: u64,
    },
}

/// What the subscription cache holds for a client (spec §4.2).
#[derive(Debug, Clone)]
pub enum SubCacheValue {
    Plan(SubscriptionPlan),
    Expired,
    Miss,
}

/// Abstraction over the counter store so the evaluator and resolver can be
/// unit tested without a live Redis instance. The production implementation
/// is [`RedisCounterStore`]; an in-memory double lives under `#[cfg(test)]`.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// The atomic multi-limit check-and-increment (spec §4.4).
    async fn eval_multi_limit(&self, keys: &[String], limits: &[u32], ttls: &[u64]) -> Result<EvalOutcome>;

    async fn get_subscription_cache(&self, client_id: Uuid) -> Result<SubCacheValue>;
    async fn set_subscription_cache(&self, client_id: Uuid, plan: &SubscriptionPlan, ttl_seconds: u64) -> Result<()>;
    async fn set_subscription_expired(&self, client_id: Uuid, ttl_seconds: u64) -> Result<()>;

    /// Delete the subscription cache entry and every counter key for a
    /// client (spec §4.2, §6 admin-surface invalidation contract).
    async fn invalidate_client(&self, client_id: Uuid) -> Result<()>;

    /// A cheap liveness probe for `GET /health`.
    async fn ping(&self) -> Result<()>;
}

pub struct RedisCounterStore {
    client: Client,
    manager: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::CounterStoreUnavailable(format!("invalid redis URL: {}", e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::CounterStoreUnavailable(format!("failed to connect to redis: {}", e)))?;
        Ok(Self {
            client,
            manager,
            script: Script::new(MULTI_LIMIT_EVAL),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish()
    }
}

#[async_trait]
impl CounterBackend for RedisCounterStore {
    async fn eval_multi_limit(&self, keys: &[String], limits: &[u32], ttls: &[u64]) -> Result<EvalOutcome> {
        let mut invocation = self.script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for limit in limits {
            invocation.arg(*limit);
        }
        for ttl in ttls {
            invocation.arg(*ttl);
        }

        let mut conn = self.conn();
        let raw: redis::Value = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;

        parse_eval_outcome(raw)
    }

    async fn get_subscription_cache(&self, client_id: Uuid) -> Result<SubCacheValue> {
        let key = crate::buckets::subscription_cache_key(client_id);
        let mut conn = self.conn();
        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;

        match value {
            None => Ok(SubCacheValue::Miss),
            Some(v) if v == EXPIRED_SENTINEL => Ok(SubCacheValue::Expired),
            Some(v) => match serde_json::from_str::<SubscriptionPlan>(&v) {
                Ok(plan) => Ok(SubCacheValue::Plan(plan)),
                Err(e) => {
                    debug!(error = %e, "failed to deserialize cached subscription plan");
                    Ok(SubCacheValue::Miss)
                }
            },
        }
    }

    async fn set_subscription_cache(&self, client_id: Uuid, plan: &SubscriptionPlan, ttl_seconds: u64) -> Result<()> {
        let key = crate::buckets::subscription_cache_key(client_id);
        let payload = serde_json::to_string(plan).map_err(|e| AppError::Internal(e.into()))?;
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(&key, payload, ttl_seconds)
            .await
            .map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn set_subscription_expired(&self, client_id: Uuid, ttl_seconds: u64) -> Result<()> {
        let key = crate::buckets::subscription_cache_key(client_id);
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(&key, EXPIRED_SENTINEL, ttl_seconds)
            .await
            .map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn invalidate_client(&self, client_id: Uuid) -> Result<()> {
        let cache_key = crate::buckets::subscription_cache_key(client_id);
        let pattern = crate::buckets::client_counter_pattern(client_id);

        let mut conn = self.conn();
        let matching: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;

        let mut keys_to_delete = matching;
        keys_to_delete.push(cache_key);

        if !keys_to_delete.is_empty() {
            let _: () = conn
                .del(keys_to_delete)
                .await
                .map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

fn parse_eval_outcome(raw: redis::Value) -> Result<EvalOutcome> {
    let redis::Value::Bulk(items) = raw else {
        return Err(AppError::CounterStoreUnavailable(
            "unexpected script reply shape".to_string(),
        ));
    };

    let flag: i64 = redis::from_redis_value(&items[0]).map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;

    if flag == 0 {
        let failed_index: i64 =
            redis::from_redis_value(&items[1]).map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;
        let current_count: i64 =
            redis::from_redis_value(&items[2]).map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;
        let ceiling: i64 =
            redis::from_redis_value(&items[3]).map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;
        let residual_ttl: i64 =
            redis::from_redis_value(&items[4]).map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;

        Ok(EvalOutcome::Denied {
            failed_index: failed_index as usize,
            current_count: current_count.max(0) as u64,
            ceiling: ceiling.max(0) as u32,
            residual_ttl_seconds: residual_ttl.max(0) as u64,
        })
    } else {
        let max_ttl: i64 =
            redis::from_redis_value(&items[1]).map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;
        let counts: Vec<i64> =
            redis::from_redis_value(&items[2]).map_err(|e| AppError::CounterStoreUnavailable(e.to_string()))?;

        Ok(EvalOutcome::Admitted {
            counts: counts.into_iter().map(|c| c.max(0) as u64).collect(),
            max_ttl_seconds: max_ttl.max(0) as u64,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fake::InMemoryCounterStore;
    use super::*;

    #[tokio::test]
    async fn admits_and_increments_every_key_once() {
        let store = InMemoryCounterStore::new();
        let keys = vec!["rl:g:w:0".to_string(), "rl:c:x:m:202401".to_string()];
        let limits = vec![10, 100];
        let ttls = vec![60, 2_592_000];

        let outcome = store.eval_multi_limit(&keys, &limits, &ttls).await.unwrap();
        match outcome {
            EvalOutcome::Admitted { counts, max_ttl_seconds } => {
                assert_eq!(counts, vec![1, 1]);
                assert_eq!(max_ttl_seconds, 2_592_000);
            }
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn denies_on_first_exceeded_ceiling_without_touching_any_key() {
        let store = InMemoryCounterStore::new();
        let keys = vec!["rl:g:w:0".to_string(), "rl:c:x:m:202401".to_string()];
        let limits = vec![1, 100];
        let ttls = vec![60, 2_592_000];

        // First request consumes the global ceiling.
        store.eval_multi_limit(&keys, &limits, &ttls).await.unwrap();

        // Second request must be denied on index 0, and the monthly
        // counter (index 1) must remain untouched.
        let outcome = store.eval_multi_limit(&keys, &limits, &ttls).await.unwrap();
        match outcome {
            EvalOutcome::Denied {
                failed_index,
                current_count,
                ceiling,
                ..
            } => {
                assert_eq!(failed_index, 0);
                assert_eq!(current_count, 1);
                assert_eq!(ceiling, 1);
            }
            other => panic!("expected denial, got {:?}", other),
        }

        // The monthly key was never reached, so a second evaluation with a
        // permissive global limit shows the monthly counter is still at 0.
        let outcome2 = store
            .eval_multi_limit(&keys, &[1000, 100], &ttls)
            .await
            .unwrap();
        match outcome2 {
            EvalOutcome::Admitted { counts, .. } => assert_eq!(counts[1], 1),
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn subscription_cache_round_trips_and_expires_sentinel() {
        use crate::types::SubscriptionPlan;
        use chrono::Utc;
        use uuid::Uuid;

        let store = InMemoryCounterStore::new();
        let client_id = Uuid::new_v4();

        assert!(matches!(
            store.get_subscription_cache(client_id).await.unwrap(),
            SubCacheValue::Miss
        ));

        store.set_subscription_expired(client_id, 300).await.unwrap();
        assert!(matches!(
            store.get_subscription_cache(client_id).await.unwrap(),
            SubCacheValue::Expired
        ));

        let plan = SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "pro".into(),
            monthly_limit: 100,
            window_limit: None,
            window_seconds: None,
            active: true,
            expires_at: None,
            created_at: Utc::now(),
        };
        store.set_subscription_cache(client_id, &plan, 3600).await.unwrap();
        match store.get_subscription_cache(client_id).await.unwrap() {
            SubCacheValue::Plan(cached) => assert_eq!(cached.id, plan.id),
            other => panic!("expected cached plan, got {:?}", std::mem::discriminant(&other)),
        }
    }

    #[tokio::test]
    async fn invalidate_client_clears_cache_and_counters() {
        let store = InMemoryCounterStore::new();
        let client_id = uuid::Uuid::new_v4();
        let key = format!("rl:c:{}:m:202401", client_id);

        store.eval_multi_limit(&[key.clone()], &[100], &[60]).await.unwrap();
        store.set_subscription_expired(client_id, 300).await.unwrap();

        store.invalidate_client(client_id).await.unwrap();

        assert!(matches!(
            store.get_subscription_cache(client_id).await.unwrap(),
            SubCacheValue::Miss
        ));
        let outcome = store.eval_multi_limit(&[key], &[100], &[60]).await.unwrap();
        match outcome {
            EvalOutcome::Admitted { counts, .. } => assert_eq!(counts[0], 1),
            other => panic!("expected fresh counter after invalidation, got {:?}", other),
        }
    }
}
