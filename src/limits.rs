//! Effective-limit assembly (spec §4.3): merges plan-derived per-client
//! limits with active global rules into an ordered list of ceilings.

use crate::types::{Client, EffectiveLimit, RateLimitRule, SubscriptionPlan};

/// Build the ordered effective-limit list for one admission decision.
///
/// Ordering is a testable contract: GLOBAL < MONTHLY < WINDOW, so a global
/// overflow is reported as GLOBAL even if the client's per-window ceiling
/// would also have overflowed (spec §4.3).
pub fn assemble(client: &Client, plan: &SubscriptionPlan, global_rules: &[RateLimitRule]) -> Vec<EffectiveLimit> {
    let mut limits = Vec::new();

    if plan.monthly_limit > 0 {
        limits.push(EffectiveLimit::monthly(plan.monthly_limit, client.id));
    }

    if let (Some(window_limit), Some(window_seconds)) = (plan.window_limit, plan.window_seconds) {
        if window_limit > 0 && window_seconds > 0 {
            limits.push(EffectiveLimit::window(window_limit, window_seconds, client.id));
        }
    }

    for rule in global_rules.iter().filter(|r| r.active) {
        limits.push(EffectiveLimit::global(rule.limit_value, rule.global_window_seconds));
    }

    limits.sort_by_key(EffectiveLimit::priority);
    limits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn client() -> Client {
        Client {
            id: Uuid::new_v4(),
            name: "acme".into(),
            api_key: "rk_deadbeef".into(),
            plan_id: Uuid::new_v4(),
            active: true,
            created_at: Utc::now(),
        }
    }

    fn plan(monthly: u32, window: Option<(u32, u32)>) -> SubscriptionPlan {
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "pro".into(),
            monthly_limit: monthly,
            window_limit: window.map(|(l, _)| l),
            window_seconds: window.map(|(_, s)| s),
            active: true,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    fn global_rule(limit: u32, window_seconds: Option<u32>, active: bool) -> RateLimitRule {
        RateLimitRule {
            id: Uuid::new_v4(),
            limit_value: limit,
            global_window_seconds: window_seconds,
            active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn orders_global_before_monthly_before_window() {
        let client = client();
        let plan = plan(100, Some((5, 60)));
        let rules = vec![global_rule(1000, Some(60), true)];

        let limits = assemble(&client, &plan, &rules);

        assert_eq!(limits.len(), 3);
        assert_eq!(limits[0].priority(), 0); // GLOBAL
        assert_eq!(limits[1].priority(), 1); // MONTHLY
        assert_eq!(limits[2].priority(), 2); // WINDOW
    }

    #[test]
    fn skips_window_limit_when_plan_has_none() {
        let client = client();
        let plan = plan(100, None);

        let limits = assemble(&client, &plan, &[]);

        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].limit, 100);
    }

    #[test]
    fn ignores_inactive_global_rules() {
        let client = client();
        let plan = plan(100, None);
        let rules = vec![global_rule(50, None, false)];

        let limits = assemble(&client, &plan, &rules);

        assert_eq!(limits.len(), 1); // only MONTHLY, the inactive rule is dropped
    }

    #[test]
    fn zero_monthly_limit_is_still_emitted_and_left_for_evaluator_to_skip() {
        // §4.3 only adds MONTHLY when monthly_limit > 0; a configured 0
        // simply means "no monthly ceiling from this plan" — the evaluator's
        // own "ceiling == 0 disables the limit" rule (§4.4) covers limits
        // that make it into the list with a zero value from elsewhere.
        let client = client();
        let plan = plan(0, None);

        let limits = assemble(&client, &plan, &[]);

        assert!(limits.is_empty());
    }

    #[test]
    fn multiple_global_rules_all_included() {
        let client = client();
        let plan = plan(0, None);
        let rules = vec![
            global_rule(100, Some(60), true),
            global_rule(5000, None, true),
        ];

        let limits = assemble(&client, &plan, &rules);

        assert_eq!(limits.len(), 2);
        assert!(limits.iter().all(|l| l.priority() == 0));
    }
}
