//! Throttle classifier (spec §4.5): maps a denial to HARD or SOFT based on
//! which ceiling was hit and the global usage ratio, plus the WARN/FULL
//! observability hooks that never affect the admission outcome.

use crate::config::ThrottlingConfig;
use crate::types::{LimitKind, ThrottleType};
use tracing::{info, warn};

/// Classify a failed [`EffectiveLimit`] into a throttle label and soft delay.
///
/// `ratio` is `count / ceiling` and is only meaningful when `kind` is GLOBAL;
/// callers pass `None` otherwise.
pub fn classify(kind: LimitKind, ratio: Option<f64>, config: &ThrottlingConfig) -> (ThrottleType, u64) {
    match kind {
        LimitKind::Window | LimitKind::Monthly => (ThrottleType::Hard, 0),
        LimitKind::Global => {
            let ratio = ratio.unwrap_or(1.0);
            if ratio >= config.global_hard_threshold {
                (ThrottleType::Hard, 0)
            } else if ratio >= config.global_soft_threshold && config.soft_enabled() {
                (ThrottleType::Soft, config.soft_delay_ms)
            } else {
                // A failure means count >= ceiling, i.e. ratio >= 1.0, which
                // is always >= global_soft_threshold (<= 1.0 by construction)
                // — this arm only fires when soft throttling is disabled.
                (ThrottleType::Hard, 0)
            }
        }
    }
}

/// Emit the WARN/FULL observability events for an *admitted* request whose
/// post-increment global counter crossed a threshold. Must never influence
/// the admission outcome (spec §4.5, §9 Open Questions).
pub fn observe_global_usage(client_id: &str, count: u64, ceiling: u32, config: &ThrottlingConfig) {
    if ceiling == 0 {
        return;
    }
    let ratio = count as f64 / ceiling as f64;

    if ratio >= config.global_warn_threshold {
        warn!(
            client_id,
            count,
            ceiling,
            ratio_pct = ratio * 100.0,
            "global counter crossed warn threshold"
        );
    }
    if ratio >= config.global_full_threshold {
        info!(
            client_id,
            count,
            ceiling,
            ratio_pct = ratio * 100.0,
            "global counter reached full capacity"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottlingConfig {
        ThrottlingConfig::default()
    }

    #[test]
    fn window_and_monthly_are_always_hard() {
        let cfg = config();
        assert_eq!(classify(LimitKind::Window, None, &cfg), (ThrottleType::Hard, 0));
        assert_eq!(classify(LimitKind::Monthly, None, &cfg), (ThrottleType::Hard, 0));
    }

    #[test]
    fn global_below_soft_threshold_would_not_occur_but_defaults_hard() {
        // A denial always implies ratio >= 1.0, which is above soft (0.80)
        // by construction; this just exercises the defensive branch.
        let cfg = config();
        let (throttle, _) = classify(LimitKind::Global, Some(0.5), &cfg);
        assert_eq!(throttle, ThrottleType::Hard);
    }

    #[test]
    fn global_soft_between_soft_and_hard_threshold() {
        let mut cfg = config();
        cfg.throttling_soft_enabled = true;
        let (throttle, delay) = classify(LimitKind::Global, Some(1.0), &cfg);
        assert_eq!(throttle, ThrottleType::Soft);
        assert_eq!(delay, cfg.soft_delay_ms);
    }

    #[test]
    fn global_hard_at_or_above_hard_threshold() {
        let mut cfg = config();
        cfg.throttling_soft_enabled = true;
        let (throttle, delay) = classify(LimitKind::Global, Some(1.2), &cfg);
        assert_eq!(throttle, ThrottleType::Hard);
        assert_eq!(delay, 0);
    }

    #[test]
    fn global_soft_disabled_falls_back_to_hard() {
        let mut cfg = config();
        cfg.throttling_soft_enabled = false;
        let (throttle, delay) = classify(LimitKind::Global, Some(0.9), &cfg);
        assert_eq!(throttle, ThrottleType::Hard);
        assert_eq!(delay, 0);
    }

    #[test]
    fn monotonic_transitions_soft_to_hard_never_backward() {
        // Within one bucket, as the observed ratio grows, the classifier
        // must only ever move SOFT -> HARD, never back to SOFT.
        let mut cfg = config();
        cfg.throttling_soft_enabled = true;
        let ratios = [0.85, 1.0, 1.1, 1.25, 1.4];
        let mut seen_hard = false;
        let mut seen_soft = false;
        for ratio in ratios {
            let (throttle, _) = classify(LimitKind::Global, Some(ratio), &cfg);
            match throttle {
                ThrottleType::None => unreachable!("global denial classification never yields NONE"),
                ThrottleType::Soft => {
                    assert!(!seen_hard, "soft must not follow hard");
                    seen_soft = true;
                }
                ThrottleType::Hard => seen_hard = true,
            }
        }
        assert!(seen_soft && seen_hard);
    }
}
