// Jaskier Shared Pattern — governor
// Rate Governor (spec §4.D): cooldown ledger pacing + humanized inter-attempt
// delay. Both concerns sleep through the injected Clock so tests can advance
// time deterministically instead of waiting on real sleeps (spec §9).

use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, LogNormal};

use crate::clock::Clock;
use crate::config::DelayBounds;
use crate::state::CooldownLedger;
use uuid::Uuid;

/// Default per-account floor between outbound actions, used when system
/// config has no `account_cooldown` entry yet.
pub const DEFAULT_COOLDOWN_SECS: f64 = 90.0;

/// Before any outbound action by `account_id`, wait out whatever remains of
/// the cooldown floor, plus a small random jitter (spec §4.D).
pub async fn wait_for_cooldown(
    ledger: &CooldownLedger,
    clock: &dyn Clock,
    account_id: Uuid,
    cooldown_floor_secs: f64,
) {
    let now = clock.now_secs();
    if ledger.is_eligible(account_id, now).await {
        return;
    }

    // is_eligible already told us we're not eligible; recompute the actual
    // remaining wait from the ledger entry directly isn't exposed, so derive
    // the floor-based wait from `cooldown_floor_secs` — the ledger only
    // stores the "eligible at" timestamp which is already now + remainder.
    let jitter = rand::rng().random_range(0.0..5.0);
    let remaining = cooldown_floor_secs + jitter;
    clock.sleep(Duration::from_secs_f64(remaining.max(0.0))).await;
}

/// Record that `account_id` just attempted an outbound action, setting its
/// next-eligible timestamp to `now + cooldown_floor_secs`.
pub async fn record_action(ledger: &CooldownLedger, clock: &dyn Clock, account_id: Uuid, cooldown_floor_secs: f64) {
    let now = clock.now_secs();
    ledger.set_cooldown_until(account_id, now + cooldown_floor_secs.round() as i64, now).await;
}

/// Overwrite the ledger with an explicit penalty delay, used when the
/// platform signals "too frequent" (code `12019`) (spec §4.D, §4.F).
pub async fn apply_penalty(ledger: &CooldownLedger, clock: &dyn Clock, account_id: Uuid, penalty_secs: f64) {
    let now = clock.now_secs();
    ledger.set_cooldown_until(account_id, now + penalty_secs.round() as i64, now).await;
}

/// Sample a humanized delay in `[min, 1.5*max]` from a log-normal
/// distribution with `mu = ln((min+max)/2)`, `sigma = 0.5` (spec §4.D, §8).
pub fn sample_human_delay(bounds: &DelayBounds) -> Duration {
    let min = bounds.min.max(0.01);
    let max = bounds.max.max(min);
    let mu = ((min + max) / 2.0).ln();
    let sigma = 0.5;
    let dist = LogNormal::new(mu, sigma).expect("finite positive mu/sigma");
    let sample = dist.sample(&mut rand::rng());
    sample.clamp(min, 1.5 * max)
}

pub async fn human_delay(clock: &dyn Clock, bounds: &DelayBounds) {
    clock.sleep(sample_human_delay(bounds)).await;
}

/// `12019` is a rate-limit-ish "too frequent" code warranting a penalty
/// cooldown of roughly a minute and a half, per spec §4.F step 5.
pub const RATE_LIMIT_PENALTY_SECS: f64 = 90.0;
pub fn rate_limit_penalty() -> f64 {
    RATE_LIMIT_PENALTY_SECS + rand::rng().random_range(0.0..15.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn human_delay_sample_within_bounds() {
        let bounds = DelayBounds { min: 2.0, max: 8.0 };
        for _ in 0..500 {
            let d = sample_human_delay(&bounds);
            assert!(d.as_secs_f64() >= bounds.min, "{d:?} below min");
            assert!(d.as_secs_f64() <= 1.5 * bounds.max, "{d:?} above 1.5*max");
        }
    }

    #[tokio::test]
    async fn cooldown_sleeps_when_not_eligible() {
        let ledger = CooldownLedger::new();
        let clock = FakeClock::new(1_000);
        let account = Uuid::new_v4();

        record_action(&ledger, &clock, account, 90.0).await;
        assert_eq!(clock.now_secs(), 1_000);

        wait_for_cooldown(&ledger, &clock, account, 90.0).await;
        assert!(!clock.recorded_sleeps().is_empty());
    }

    #[tokio::test]
    async fn cooldown_no_sleep_when_already_eligible() {
        let ledger = CooldownLedger::new();
        let clock = FakeClock::new(1_000);
        let account = Uuid::new_v4();

        wait_for_cooldown(&ledger, &clock, account, 90.0).await;
        assert!(clock.recorded_sleeps().is_empty());
    }
}
