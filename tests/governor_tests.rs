// Integration coverage for the Rate Governor (spec §4.D) across the
// combinations dispatcher.rs actually drives it through: independent
// per-account cooldowns, and a penalty cooldown overriding the floor.

use sentinel_orchestrator::clock::FakeClock;
use sentinel_orchestrator::governor;
use sentinel_orchestrator::state::CooldownLedger;
use uuid::Uuid;

#[tokio::test]
async fn cooldowns_are_independent_per_account() {
    let ledger = CooldownLedger::new();
    let clock = FakeClock::new(1_000);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    governor::record_action(&ledger, &clock, a, 90.0).await;

    // `a` is now on cooldown, `b` was never touched and stays eligible.
    governor::wait_for_cooldown(&ledger, &clock, a, 90.0).await;
    assert!(!clock.recorded_sleeps().is_empty(), "cooling-down account should sleep");

    let sleeps_before = clock.recorded_sleeps().len();
    governor::wait_for_cooldown(&ledger, &clock, b, 90.0).await;
    assert_eq!(clock.recorded_sleeps().len(), sleeps_before, "untouched account should not sleep");
}

#[tokio::test]
async fn penalty_cooldown_applies_on_top_of_floor() {
    let ledger = CooldownLedger::new();
    let clock = FakeClock::new(1_000);
    let account = Uuid::new_v4();

    governor::record_action(&ledger, &clock, account, 90.0).await;
    assert!(ledger.is_eligible(account, 1_090).await);

    // A rate-limit penalty (§4.F step 5) extends eligibility further out,
    // regardless of the shorter floor cooldown already recorded.
    governor::apply_penalty(&ledger, &clock, account, 180.0).await;
    assert!(!ledger.is_eligible(account, 1_090).await);
    assert!(ledger.is_eligible(account, 1_180).await);
}

#[test]
fn rate_limit_penalty_is_always_at_least_the_base_value() {
    for _ in 0..200 {
        let penalty = governor::rate_limit_penalty();
        assert!(penalty >= governor::RATE_LIMIT_PENALTY_SECS);
        assert!(penalty <= governor::RATE_LIMIT_PENALTY_SECS + 15.0);
    }
}
