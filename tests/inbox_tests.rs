// Integration coverage for the Inbox Poller (spec §4.G), focused on the
// mutual-exclusion contract between the scheduled trigger and a standalone
// loop (§4.G, §5) that unit tests colocated in inbox.rs don't exercise.

use sentinel_orchestrator::inbox;
use sentinel_orchestrator::state::AppState;

#[tokio::test]
async fn scheduled_poll_refuses_while_guard_is_held() {
    let state = AppState::new_test();

    // Simulate a standalone loop already holding the guard.
    assert!(state.inbox_poller_guard.try_acquire());

    // The scheduled-trigger path must refuse rather than run a concurrent
    // sweep — it returns Ok(0) without ever touching the (unreachable) DB.
    let sent = inbox::run_cycle_exclusive(&state).await.expect("refusal is not an error");
    assert_eq!(sent, 0);

    state.inbox_poller_guard.release();
}

#[tokio::test]
async fn scheduled_poll_runs_when_guard_is_free() {
    let state = AppState::new_test();
    assert!(!state.inbox_poller_guard.is_running());

    // With nothing holding the guard, the cycle runs (and immediately fails
    // against the unreachable pool) — the point is that it is attempted.
    let result = inbox::run_cycle_exclusive(&state).await;
    assert!(result.is_err(), "an unreachable pool should surface as an error once the cycle actually runs");
}

#[test]
fn select_reply_keyword_match_beats_default_regardless_of_order() {
    use sentinel_orchestrator::inbox::select_reply;
    use sentinel_orchestrator::models::AutoReplyRuleRow;
    use uuid::Uuid;

    let rules = vec![
        AutoReplyRuleRow { id: Uuid::from_u128(1), keyword: None, response: "default".into(), priority: 100, is_active: true },
        AutoReplyRuleRow { id: Uuid::from_u128(2), keyword: Some("refund".into()), response: "see our refund policy".into(), priority: 0, is_active: true },
    ];
    // Default rule has the higher priority number, but a keyword match
    // always wins over the default regardless of relative priority (§4.G step 5).
    assert_eq!(select_reply(&rules, "I want a refund please"), "see our refund policy");
}
