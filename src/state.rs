// Jaskier Shared Pattern — state
// Sentinel Orchestrator - Application state

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::{SharedClock, SystemClock};
use crate::config::{ResolvedConfig, SystemConfigCache};
use crate::events::EventBus;
use crate::fingerprint::Fingerprint;
use crate::scheduler::Scheduler;
use crate::signing::{SharedWbiCache, WbiCache};

/// Per-account cooldown ledger: the unix-seconds timestamp after which the
/// account may be dispatched again (spec §4.D, §9 — "explicit singleton
/// owned by the orchestrator, not a column read-modify-written per call").
pub struct CooldownLedger {
    next_eligible_secs: RwLock<HashMap<Uuid, i64>>,
}

/// Entries whose cooldown lapsed more than this long ago are opportunistically
/// evicted on the next write (spec §3, §4.D — "unused for more than an hour").
const STALE_AFTER_SECS: i64 = 3600;

impl Default for CooldownLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self { next_eligible_secs: RwLock::new(HashMap::new()) }
    }

    /// `true` if `account_id` may be dispatched at `now_secs`.
    pub async fn is_eligible(&self, account_id: Uuid, now_secs: i64) -> bool {
        let guard = self.next_eligible_secs.read().await;
        match guard.get(&account_id) {
            Some(&until) => now_secs >= until,
            None => true,
        }
    }

    pub async fn set_cooldown_until(&self, account_id: Uuid, until_secs: i64, now_secs: i64) {
        let mut guard = self.next_eligible_secs.write().await;
        guard.insert(account_id, until_secs);
        guard.retain(|_, until| now_secs - *until < STALE_AFTER_SECS);
    }

    pub async fn clear(&self, account_id: Uuid) {
        let mut guard = self.next_eligible_secs.write().await;
        guard.remove(&account_id);
    }
}

/// Guards the inbox poller so at most one sweep runs at a time across both
/// the scheduled trigger and any manual trigger (spec §4.G, §5).
#[derive(Default)]
pub struct InboxPollerGuard {
    running: AtomicBool,
}

impl InboxPollerGuard {
    /// Attempt to acquire the guard. Returns `true` if acquired (caller must
    /// call `release()` when done), `false` if a sweep is already running.
    pub fn try_acquire(&self) -> bool {
        self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Central application state. Clone-friendly — PgPool and Arc are both Clone.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub http_client: reqwest::Client,
    pub start_time: Instant,
    pub clock: SharedClock,
    pub fingerprint: Arc<Fingerprint>,
    pub cooldown: Arc<CooldownLedger>,
    pub wbi_cache: SharedWbiCache,
    pub inbox_poller_guard: Arc<InboxPollerGuard>,
    pub config_cache: Arc<RwLock<SystemConfigCache>>,
    pub events: Arc<EventBus>,
    /// `true` once startup recovery completes.
    pub ready: Arc<AtomicBool>,
    /// Optional bearer secret from AUTH_SECRET env. None = dev mode (no auth).
    pub auth_secret: Option<String>,
    /// Set once by `main` after construction, so scheduled-task CRUD handlers
    /// can register/unregister live jobs. `Scheduler` itself only holds a
    /// `Weak<AppState>`, so this is not a reference cycle in the leak sense —
    /// dropping the `Arc<Scheduler>` here still lets `AppState` deallocate.
    pub scheduler: Arc<RwLock<Option<Arc<Scheduler>>>>,
}

impl AppState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("orchestrator marked as READY");
    }

    /// Resolve the current typed config, refreshing from the DB if the
    /// in-memory cache has gone stale (spec §9 — TTL cache, not per-call SQL).
    pub async fn resolved_config(&self) -> ResolvedConfig {
        let stale = { self.config_cache.read().await.is_stale() };
        if stale {
            let mut cache = self.config_cache.write().await;
            return crate::config::refresh(&self.db, &mut cache).await;
        }
        let cache = self.config_cache.read().await;
        crate::config::resolve(&cache)
    }

    pub async fn invalidate_config_cache(&self) {
        self.config_cache.write().await.invalidate();
    }
}

impl AppState {
    pub fn new(db: PgPool) -> Self {
        let auth_secret = std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());
        if auth_secret.is_some() {
            tracing::info!("AUTH_SECRET configured — authentication enabled");
        } else {
            tracing::info!("AUTH_SECRET not set — authentication disabled (dev mode)");
        }

        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");

        tracing::info!("AppState initialised");

        Self {
            db,
            http_client,
            start_time: Instant::now(),
            clock: Arc::new(SystemClock),
            fingerprint: Arc::new(Fingerprint::generate()),
            cooldown: Arc::new(CooldownLedger::new()),
            wbi_cache: Arc::new(WbiCache::new()),
            inbox_poller_guard: Arc::new(InboxPollerGuard::default()),
            config_cache: Arc::new(RwLock::new(SystemConfigCache::new())),
            events: Arc::new(EventBus::new()),
            ready: Arc::new(AtomicBool::new(false)),
            auth_secret,
            scheduler: Arc::new(RwLock::new(None)),
        }
    }

    /// Test-only constructor — uses `connect_lazy` so no real DB is needed.
    /// Only suitable for endpoints that don't issue SQL queries (or that
    /// gracefully handle DB errors, e.g. `.ok()?`).
    #[doc(hidden)]
    pub fn new_test() -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");

        let db = PgPool::connect_lazy("postgres://test@localhost:19999/test").expect("lazy pool");

        Self {
            db,
            http_client,
            start_time: Instant::now(),
            clock: Arc::new(SystemClock),
            fingerprint: Arc::new(Fingerprint::generate()),
            cooldown: Arc::new(CooldownLedger::new()),
            wbi_cache: Arc::new(WbiCache::new()),
            inbox_poller_guard: Arc::new(InboxPollerGuard::default()),
            config_cache: Arc::new(RwLock::new(SystemConfigCache::new())),
            events: Arc::new(EventBus::new()),
            ready: Arc::new(AtomicBool::new(false)),
            auth_secret: None,
            scheduler: Arc::new(RwLock::new(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cooldown_ledger_default_eligible() {
        let ledger = CooldownLedger::new();
        assert!(ledger.is_eligible(Uuid::new_v4(), 1_000).await);
    }

    #[tokio::test]
    async fn cooldown_ledger_blocks_until_elapsed() {
        let ledger = CooldownLedger::new();
        let account = Uuid::new_v4();
        ledger.set_cooldown_until(account, 1_100, 1_000).await;
        assert!(!ledger.is_eligible(account, 1_050).await);
        assert!(ledger.is_eligible(account, 1_100).await);
    }

    #[tokio::test]
    async fn cooldown_ledger_clear_resets_eligibility() {
        let ledger = CooldownLedger::new();
        let account = Uuid::new_v4();
        ledger.set_cooldown_until(account, 9_999_999, 0).await;
        ledger.clear(account).await;
        assert!(ledger.is_eligible(account, 0).await);
    }

    #[tokio::test]
    async fn cooldown_ledger_evicts_entries_stale_for_over_an_hour() {
        let ledger = CooldownLedger::new();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        ledger.set_cooldown_until(stale, 1_000, 1_000).await;

        // Writing a second entry much later opportunistically sweeps `stale`
        // (its eligibility lapsed more than an hour before `now`).
        ledger.set_cooldown_until(fresh, 10_000, 10_000).await;
        assert_eq!(ledger.next_eligible_secs.read().await.len(), 1);
        assert!(ledger.next_eligible_secs.read().await.contains_key(&fresh));
    }

    #[test]
    fn inbox_poller_guard_is_exclusive() {
        let guard = InboxPollerGuard::default();
        assert!(guard.try_acquire());
        assert!(!guard.try_acquire());
        guard.release();
        assert!(guard.try_acquire());
    }
}
