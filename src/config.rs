// Jaskier Shared Pattern — config
// System config key/value cache, modelled on model_registry.rs's ModelCache:
// TTL-bounded, invalidated synchronously on write (spec §9 Design Notes).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use sqlx::PgPool;

const CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DelayBounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub min_delay: f64,
    pub max_delay: f64,
    pub account_cooldown: f64,
    pub log_retention_days: i64,
    pub auto_clean_logs: bool,
    pub autoreply_poll_interval_seconds: i64,
    pub autoreply_poll_min_interval_seconds: i64,
    pub autoreply_account_batch_size: i64,
    pub autoreply_session_batch_size: i64,
    pub batch_semaphore_capacity: usize,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            min_delay: 2.0,
            max_delay: 8.0,
            account_cooldown: 90.0,
            log_retention_days: 30,
            auto_clean_logs: true,
            autoreply_poll_interval_seconds: 60,
            autoreply_poll_min_interval_seconds: 10,
            autoreply_account_batch_size: 0,
            autoreply_session_batch_size: 0,
            batch_semaphore_capacity: 5,
        }
    }
}

impl ResolvedConfig {
    pub fn delay_bounds(&self) -> DelayBounds {
        DelayBounds { min: self.min_delay, max: self.max_delay }
    }
}

pub struct SystemConfigCache {
    values: HashMap<String, Value>,
    fetched_at: Option<Instant>,
}

impl Default for SystemConfigCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigCache {
    pub fn new() -> Self {
        Self { values: HashMap::new(), fetched_at: None }
    }

    pub fn is_stale(&self) -> bool {
        match self.fetched_at {
            Some(t) => t.elapsed() > CACHE_TTL,
            None => true,
        }
    }

    /// Invalidate immediately — called synchronously on any config write.
    pub fn invalidate(&mut self) {
        self.fetched_at = None;
    }
}

async fn load_all(db: &PgPool) -> HashMap<String, Value> {
    let rows: Vec<(String, Value)> =
        sqlx::query_as("SELECT key, value FROM system_config")
            .fetch_all(db)
            .await
            .unwrap_or_default();
    rows.into_iter().collect()
}

/// Refresh the cache from the DB, returning the resolved typed view.
pub async fn refresh(db: &PgPool, cache: &mut SystemConfigCache) -> ResolvedConfig {
    cache.values = load_all(db).await;
    cache.fetched_at = Some(Instant::now());
    resolve(cache)
}

fn get_f64(values: &HashMap<String, Value>, key: &str, default: f64) -> f64 {
    values.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

fn get_i64(values: &HashMap<String, Value>, key: &str, default: i64) -> i64 {
    values.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

fn get_bool(values: &HashMap<String, Value>, key: &str, default: bool) -> bool {
    values.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn resolve(cache: &SystemConfigCache) -> ResolvedConfig {
    let d = ResolvedConfig::default();
    ResolvedConfig {
        min_delay: get_f64(&cache.values, "min_delay", d.min_delay),
        max_delay: get_f64(&cache.values, "max_delay", d.max_delay),
        account_cooldown: get_f64(&cache.values, "account_cooldown", d.account_cooldown),
        log_retention_days: get_i64(&cache.values, "log_retention_days", d.log_retention_days),
        auto_clean_logs: get_bool(&cache.values, "auto_clean_logs", d.auto_clean_logs),
        autoreply_poll_interval_seconds: get_i64(
            &cache.values,
            "autoreply_poll_interval_seconds",
            d.autoreply_poll_interval_seconds,
        ),
        autoreply_poll_min_interval_seconds: get_i64(
            &cache.values,
            "autoreply_poll_min_interval_seconds",
            d.autoreply_poll_min_interval_seconds,
        ),
        autoreply_account_batch_size: get_i64(
            &cache.values,
            "autoreply_account_batch_size",
            d.autoreply_account_batch_size,
        ),
        autoreply_session_batch_size: get_i64(
            &cache.values,
            "autoreply_session_batch_size",
            d.autoreply_session_batch_size,
        ),
        batch_semaphore_capacity: d.batch_semaphore_capacity,
    }
}

/// Validate a single config key/value pair against spec §6's constraint table.
/// Centralized, validate-then-write (spec §9).
pub fn validate_config_value(key: &str, value: &Value) -> Result<(), String> {
    match key {
        "min_delay" => {
            let v = value.as_f64().ok_or("min_delay must be a number")?;
            if !(1.0..=10.0).contains(&v) {
                return Err("min_delay must be in [1, 10]".to_string());
            }
        }
        "max_delay" => {
            let v = value.as_f64().ok_or("max_delay must be a number")?;
            if !(10.0..=60.0).contains(&v) {
                return Err("max_delay must be in [10, 60]".to_string());
            }
        }
        "account_cooldown" => {
            let v = value.as_f64().ok_or("account_cooldown must be a number")?;
            if !v.is_finite() || v < 1.0 {
                return Err("account_cooldown must be finite and >= 1".to_string());
            }
        }
        "log_retention_days" => {
            let v = value.as_i64().ok_or("log_retention_days must be an integer")?;
            if v < 1 {
                return Err("log_retention_days must be >= 1".to_string());
            }
        }
        "auto_clean_logs" => {
            value.as_bool().ok_or("auto_clean_logs must be a boolean")?;
        }
        "autoreply_poll_min_interval_seconds" => {
            let v = value.as_i64().ok_or("autoreply_poll_min_interval_seconds must be an integer")?;
            if v < 1 {
                return Err("autoreply_poll_min_interval_seconds must be >= 1".to_string());
            }
        }
        "autoreply_poll_interval_seconds" => {
            let v = value.as_i64().ok_or("autoreply_poll_interval_seconds must be an integer")?;
            if v < 1 {
                return Err("autoreply_poll_interval_seconds must be >= 1".to_string());
            }
        }
        "autoreply_account_batch_size" | "autoreply_session_batch_size" => {
            let v = value.as_i64().ok_or("batch size must be an integer")?;
            if v < 0 {
                return Err("batch size must be >= 0".to_string());
            }
        }
        _ => {}
    }
    Ok(())
}

pub async fn set_config_value(db: &PgPool, key: &str, value: &Value) -> Result<(), String> {
    validate_config_value(key, value)?;

    // Cross-field check: max_delay >= min_delay and poll interval >= its floor,
    // validated against whatever is currently persisted for the other key.
    if key == "max_delay" || key == "min_delay" {
        let other_key = if key == "max_delay" { "min_delay" } else { "max_delay" };
        let other: Option<Value> = sqlx::query_scalar("SELECT value FROM system_config WHERE key = $1")
            .bind(other_key)
            .fetch_optional(db)
            .await
            .map_err(|e| e.to_string())?;
        if let Some(other_val) = other.and_then(|v| v.as_f64()) {
            let (min_v, max_v) = if key == "max_delay" {
                (other_val, value.as_f64().unwrap_or(0.0))
            } else {
                (value.as_f64().unwrap_or(0.0), other_val)
            };
            if min_v > max_v {
                return Err("min_delay must be <= max_delay".to_string());
            }
        }
    }

    sqlx::query(
        "INSERT INTO system_config (key, value, updated_at) VALUES ($1, $2, NOW()) \
         ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()",
    )
    .bind(key)
    .bind(value)
    .execute(db)
    .await
    .map_err(|e| e.to_string())?;

    Ok(())
}
