// Jaskier Shared Pattern — signing
// WBI request signing (spec §4.B) and the process-global key cache.
//
// Mirrors oauth.rs's crypto style (sha2/base64 imports, single-flight
// refresh) but swaps SHA-256/AES for the platform's MD5-based WBI scheme.

use std::sync::Arc;
use std::time::{Duration, Instant};

use md5::{Digest, Md5};
use tokio::sync::{Mutex, RwLock};

const WBI_TTL: Duration = Duration::from_secs(3600);

/// Fixed 64-index permutation used to derive the 32-char mixin key from
/// `img_key ‖ sub_key` (spec §4.B).
const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22,
    25, 54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Characters stripped from every value before encoding (spec §4.B).
const STRIP_CHARS: &[char] = &['!', '\'', '(', ')', '*'];

#[derive(Debug, Clone, Default)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
    pub fetched_at: Option<Instant>,
}

impl WbiKeys {
    pub fn is_stale(&self) -> bool {
        match self.fetched_at {
            Some(t) => t.elapsed() > WBI_TTL,
            None => true,
        }
        || self.img_key.is_empty()
        || self.sub_key.is_empty()
    }

    fn mixin_key(&self) -> String {
        let raw: String = format!("{}{}", self.img_key, self.sub_key);
        let raw_chars: Vec<char> = raw.chars().collect();
        let permuted: String = MIXIN_KEY_ENC_TAB
            .iter()
            .filter_map(|&i| raw_chars.get(i))
            .collect();
        permuted.chars().take(32).collect()
    }
}

/// Process-global WBI key cache guarded by a single-flight refresh lock
/// (spec §4.B, §5, §9 — "no global mutable state hidden in module vars").
pub struct WbiCache {
    keys: RwLock<WbiKeys>,
    refresh_lock: Mutex<()>,
}

impl Default for WbiCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WbiCache {
    pub fn new() -> Self {
        Self { keys: RwLock::new(WbiKeys::default()), refresh_lock: Mutex::new(()) }
    }

    pub async fn current(&self) -> WbiKeys {
        self.keys.read().await.clone()
    }

    pub async fn is_stale(&self) -> bool {
        self.keys.read().await.is_stale()
    }

    /// Ensure fresh keys are loaded, fetching via `fetch` under a single-flight
    /// lock so concurrent callers don't stampede the `nav` endpoint.
    pub async fn ensure_fresh<F, Fut>(&self, fetch: F) -> anyhow::Result<WbiKeys>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<(String, String)>>,
    {
        if !self.is_stale().await {
            return Ok(self.current().await);
        }

        let _guard = self.refresh_lock.lock().await;
        // Re-check after acquiring the lock: another task may have refreshed.
        if !self.is_stale().await {
            return Ok(self.current().await);
        }

        let (img_key, sub_key) = fetch().await?;
        let mut w = self.keys.write().await;
        *w = WbiKeys { img_key, sub_key, fetched_at: Some(Instant::now()) };
        Ok(w.clone())
    }
}

pub type SharedWbiCache = Arc<WbiCache>;

/// Extract the WBI key basename (stripped of extension) from a `nav` URL,
/// e.g. `https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png`
/// → `7cd084941338484aae1ad9425b84077c` (spec §4.I).
pub fn extract_key_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|basename| basename.split('.').next())
        .unwrap_or_default()
        .to_string()
}

/// Sign a parameter map per spec §4.B: append `wts`, sort keys, strip
/// forbidden chars from values, URL-encode, concatenate with the mixin key,
/// MD5, attach as `w_rid`.
pub fn sign_params(params: &mut Vec<(String, String)>, keys: &WbiKeys, now_secs: i64) {
    params.push(("wts".to_string(), now_secs.to_string()));
    params.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, v) in params.iter_mut() {
        v.retain(|c| !STRIP_CHARS.contains(&c));
    }

    let query: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, url::form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>()))
        .collect::<Vec<_>>()
        .join("&");

    let mixin = keys.mixin_key();
    let to_hash = format!("{query}{mixin}");
    let digest = Md5::digest(to_hash.as_bytes());
    let w_rid = hex::encode(digest);

    params.push(("w_rid".to_string(), w_rid));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keys() -> WbiKeys {
        WbiKeys {
            img_key: "7cd084941338484aae1ad9425b84077c".to_string(),
            sub_key: "4932caff0ff746eab6f01bf08b70ac45".to_string(),
            fetched_at: Some(Instant::now()),
        }
    }

    #[test]
    fn extract_key_strips_extension_and_path() {
        assert_eq!(
            extract_key_from_url("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
            "7cd084941338484aae1ad9425b84077c"
        );
    }

    #[test]
    fn fresh_keys_are_not_stale() {
        let keys = sample_keys();
        assert!(!keys.is_stale());
    }

    #[test]
    fn empty_keys_are_stale() {
        assert!(WbiKeys::default().is_stale());
    }

    #[test]
    fn signature_stable_under_param_reordering() {
        let keys = sample_keys();
        let mut a = vec![("foo".to_string(), "bar".to_string()), ("baz".to_string(), "qux".to_string())];
        let mut b = vec![("baz".to_string(), "qux".to_string()), ("foo".to_string(), "bar".to_string())];
        sign_params(&mut a, &keys, 1_700_000_000);
        sign_params(&mut b, &keys, 1_700_000_000);
        let rid_a = a.iter().find(|(k, _)| k == "w_rid").unwrap().1.clone();
        let rid_b = b.iter().find(|(k, _)| k == "w_rid").unwrap().1.clone();
        assert_eq!(rid_a, rid_b);
    }

    #[test]
    fn signature_unstable_under_value_change() {
        let keys = sample_keys();
        let mut a = vec![("foo".to_string(), "bar".to_string())];
        let mut b = vec![("foo".to_string(), "baz".to_string())];
        sign_params(&mut a, &keys, 1_700_000_000);
        sign_params(&mut b, &keys, 1_700_000_000);
        let rid_a = a.iter().find(|(k, _)| k == "w_rid").unwrap().1.clone();
        let rid_b = b.iter().find(|(k, _)| k == "w_rid").unwrap().1.clone();
        assert_ne!(rid_a, rid_b);
    }

    #[test]
    fn strips_forbidden_characters_from_values() {
        let keys = sample_keys();
        let mut a = vec![("foo".to_string(), "b!a'r(q)u*x".to_string())];
        let mut b = vec![("foo".to_string(), "barqux".to_string())];
        sign_params(&mut a, &keys, 1_700_000_000);
        sign_params(&mut b, &keys, 1_700_000_000);
        let rid_a = a.iter().find(|(k, _)| k == "w_rid").unwrap().1.clone();
        let rid_b = b.iter().find(|(k, _)| k == "w_rid").unwrap().1.clone();
        assert_eq!(rid_a, rid_b);
    }

    #[tokio::test]
    async fn wbi_cache_ensure_fresh_single_flight() {
        let cache = WbiCache::new();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls2 = calls.clone();
        let keys = cache
            .ensure_fresh(|| async move {
                calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(("img".to_string(), "sub".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(keys.img_key, "img");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Second call sees fresh keys and does not refetch.
        let calls3 = calls.clone();
        let _ = cache
            .ensure_fresh(|| async move {
                calls3.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(("img2".to_string(), "sub2".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
