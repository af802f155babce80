// Jaskier Shared Pattern — fingerprint
// Per-process browser fingerprint (User-Agent, Accept-Language, viewport)
// held constant for the orchestrator's lifetime (spec §4.B).

use rand::Rng;
use rand::seq::IndexedRandom;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const ACCEPT_LANGUAGES: &[&str] = &["zh-CN,zh;q=0.9,en;q=0.8", "zh-CN,zh;q=0.9", "en-US,en;q=0.9,zh-CN;q=0.8"];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];

/// A fingerprint fixed for the lifetime of this process, shared by every
/// account's `reqwest::Client` so traffic from one process looks consistent
/// (spec §4.B — "a stable per-process fingerprint, not per-request").
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    pub accept_language: String,
    pub viewport: (u32, u32),
}

impl Fingerprint {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        Self {
            user_agent: USER_AGENTS.choose(&mut rng).expect("non-empty").to_string(),
            accept_language: ACCEPT_LANGUAGES.choose(&mut rng).expect("non-empty").to_string(),
            viewport: *VIEWPORTS.choose(&mut rng).expect("non-empty"),
        }
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_fingerprint_draws_from_known_pools() {
        let fp = Fingerprint::generate();
        assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
        assert!(ACCEPT_LANGUAGES.contains(&fp.accept_language.as_str()));
        assert!(VIEWPORTS.contains(&fp.viewport));
    }
}
