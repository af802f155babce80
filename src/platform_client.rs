// Jaskier Shared Pattern — platform_client
// Platform Client (spec §4.C): one instance binds to one account's cookies
// and fingerprint. Normalizes every platform response into `{code, message,
// data}` and never raises for platform-level errors — only host-level
// (network) errors propagate as `reqwest::Error`.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use crate::clock::Clock;
use crate::fingerprint::Fingerprint;
use crate::signing::{self, SharedWbiCache};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_CAP: u32 = 3;

const RATE_LIMIT_CODES: &[i32] = &[-412, 862, 101];
const RISK_CONTROL_CODES: &[i32] = &[-352];
const AUTH_INVALID_CODES: &[i32] = &[-101];
const HUMAN_VERIFICATION_CODES: &[i32] = &[-799];
/// "Too frequent" — a dispatcher-level pacing signal (spec §4.F step 5), not
/// a client-retryable code. Handled via the dispatcher's cooldown penalty,
/// never by `with_retry`'s internal backoff.
const DISPATCHER_RATE_LIMIT_CODE: i32 = 12019;

const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";
const VIEW_URL: &str = "https://api.bilibili.com/x/web-interface/view";
const REPLY_REPORT_URL: &str = "https://api.bilibili.com/x/v2/reply/report";
const ARCHIVE_REPORT_URL: &str = "https://member.bilibili.com/x/web/archive/report";
const SPACE_REPORT_URL: &str = "https://space.bilibili.com/ajax/report/add";
const QRCODE_GENERATE_URL: &str = "https://passport.bilibili.com/x/passport-login/web/qrcode/generate";
const QRCODE_POLL_URL: &str = "https://passport.bilibili.com/x/passport-login/web/qrcode/poll";
const COOKIE_INFO_URL: &str = "https://passport.bilibili.com/x/passport-login/web/cookie/info";
const COOKIE_REFRESH_URL: &str = "https://passport.bilibili.com/x/passport-login/web/cookie/refresh";
const COOKIE_CONFIRM_URL: &str = "https://passport.bilibili.com/x/passport-login/web/confirm/refresh";
const CORRESPOND_URL: &str = "https://www.bilibili.com/correspond/1/";
const FINGER_SPI_URL: &str = "https://api.bilibili.com/x/frontend/finger/spi";
const IM_SEND_MSG_URL: &str = "https://api.vc.bilibili.com/web_im/v1/web_im/send_msg";
const IM_GET_SESSIONS_URL: &str = "https://api.vc.bilibili.com/session_svr/v1/session_svr/get_sessions";

/// Normalized response envelope every Platform Client operation returns.
/// Only host-level errors (timeouts, connection refusal) become `Err` —
/// platform-level failure codes are `Ok` values the caller classifies.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
    /// Set-Cookie values from the HTTP response, keyed by cookie name. The
    /// JSON body never carries SESSDATA/bili_jct/DedeUserID — bilibili hands
    /// those back as cookies, not fields (spec §4.I step 3).
    #[serde(skip)]
    pub cookies: HashMap<String, String>,
}

impl Envelope {
    fn max_retries_exceeded() -> Self {
        Self { code: -999, message: "max retries".to_string(), data: Value::Null, cookies: HashMap::new() }
    }
}

/// The subset of an account's credentials the client needs to authenticate.
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub sessdata: String,
    pub bili_jct: String,
    pub buvid3: Option<String>,
    pub buvid4: Option<String>,
    pub dedeuserid_ckmd5: Option<String>,
    pub uid: Option<i64>,
}

/// Classifies how the dispatcher/executor should react to a response code
/// or transport error (spec §4.C retry policy, §7 error taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Retry,
    RateLimitRetry,
    /// "Too frequent" (12019) — paced by the dispatcher's cooldown penalty,
    /// not retried inside the client (spec §4.F step 5).
    DispatcherRateLimit,
    RiskControlStop,
    AuthInvalidStop,
    TerminalSuccess,
    TerminalFailure,
}

pub fn classify(code: i32) -> Outcome {
    match code {
        0 | 12008 | 12022 => Outcome::TerminalSuccess,
        c if RISK_CONTROL_CODES.contains(&c) => Outcome::RiskControlStop,
        c if AUTH_INVALID_CODES.contains(&c) || HUMAN_VERIFICATION_CODES.contains(&c) => Outcome::AuthInvalidStop,
        c if c == DISPATCHER_RATE_LIMIT_CODE => Outcome::DispatcherRateLimit,
        c if RATE_LIMIT_CODES.contains(&c) => Outcome::RateLimitRetry,
        _ => Outcome::TerminalFailure,
    }
}

pub struct PlatformClient<'a> {
    http: &'a reqwest::Client,
    clock: &'a dyn Clock,
    fingerprint: &'a Fingerprint,
    wbi_cache: &'a SharedWbiCache,
    credentials: AccountCredentials,
    retry_cap: u32,
}

impl<'a> PlatformClient<'a> {
    pub fn new(
        http: &'a reqwest::Client,
        clock: &'a dyn Clock,
        fingerprint: &'a Fingerprint,
        wbi_cache: &'a SharedWbiCache,
        credentials: AccountCredentials,
    ) -> Self {
        Self { http, clock, fingerprint, wbi_cache, credentials, retry_cap: DEFAULT_RETRY_CAP }
    }

    /// Build the explicit `Cookie` header this account authenticates with.
    /// Used on every request since the cookie jar is host-bound and several
    /// endpoints (`space.bilibili.com`) sit on a different sub-host than the
    /// main session (spec §4.C, §9).
    fn cookie_header(&self) -> String {
        let mut parts = vec![
            format!("SESSDATA={}", url::form_urlencoded::byte_serialize(self.credentials.sessdata.as_bytes()).collect::<String>()),
            format!("bili_jct={}", self.credentials.bili_jct),
        ];
        if let Some(v) = &self.credentials.buvid3 {
            parts.push(format!("buvid3={v}"));
        }
        if let Some(v) = &self.credentials.buvid4 {
            parts.push(format!("buvid4={v}"));
        }
        if let Some(v) = &self.credentials.dedeuserid_ckmd5 {
            parts.push(format!("DedeUserID__ckMd5={v}"));
        }
        if let Some(uid) = self.credentials.uid {
            parts.push(format!("DedeUserID={uid}"));
        }
        parts.join("; ")
    }

    fn build_request(&self, method: reqwest::Method, url: &str, referer: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .timeout(REQUEST_TIMEOUT)
            .header("Cookie", self.cookie_header())
            .header("User-Agent", &self.fingerprint.user_agent)
            .header("Accept-Language", &self.fingerprint.accept_language)
            .header("DNT", if rand::rng().random_bool(0.5) { "1" } else { "0" });
        if let Some(r) = referer {
            req = req.header("Referer", r);
        }
        req
    }

    /// Retry loop shared by every operation. `attempt_fn` issues one HTTP
    /// attempt and returns the parsed envelope; retry/backoff decisions are
    /// driven by `classify()` plus transport-error handling (spec §4.C).
    async fn with_retry<F, Fut>(&self, attempt_fn: F) -> Envelope
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<Envelope>>,
    {
        for attempt in 0..self.retry_cap {
            match attempt_fn().await {
                Ok(envelope) => match classify(envelope.code) {
                    Outcome::RateLimitRetry if attempt + 1 < self.retry_cap => {
                        let backoff = 5.0 * 2f64.powi(attempt as i32) + rand::rng().random_range(0.0..2.0);
                        self.clock.sleep(Duration::from_secs_f64(backoff)).await;
                        continue;
                    }
                    _ => return envelope,
                },
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt + 1 >= self.retry_cap {
                        break;
                    }
                    self.clock.sleep(Duration::from_secs((attempt as u64 + 1) * 2)).await;
                }
                Err(e) => {
                    tracing::warn!("platform client non-retryable transport error: {e}");
                    break;
                }
            }
        }
        Envelope::max_retries_exceeded()
    }

    async fn ensure_wbi(&self) -> signing::WbiKeys {
        let http = self.http;
        self.wbi_cache
            .ensure_fresh(|| async move { fetch_wbi_keys(http).await })
            .await
            .unwrap_or_default()
    }

    async fn signed_params(&self, mut params: Vec<(String, String)>) -> Vec<(String, String)> {
        let keys = self.ensure_wbi().await;
        signing::sign_params(&mut params, &keys, self.clock.now_secs());
        params
    }

    pub async fn get_video_info(&self, bv: &str) -> Envelope {
        let params = vec![("bvid".to_string(), bv.to_string())];
        let signed = self.signed_params(params).await;
        self.with_retry(|| async {
            let resp = self
                .build_request(reqwest::Method::GET, VIEW_URL, None)
                .query(&signed)
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn get_comments(&self, oid: i64, page: i64, size: i64) -> Envelope {
        let params = vec![
            ("oid".to_string(), oid.to_string()),
            ("pn".to_string(), page.to_string()),
            ("ps".to_string(), size.to_string()),
            ("type".to_string(), "1".to_string()),
        ];
        let signed = self.signed_params(params).await;
        self.with_retry(|| async {
            let resp = self
                .build_request(reqwest::Method::GET, "https://api.bilibili.com/x/v2/reply", None)
                .query(&signed)
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn report_video(&self, aid: i64, reason: i32, text: &str, bv: &str) -> Envelope {
        let referer = format!("https://www.bilibili.com/video/{bv}");
        self.with_retry(|| async {
            let form = [
                ("aid", aid.to_string()),
                ("reason", reason.to_string()),
                ("desc", text.to_string()),
                ("csrf", self.credentials.bili_jct.clone()),
            ];
            let resp = self
                .build_request(reqwest::Method::POST, ARCHIVE_REPORT_URL, Some(&referer))
                .form(&form)
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn report_comment(&self, oid: i64, rpid: i64, reason: i32, text: &str, bv: &str) -> Envelope {
        let referer = format!("https://www.bilibili.com/video/{bv}");
        self.with_retry(|| async {
            let form = [
                ("oid", oid.to_string()),
                ("rpid", rpid.to_string()),
                ("reason", reason.to_string()),
                ("content", text.to_string()),
                ("csrf", self.credentials.bili_jct.clone()),
            ];
            let resp = self
                .build_request(reqwest::Method::POST, REPLY_REPORT_URL, Some(&referer))
                .form(&form)
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn report_user(&self, mid: i64, category: i32, content_kind: i32) -> Envelope {
        let referer = format!("https://space.bilibili.com/{mid}");
        self.with_retry(|| async {
            let form = [
                ("mid", mid.to_string()),
                ("reason_type", category.to_string()),
                ("report_type", content_kind.to_string()),
                ("csrf", self.credentials.bili_jct.clone()),
            ];
            let resp = self
                .build_request(reqwest::Method::POST, SPACE_REPORT_URL, Some(&referer))
                .form(&form)
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn send_private_message(&self, peer_mid: i64, text: &str) -> Envelope {
        self.with_retry(|| async {
            let sender = self.credentials.uid.unwrap_or(0);
            let content = serde_json::json!({ "content": text }).to_string();
            let form = [
                ("msg[sender_uid]", sender.to_string()),
                ("msg[receiver_id]", peer_mid.to_string()),
                ("msg[receiver_type]", "1".to_string()),
                ("msg[msg_type]", "1".to_string()),
                ("msg[content]", content),
                ("csrf", self.credentials.bili_jct.clone()),
            ];
            let resp = self
                .build_request(reqwest::Method::POST, IM_SEND_MSG_URL, None)
                .form(&form)
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn list_recent_sessions(&self) -> Envelope {
        self.with_retry(|| async {
            let resp = self
                .build_request(reqwest::Method::GET, IM_GET_SESSIONS_URL, None)
                .query(&[("session_type", "1")])
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn qrcode_generate(&self) -> Envelope {
        self.with_retry(|| async {
            let resp = self.build_request(reqwest::Method::GET, QRCODE_GENERATE_URL, None).send().await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn qrcode_poll(&self, qrcode_key: &str) -> Envelope {
        self.with_retry(|| async {
            let resp = self
                .build_request(reqwest::Method::GET, QRCODE_POLL_URL, None)
                .query(&[("qrcode_key", qrcode_key)])
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn cookie_info(&self) -> Envelope {
        self.with_retry(|| async {
            let resp = self
                .build_request(reqwest::Method::GET, COOKIE_INFO_URL, None)
                .query(&[("csrf", self.credentials.bili_jct.clone())])
                .send()
                .await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn correspond_page(&self, timestamp_ms: i64) -> reqwest::Result<String> {
        let url = format!("{CORRESPOND_URL}{timestamp_ms}");
        self.build_request(reqwest::Method::GET, &url, None).send().await?.text().await
    }

    pub async fn cookie_refresh(&self, refresh_csrf: &str, refresh_token: &str) -> Envelope {
        self.with_retry(|| async {
            let form = [
                ("csrf", self.credentials.bili_jct.clone()),
                ("refresh_csrf", refresh_csrf.to_string()),
                ("refresh_token", refresh_token.to_string()),
                ("source", "main_web".to_string()),
            ];
            let resp = self.build_request(reqwest::Method::POST, COOKIE_REFRESH_URL, None).form(&form).send().await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn cookie_confirm(&self, new_refresh_token: &str) -> Envelope {
        self.with_retry(|| async {
            let form = [
                ("csrf", self.credentials.bili_jct.clone()),
                ("refresh_token", new_refresh_token.to_string()),
            ];
            let resp = self.build_request(reqwest::Method::POST, COOKIE_CONFIRM_URL, None).form(&form).send().await?;
            parse_envelope(resp).await
        })
        .await
    }

    pub async fn finger_spi(&self) -> Envelope {
        self.with_retry(|| async {
            let resp = self.build_request(reqwest::Method::GET, FINGER_SPI_URL, None).send().await?;
            parse_envelope(resp).await
        })
        .await
    }
}

async fn parse_envelope(resp: reqwest::Response) -> reqwest::Result<Envelope> {
    let cookies: HashMap<String, String> =
        resp.cookies().map(|c| (c.name().to_string(), c.value().to_string())).collect();
    match resp.json::<Envelope>().await {
        Ok(mut envelope) => {
            envelope.cookies = cookies;
            Ok(envelope)
        }
        Err(_) => Ok(Envelope { code: -999, message: "unparseable response body".to_string(), data: Value::Null, cookies }),
    }
}

/// Fetch the two WBI key URLs from `nav` and extract their basenames
/// (spec §4.I). Not bound to an account — the nav endpoint works unauthenticated
/// too, but callers typically use an authenticated client for consistency.
pub async fn fetch_wbi_keys(http: &reqwest::Client) -> anyhow::Result<(String, String)> {
    let resp = http.get(NAV_URL).timeout(REQUEST_TIMEOUT).send().await?;
    let envelope: Envelope = resp.json().await?;
    let img_url = envelope.data.get("wbi_img").and_then(|w| w.get("img_url")).and_then(|v| v.as_str()).unwrap_or("");
    let sub_url = envelope.data.get("wbi_img").and_then(|w| w.get("sub_url")).and_then(|v| v.as_str()).unwrap_or("");
    Ok((signing::extract_key_from_url(img_url), signing::extract_key_from_url(sub_url)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_success_codes() {
        assert_eq!(classify(0), Outcome::TerminalSuccess);
        assert_eq!(classify(12008), Outcome::TerminalSuccess);
        assert_eq!(classify(12022), Outcome::TerminalSuccess);
    }

    #[test]
    fn classify_risk_control_is_terminal_no_retry() {
        assert_eq!(classify(-352), Outcome::RiskControlStop);
    }

    #[test]
    fn classify_auth_invalid_and_human_verification() {
        assert_eq!(classify(-101), Outcome::AuthInvalidStop);
        assert_eq!(classify(-799), Outcome::AuthInvalidStop);
    }

    #[test]
    fn classify_rate_limit_codes() {
        assert_eq!(classify(-412), Outcome::RateLimitRetry);
        assert_eq!(classify(862), Outcome::RateLimitRetry);
        assert_eq!(classify(101), Outcome::RateLimitRetry);
    }

    #[test]
    fn classify_dispatcher_rate_limit_is_distinct_from_client_retry() {
        assert_eq!(classify(12019), Outcome::DispatcherRateLimit);
        assert_ne!(classify(12019), Outcome::RateLimitRetry);
    }

    #[test]
    fn classify_unknown_code_is_terminal_failure() {
        assert_eq!(classify(-1), Outcome::TerminalFailure);
    }
}
