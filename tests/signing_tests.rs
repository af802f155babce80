// Integration coverage for WBI signing (spec §4.B) exercised the way
// platform_client.rs actually drives it: a realistic multi-field param set
// signed end-to-end through WbiCache::ensure_fresh() + sign_params().

use sentinel_orchestrator::signing::{extract_key_from_url, sign_params, WbiCache};

#[tokio::test]
async fn end_to_end_sign_through_cache_is_deterministic_for_fixed_timestamp() {
    let cache = WbiCache::new();
    let keys = cache
        .ensure_fresh(|| async {
            Ok((
                "7cd084941338484aae1ad9425b84077c".to_string(),
                "4932caff0ff746eab6f01bf08b70ac45".to_string(),
            ))
        })
        .await
        .unwrap();

    let mut params = vec![
        ("mid".to_string(), "12345678".to_string()),
        ("pn".to_string(), "1".to_string()),
        ("ps".to_string(), "20".to_string()),
    ];
    sign_params(&mut params, &keys, 1_700_000_000);

    let w_rid = params.iter().find(|(k, _)| k == "w_rid").map(|(_, v)| v.clone());
    assert!(w_rid.is_some());
    assert_eq!(w_rid.unwrap().len(), 32, "w_rid must be a 32-char MD5 hex digest");

    let wts = params.iter().find(|(k, _)| k == "wts").map(|(_, v)| v.clone());
    assert_eq!(wts, Some("1700000000".to_string()));
}

#[test]
fn extract_key_from_url_handles_real_nav_response_shapes() {
    assert_eq!(
        extract_key_from_url("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
        "7cd084941338484aae1ad9425b84077c"
    );
    assert_eq!(extract_key_from_url("noslashorext"), "noslashorext");
    assert_eq!(extract_key_from_url(""), "");
}
