use std::collections::HashMap;

use super::*;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn from_lookup_applies_defaults() {
    let cfg = SessionConfig::from_lookup(lookup(&[
        ("CHAT_SOCKET_URL", "ws://chat.test/socket"),
        ("CHAT_API_URL", "https://api.test/v1/"),
    ]))
    .unwrap();

    assert_eq!(cfg.socket_url, "ws://chat.test/socket");
    assert_eq!(cfg.api_url, "https://api.test/v1");
    assert_eq!(cfg.token_cookie, DEFAULT_TOKEN_COOKIE);
    assert_eq!(cfg.ack_timeout, Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS));
    assert_eq!(cfg.backoff, BackoffConfig::default());
    assert_eq!(cfg.preview_limit, DEFAULT_PREVIEW_LIMIT);
    assert_eq!(cfg.chat_list_url(), "https://api.test/v1/chat");
}

#[test]
fn from_lookup_parses_overrides() {
    let cfg = SessionConfig::from_lookup(lookup(&[
        ("CHAT_SOCKET_URL", "ws://x"),
        ("CHAT_API_URL", "http://y"),
        ("CHAT_TOKEN_COOKIE", "access_token"),
        ("CHAT_ACK_TIMEOUT_MS", "2500"),
        ("CHAT_BACKOFF_INITIAL_MS", "200"),
        ("CHAT_BACKOFF_MAX_MS", "3000"),
        ("CHAT_PREVIEW_LIMIT", " 20 "),
    ]))
    .unwrap();

    assert_eq!(cfg.token_cookie, "access_token");
    assert_eq!(cfg.ack_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.backoff.initial, Duration::from_millis(200));
    assert_eq!(cfg.backoff.max, Duration::from_secs(3));
    assert_eq!(cfg.preview_limit, 20);
}

#[test]
fn from_lookup_requires_endpoints() {
    let err = SessionConfig::from_lookup(lookup(&[("CHAT_API_URL", "http://y")])).unwrap_err();
    assert!(matches!(err, SessionError::MissingConfig { var: "CHAT_SOCKET_URL" }));

    let err = SessionConfig::from_lookup(lookup(&[("CHAT_SOCKET_URL", "ws://x"), ("CHAT_API_URL", "  ")])).unwrap_err();
    assert!(matches!(err, SessionError::MissingConfig { var: "CHAT_API_URL" }));
}

#[test]
fn invalid_numbers_fall_back_to_defaults() {
    let cfg = SessionConfig::from_lookup(lookup(&[
        ("CHAT_SOCKET_URL", "ws://x"),
        ("CHAT_API_URL", "http://y"),
        ("CHAT_ACK_TIMEOUT_MS", "soon"),
        ("CHAT_PREVIEW_LIMIT", "-4"),
    ]))
    .unwrap();

    assert_eq!(cfg.ack_timeout, Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS));
    assert_eq!(cfg.preview_limit, DEFAULT_PREVIEW_LIMIT);
}

#[test]
fn backoff_max_never_below_initial() {
    let cfg = SessionConfig::from_lookup(lookup(&[
        ("CHAT_SOCKET_URL", "ws://x"),
        ("CHAT_API_URL", "http://y"),
        ("CHAT_BACKOFF_INITIAL_MS", "5000"),
        ("CHAT_BACKOFF_MAX_MS", "100"),
    ]))
    .unwrap();

    assert_eq!(cfg.backoff.max, Duration::from_secs(5));
}
