use super::*;

use std::sync::{Mutex, MutexGuard, PoisonError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// # Safety
/// Callers hold `ENV_LOCK` so no other test mutates the environment concurrently.
unsafe fn clear_pagedash_env() {
    unsafe {
        std::env::remove_var("PAGEDASH_API_BASE_URL");
        std::env::remove_var("PAGEDASH_API_PREFIX");
        std::env::remove_var("PAGEDASH_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("PAGEDASH_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("PAGEDASH_LOGIN_PATH");
        std::env::remove_var("PAGEDASH_SESSION_FILE");
    }
}

#[test]
fn from_env_defaults() {
    let _env = env_guard();
    unsafe { clear_pagedash_env() };

    let cfg = ClientConfig::from_env().unwrap();
    assert_eq!(cfg.base_url, DEFAULT_API_BASE_URL);
    assert_eq!(cfg.api_prefix, DEFAULT_API_PREFIX);
    assert_eq!(
        cfg.timeouts,
        Timeouts { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    );
    assert_eq!(cfg.login_path, "/login");
    assert_eq!(cfg.session_file, None);
}

#[test]
fn from_env_parses_overrides() {
    let _env = env_guard();
    unsafe {
        clear_pagedash_env();
        std::env::set_var("PAGEDASH_API_BASE_URL", "https://analytics.example.test/");
        std::env::set_var("PAGEDASH_API_PREFIX", "api/v2/");
        std::env::set_var("PAGEDASH_REQUEST_TIMEOUT_SECS", "5");
        std::env::set_var("PAGEDASH_CONNECT_TIMEOUT_SECS", "2");
        std::env::set_var("PAGEDASH_LOGIN_PATH", "/auth/login");
        std::env::set_var("PAGEDASH_SESSION_FILE", "/tmp/pagedash-session.json");
    }

    let cfg = ClientConfig::from_env().unwrap();
    assert_eq!(cfg.base_url, "https://analytics.example.test");
    assert_eq!(cfg.api_prefix, "/api/v2");
    assert_eq!(cfg.timeouts, Timeouts { request_secs: 5, connect_secs: 2 });
    assert_eq!(cfg.login_path, "/auth/login");
    assert_eq!(cfg.session_file, Some(PathBuf::from("/tmp/pagedash-session.json")));

    unsafe { clear_pagedash_env() };
}

#[test]
fn from_env_ignores_unparseable_timeouts() {
    let _env = env_guard();
    unsafe {
        clear_pagedash_env();
        std::env::set_var("PAGEDASH_REQUEST_TIMEOUT_SECS", "soon");
    }

    let cfg = ClientConfig::from_env().unwrap();
    assert_eq!(cfg.timeouts.request_secs, DEFAULT_REQUEST_TIMEOUT_SECS);

    unsafe { clear_pagedash_env() };
}

#[test]
fn rejects_non_http_base_url() {
    let err = ClientConfig::new("ftp://example.test").unwrap_err().to_string();
    assert!(err.contains("invalid base URL"));
    assert!(ClientConfig::new("http://").is_err());
}

#[test]
fn endpoint_joins_base_prefix_and_path() {
    let cfg = ClientConfig::new("http://127.0.0.1:8000/").unwrap();
    assert_eq!(cfg.endpoint("/auth/login"), "http://127.0.0.1:8000/api/v1/auth/login");
    assert_eq!(cfg.endpoint("pages/"), "http://127.0.0.1:8000/api/v1/pages/");
}

#[test]
fn endpoint_without_prefix() {
    let cfg = ClientConfig::new("http://127.0.0.1:8000").unwrap().with_api_prefix("/");
    assert_eq!(cfg.endpoint("/health/"), "http://127.0.0.1:8000/health/");
}

#[test]
fn endpoint_passes_absolute_urls_through() {
    let cfg = ClientConfig::new("http://127.0.0.1:8000").unwrap();
    assert_eq!(cfg.endpoint("https://cdn.example.test/r.pdf"), "https://cdn.example.test/r.pdf");
}

#[test]
fn same_origin_requires_exact_authority() {
    let cfg = ClientConfig::new("http://127.0.0.1:8000").unwrap();
    assert!(cfg.is_same_origin(&cfg.endpoint("/reports/1")));
    assert!(cfg.is_same_origin("HTTP://127.0.0.1:8000/files/r.csv"));
    assert!(cfg.is_same_origin("http://127.0.0.1:8000"));
    assert!(!cfg.is_same_origin("http://127.0.0.1:8001/files/r.csv"));
    assert!(!cfg.is_same_origin("http://127.0.0.1:80000/files/r.csv"));
    assert!(!cfg.is_same_origin("http://127.0.0.1:8000.evil.test/r.csv"));
    assert!(!cfg.is_same_origin("https://127.0.0.1:8000/r.csv"));
    assert!(!cfg.is_same_origin("http://127"));
}
