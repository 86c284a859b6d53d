use std::{env, fs};

use petid_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("petid.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081

[logging]
level = "debug"

[cache]
enabled = false
host = "cache.local"
port = 6390

[rate_limit.upload]
window_secs = 30
max_requests = 5
message = "Slow down with the photos."
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses, unspecified policies keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level, "debug");
    assert!(!cfg.cache.enabled);
    assert_eq!(cfg.cache.connection_url().unwrap(), "redis://cache.local:6390");
    assert_eq!(cfg.rate_limit.upload.max_requests, 5);
    assert_eq!(cfg.rate_limit.upload.window_secs, 30);
    assert_eq!(cfg.rate_limit.auth.max_requests, 10);
    assert_eq!(cfg.rate_limit.standard.max_requests, 100);

    // 2) Flat CACHE_* variables and prefixed overrides win over the file
    unsafe {
        env::set_var("CACHE_ENABLED", "true");
        env::set_var("CACHE_HOST", "redis.internal");
        env::set_var("CACHE_PORT", "6380");
        env::set_var("CACHE_PASSWORD", "hunter2");
        env::set_var("CACHE_TLS", "true");
        env::set_var("PETID__SERVER__PORT", "9090");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert!(cfg_env.cache.enabled);
    assert!(cfg_env.cache.tls);
    assert_eq!(cfg_env.server.port, 9090);
    assert_eq!(
        cfg_env.cache.connection_url().unwrap(),
        "rediss://:hunter2@redis.internal:6380"
    );

    // 3) CACHE_URL takes precedence over the individual parts
    unsafe {
        env::set_var("CACHE_URL", "redis://primary.internal:6379/1");
    }
    let cfg_url = load_config(path.to_str()).expect("should parse config with CACHE_URL");
    assert_eq!(
        cfg_url.cache.connection_url().unwrap(),
        "redis://primary.internal:6379/1"
    );

    unsafe {
        for var in [
            "CACHE_ENABLED",
            "CACHE_HOST",
            "CACHE_PORT",
            "CACHE_PASSWORD",
            "CACHE_TLS",
            "CACHE_URL",
            "PETID__SERVER__PORT",
        ] {
            env::remove_var(var);
        }
    }

    // 4) Invalid values are rejected
    let invalid = r#"
[rate_limit.auth]
window_secs = 0
max_requests = 10
message = "x"
"#;
    fs::write(&path, invalid).expect("write invalid toml");
    let err = load_config(path.to_str()).expect_err("zero window must be rejected");
    assert!(err.contains("rate_limit.auth.window_secs"));
}
