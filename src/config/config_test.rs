use serial_test::serial;
use temp_env::with_vars;

use super::*;
use crate::Error;

fn cleanup_all_rules_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("RULES__") || key == "RULES_CONFIG_PATH" {
            std::env::remove_var(&key);
        }
    }
}

#[test]
#[serial]
fn default_settings_should_use_hardcoded_values() {
    let settings = Settings::default();

    assert_eq!(settings.engine.default_lock_ttl_ms, 30_000);
    assert_eq!(settings.engine.concurrency, 5);
    assert_eq!(settings.engine.channel_buffer_size, 100);
    assert_eq!(settings.crawler.interval_ms, 300_000);
    assert_eq!(settings.crawler.cycle_timeout_ms, 15 * 60 * 1000);
    assert!(settings.lock.shared_session);
    assert_eq!(settings.lock.lock_key_prefix, "/rules-locks");
    assert_eq!(settings.pruner.timeout_ms, 300_000);
    assert!(settings.clone().validate().is_ok());
}

#[test]
#[serial]
fn new_should_merge_environment_overrides() {
    cleanup_all_rules_env_vars();
    with_vars(
        vec![
            ("RULES__ENGINE__CONCURRENCY", Some("12")),
            ("RULES__CRAWLER__MUTEX_KEY", Some("/crawler-mutex")),
        ],
        || {
            let settings = Settings::new().unwrap();
            assert_eq!(settings.engine.concurrency, 12);
            assert_eq!(settings.crawler.mutex_key.as_deref(), Some("/crawler-mutex"));
        },
    );
}

#[test]
#[serial]
fn with_override_config_should_merge_file_settings() {
    cleanup_all_rules_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("rules.toml");
    std::fs::write(
        &config_path,
        r#"
        [crawler]
        interval_ms = 60000
        jitter_percent = 0.5

        [lock]
        cool_off_ms = 250
        lock_key_prefix = "/my-locks"

        [pruner]
        prefixes = ["/my-locks", "/legacy-locks"]
        "#,
    )
    .unwrap();

    let empty_vars: Vec<(&str, Option<&str>)> = vec![];
    with_vars(empty_vars, || {
        let settings = Settings::new()
            .unwrap()
            .with_override_config(config_path.to_str().unwrap())
            .unwrap()
            .validate()
            .unwrap();

        assert_eq!(settings.crawler.interval_ms, 60_000);
        assert_eq!(settings.crawler.jitter_percent, 0.5);
        assert_eq!(settings.lock.cool_off_ms, Some(250));
        assert_eq!(settings.lock.lock_key_prefix, "/my-locks");
        assert_eq!(settings.pruner_prefixes(), vec!["/my-locks", "/legacy-locks"]);
        // untouched sections keep their defaults
        assert_eq!(settings.engine, EngineConfig::default());
    });
}

#[test]
#[serial]
fn environment_should_override_file() {
    cleanup_all_rules_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("rules.toml");
    std::fs::write(&config_path, "[engine]\nconcurrency = 3\n").unwrap();

    with_vars(vec![("RULES__ENGINE__CONCURRENCY", Some("7"))], || {
        let settings = Settings::load(Some(config_path.to_str().unwrap())).unwrap();
        assert_eq!(settings.engine.concurrency, 7);
    });
}

#[test]
#[serial]
fn load_should_reject_invalid_values() {
    cleanup_all_rules_env_vars();
    with_vars(vec![("RULES__ENGINE__CONCURRENCY", Some("0"))], || {
        let err = Settings::load(None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    });
}

#[test]
fn pruner_prefixes_default_to_lock_key_prefix() {
    let mut settings = Settings::default();
    settings.lock.lock_key_prefix = "/locks".into();
    assert_eq!(settings.pruner_prefixes(), vec!["/locks".to_string()]);
}

#[test]
fn validation_should_fail_with_bad_lock_prefix() {
    let mut settings = Settings::default();
    settings.lock.lock_key_prefix = "/locks/".into();
    assert!(settings.validate().is_err());
}

#[test]
fn validation_should_fail_when_pruner_timeout_shorter_than_interval() {
    let mut settings = Settings::default();
    settings.pruner.timeout_ms = 10;
    settings.pruner.interval_ms = 1000;
    assert!(settings.clone().validate().is_err());

    settings.pruner.enabled = false;
    assert!(settings.validate().is_ok());
}

#[test]
fn validation_should_bound_crawl_cycle() {
    let mut settings = Settings::default();
    settings.crawler.cycle_timeout_ms = 16 * 60 * 1000;
    assert!(settings.validate().is_err());
}
