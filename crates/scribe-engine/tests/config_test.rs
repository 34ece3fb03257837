use scribe_common::protocol::ActionKind;
use scribe_engine::config::{ConfigLoader, ScribeConfig};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_values() {
    let config = ScribeConfig::default();
    assert_eq!(config.dedup.rapid_fire_window_ms, 200);
    assert_eq!(config.dedup.proximity_window_ms, 500);
    assert_eq!(config.input.debounce_ms, 500);
    assert_eq!(config.input.max_value_len, 100);
    assert_eq!(config.navigation.flag_validity_ms, 5000);
    assert_eq!(config.navigation.grace_delay_ms, 150);
    assert!(config.capture.redact_sensitive_values);
}

#[test]
fn test_policy_per_action() {
    let config = ScribeConfig::default();
    let click = config.screenshot.policy_for(ActionKind::Click);
    assert_eq!((click.attempts, click.timeout_ms), (1, 3000));

    let load = config.screenshot.policy_for(ActionKind::PageLoad);
    assert_eq!(load.attempts, 3);
    assert_eq!(load.ready_wait_ms, Some(500));
    assert_eq!(load.backoff_before(1).as_millis(), 0);
    assert_eq!(load.backoff_before(3).as_millis(), 600);

    let submit = config.screenshot.policy_for(ActionKind::Submit);
    assert_eq!((submit.pre_delay_ms, submit.timeout_ms), (100, 5000));
}

#[tokio::test]
async fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
dedup:
  rapid_fire_window_ms: 250
navigation:
  grace_delay_ms: 50
screenshot:
  click:
    attempts: 2
    timeout_ms: 1000
capture:
  sensitive_fields:
    - "pin"
    "#
    )
    .unwrap();

    let config = ConfigLoader::load_from(file.path())
        .await
        .expect("Failed to load config from file");

    assert_eq!(config.dedup.rapid_fire_window_ms, 250);
    assert_eq!(config.dedup.proximity_window_ms, 500);
    assert_eq!(config.navigation.grace_delay_ms, 50);
    assert_eq!(config.screenshot.click.attempts, 2);
    assert_eq!(config.screenshot.click.pre_delay_ms, 0);
    assert_eq!(config.screenshot.navigation.attempts, 3);
    assert_eq!(config.capture.sensitive_fields, vec!["pin".to_string()]);
    assert!(config.capture.redact_sensitive_values);
}

#[test]
fn test_empty_and_invalid_content() {
    assert_eq!(
        ConfigLoader::parse("  \n").unwrap().input.debounce_ms,
        500
    );
    assert!(ConfigLoader::parse("dedup: [1, 2]").is_err());
}
