//! Integration tests for configuration and line registry loading

use brt_arrivals::domain::{LineRegistry, RegistryError};
use brt_arrivals::infra::config::{MAX_EXPIRY_GRACE_SECS, MAX_RETENTION_MINUTES};
use brt_arrivals::infra::Config;
use brt_arrivals::services::QueueSettings;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[server]
bind_address = "127.0.0.1"
port = 8080
max_upload_bytes = 1024

[inference]
detector_url = "http://detector:9000/detect"
recognizer_url = "http://ocr:9001/ocr"
timeout_ms = 2500
max_concurrent = 4
target_classes = ["bus", "truck"]
min_confidence = 0.6

[queue]
expiry_grace_secs = 90
retention_minutes = 45
max_predictions = 5

[registry]
file = "/etc/brt/lines.toml"

[egress]
enabled = false
file = "/var/log/brt/arrivals.jsonl"

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.bind_address(), "127.0.0.1");
    assert_eq!(config.server_port(), 8080);
    assert_eq!(config.max_upload_bytes(), 1024);
    assert_eq!(config.detector_url(), "http://detector:9000/detect");
    assert_eq!(config.recognizer_url(), Some("http://ocr:9001/ocr"));
    assert_eq!(config.inference_timeout_ms(), 2500);
    assert_eq!(config.max_concurrent_inferences(), 4);
    assert_eq!(config.target_classes(), &["bus".to_string(), "truck".to_string()]);
    assert_eq!(config.min_detection_confidence(), 0.6);
    assert_eq!(config.expiry_grace_secs(), 90);
    assert_eq!(config.retention_minutes(), 45);
    assert_eq!(config.max_predictions(), 5);
    assert_eq!(config.registry_file(), Some("/etc/brt/lines.toml"));
    assert!(!config.egress_enabled());
    assert_eq!(config.egress_file(), "/var/log/brt/arrivals.jsonl");
    assert_eq!(config.metrics_interval_secs(), 15);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.server_port(), 5000);
    assert_eq!(config.detector_url(), "http://127.0.0.1:8500/detect");
    assert_eq!(config.recognizer_url(), None);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_malformed_config_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[server]\nport = \"not a number\"\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_zero_concurrency_clamped() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[inference]\nmax_concurrent = 0\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.max_concurrent_inferences(), 1);
}

#[test]
fn test_out_of_range_queue_windows_rejected() {
    for body in [
        "[queue]\nretention_minutes = 1000000000000000\n",
        "[queue]\nretention_minutes = 9223372036854775807\n",
        "[queue]\nexpiry_grace_secs = 9223372036854775807\n",
    ] {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(body.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("exceeds the maximum"), "{:#}", err);

        let config = Config::load_from_path(temp_file.path().to_str().unwrap());
        assert_eq!(config.retention_minutes(), 30);
        let settings = QueueSettings::from_config(&config);
        assert_eq!(settings.retention.num_minutes(), 30);
    }
}

#[test]
fn test_queue_windows_at_maximum() {
    let mut temp_file = NamedTempFile::new().unwrap();
    let body = format!(
        "[queue]\nexpiry_grace_secs = {}\nretention_minutes = {}\n",
        MAX_EXPIRY_GRACE_SECS, MAX_RETENTION_MINUTES
    );
    temp_file.write_all(body.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    let settings = QueueSettings::from_config(&config);
    assert_eq!(settings.expiry_grace.num_seconds(), MAX_EXPIRY_GRACE_SECS as i64);
    assert_eq!(settings.retention.num_minutes(), MAX_RETENTION_MINUTES as i64);
}

#[test]
fn test_registry_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
[[line]]
code = "437"
name = "TI Caxanga (Conde da Boa Vista) - BRT"
avg_travel_minutes = 5
distance_km = 2.5

[[line]]
code = "1990"
name = "Derby - Boa Viagem"
avg_travel_minutes = 12.5
distance_km = 7.0
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let registry = LineRegistry::load(temp_file.path().to_str()).unwrap();
    assert_eq!(registry.codes(), vec!["437", "1990"]);
    assert_eq!(registry.get("1990").unwrap().travel_time().num_seconds(), 750);
}

#[test]
fn test_registry_missing_file_is_fatal() {
    let result = LineRegistry::load(Some("/nonexistent/lines.toml"));
    assert!(matches!(result, Err(RegistryError::Read { .. })));
}

#[test]
fn test_registry_rejects_duplicates() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
[[line]]
code = "437"
name = "A"
avg_travel_minutes = 5
distance_km = 2.5

[[line]]
code = "437"
name = "B"
avg_travel_minutes = 5
distance_km = 2.5
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let result = LineRegistry::from_file(temp_file.path());
    assert!(matches!(result, Err(RegistryError::DuplicateCode(code)) if code == "437"));
}

#[test]
fn test_shipped_config_files_parse() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert_eq!(config.site_id(), "recife-cdbv");
    assert_eq!(config.registry_file(), None);

    let registry = LineRegistry::from_file("config/lines.toml").unwrap();
    assert_eq!(registry.len(), LineRegistry::builtin().len());
}
