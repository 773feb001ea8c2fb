//! Integration tests for configuration loading

use body_measure::infra::Config;
use body_measure::services::Range;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[server]
bind_address = "127.0.0.1"
port = 9001
service_name = "fitting-room"
max_upload_bytes = 1048576

[estimator]
url = "http://pose:8502/pose"
timeout_ms = 2500
model_complexity = 1
enable_segmentation = false
min_detection_confidence = 0.6

[calibration]
reference_shoulder_width_cm = 42.0
height_cm = { min = 130.0, max = 230.0 }

[metrics]
interval_secs = 15
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.bind_address(), "127.0.0.1");
    assert_eq!(config.port(), 9001);
    assert_eq!(config.service_name(), "fitting-room");
    assert_eq!(config.max_upload_bytes(), 1_048_576);
    assert_eq!(config.estimator_url(), "http://pose:8502/pose");
    assert_eq!(config.estimator_timeout_ms(), 2500);

    let options = config.estimator_options();
    assert_eq!(options.model_complexity, 1);
    assert!(!options.enable_segmentation);
    assert!(options.static_image_mode);
    assert_eq!(options.min_detection_confidence, 0.6);

    let calibration = config.calibration();
    assert_eq!(calibration.reference_shoulder_width_cm, 42.0);
    assert_eq!(calibration.height_cm, Range::new(130.0, 230.0));
    // Untouched calibration keys keep their defaults
    assert_eq!(calibration.shoulder_width_cm, Range::new(30.0, 60.0));
    assert_eq!(calibration.chest_to_shoulder_ratio, 0.85);

    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.listen_addr().unwrap(), "127.0.0.1:9001".parse().unwrap());
}

#[test]
fn test_partial_config_uses_defaults() {
    let temp_file = write_config("[server]\nport = 8100\n");

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.port(), 8100);
    assert_eq!(config.bind_address(), "0.0.0.0");
    assert_eq!(config.estimator_url(), "http://127.0.0.1:8502/pose");
    assert_eq!(config.estimator_options().model_complexity, 2);
    assert_eq!(config.metrics_interval_secs(), 60);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/path/config.toml");

    assert_eq!(config.config_file(), "default");
    assert_eq!(config.port(), 8001);
    assert_eq!(config.service_name(), "body-measurement-api");
}

#[test]
fn test_inverted_calibration_range_rejected() {
    let temp_file = write_config("[calibration]\nwaist_width_cm = { min = 50.0, max = 20.0 }\n");

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("waist_width_cm"));
}

#[test]
fn test_invalid_estimator_options_rejected() {
    let temp_file = write_config("[estimator]\nmodel_complexity = 3\n");
    assert!(Config::from_file(temp_file.path()).is_err());

    let temp_file = write_config("[estimator]\nmin_detection_confidence = 1.5\n");
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_malformed_toml_rejected() {
    let temp_file = write_config("[server\nport = ");
    assert!(Config::from_file(temp_file.path()).is_err());
}
