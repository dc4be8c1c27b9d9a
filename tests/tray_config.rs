use std::io::Write;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use tray_inspector::config::{OutputFormat, TrayConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRAY_CONFIG",
        "TRAY_API_ADDR",
        "TRAY_MAX_UPLOAD_BYTES",
        "TRAY_CONFIDENCE_THRESHOLD",
        "TRAY_CLASSES",
        "TRAY_BACKEND",
        "TRAY_MODEL_PATH",
        "TRAY_FIXTURE_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_toml_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[api]
addr = "0.0.0.0:9100"
max_upload_bytes = 1048576

[detection]
confidence_threshold = 0.6
classes_to_track = [1, 0, 1]

[model]
backend = " Stub "
class_names = ["egg", "empty_slot"]

[output]
format = "png"
status_banner = false
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    std::env::set_var("TRAY_CONFIG", file.path());
    std::env::set_var("TRAY_CONFIDENCE_THRESHOLD", "0.25");

    let cfg = TrayConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.api_addr, "0.0.0.0:9100");
    assert_eq!(cfg.max_upload_bytes, 1_048_576);
    assert_eq!(cfg.detection.confidence_threshold, 0.25);
    assert_eq!(cfg.detection.classes_to_track, Some(vec![0, 1]));
    assert_eq!(cfg.model.backend, "stub");
    assert_eq!(cfg.model.class_names, vec!["egg", "empty_slot"]);
    assert_eq!(cfg.output.format, OutputFormat::Png);
    assert!(!cfg.output.status_banner);
    assert_eq!(cfg.output.jpeg_quality, 90);
}

#[test]
fn loads_json_config_and_clears_class_filter_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "detection": { "classes_to_track": [0] },
        "output": { "jpeg_quality": 75 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("TRAY_CONFIG", file.path());
    std::env::set_var("TRAY_CLASSES", "");
    std::env::set_var("TRAY_API_ADDR", "127.0.0.1:0");

    let cfg = TrayConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.detection.classes_to_track, None);
    assert_eq!(cfg.api_addr, "127.0.0.1:0");
    assert_eq!(cfg.output.jpeg_quality, 75);
    assert_eq!(cfg.output.format, OutputFormat::Jpeg);
    assert_eq!(cfg.detection.confidence_threshold, 0.5);
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRAY_CONFIDENCE_THRESHOLD", "high");
    assert!(TrayConfig::load().is_err());
    clear_env();

    std::env::set_var("TRAY_CONFIDENCE_THRESHOLD", "1.2");
    assert!(TrayConfig::load().is_err());
    clear_env();

    std::env::set_var("TRAY_BACKEND", "opencv");
    assert!(TrayConfig::load().is_err());
    clear_env();

    std::env::set_var("TRAY_BACKEND", "tract");
    let err = TrayConfig::load().unwrap_err();
    assert!(err.to_string().contains("model.path"));
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRAY_CONFIG", "/nonexistent/tray.toml");
    assert!(TrayConfig::load().is_err());
    clear_env();
}
