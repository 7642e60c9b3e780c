use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use marker_bridge::config::BridgeConfig;
use marker_bridge::TrackingMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MARKER_BRIDGE_CONFIG",
        "MARKER_BRIDGE_LINK_HOST",
        "MARKER_BRIDGE_LINK_PORT",
        "MARKER_BRIDGE_DEVICE_NAME",
        "MARKER_BRIDGE_CAMERA",
        "MARKER_BRIDGE_MODE",
        "MARKER_BRIDGE_ACTIVE_TRACKERS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "link": { "host": "10.0.0.5", "port": 9000, "device_name": "desk-cam" },
            "camera": { "device": "/dev/video2", "target_fps": 60, "width": 640, "height": 480 },
            "storage": { "trackers_dir": "/srv/trackers", "calibration_dir": "/srv/calib" },
            "tracking": {
                "mode": "markers",
                "active_trackers": ["left_foot"],
                "min_board_samples": 4
            }
        }"#,
    );

    std::env::set_var("MARKER_BRIDGE_CONFIG", file.path());
    std::env::set_var("MARKER_BRIDGE_LINK_PORT", "9100");
    std::env::set_var("MARKER_BRIDGE_MODE", "calibrate");
    std::env::set_var("MARKER_BRIDGE_ACTIVE_TRACKERS", "hip, left_foot,,right_foot");

    let cfg = BridgeConfig::load().expect("load config");

    assert_eq!(cfg.link.host, "10.0.0.5");
    assert_eq!(cfg.link.port, 9100);
    assert_eq!(cfg.link.device_name.as_deref(), Some("desk-cam"));
    assert_eq!(cfg.camera.device, "/dev/video2");
    assert_eq!(cfg.camera.target_fps, 60);
    assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
    assert_eq!(cfg.trackers_dir, PathBuf::from("/srv/trackers"));
    assert_eq!(cfg.calibration_dir, PathBuf::from("/srv/calib"));
    assert_eq!(cfg.tracking.initial_mode, TrackingMode::Calibrate);
    assert_eq!(
        cfg.tracking.active_trackers,
        vec!["hip", "left_foot", "right_foot"]
    );
    assert_eq!(cfg.tracking.min_board_samples, 4);
    assert_eq!(cfg.tracking.vision_backend, "stub");

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BridgeConfig::load().expect("load config");
    assert_eq!(cfg.link.host, "192.168.1.22");
    assert_eq!(cfg.link.port, 8082);
    assert_eq!(cfg.link.device_name, None);
    assert_eq!(cfg.camera.device, "stub://camera");
    assert_eq!(cfg.camera.target_fps, 30);
    assert_eq!(cfg.tracking.initial_mode, TrackingMode::Trackers);
    assert!(cfg.tracking.active_trackers.is_empty());
    assert_eq!(cfg.tracking.min_board_samples, 10);
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let zero_fps = write_config(r#"{ "camera": { "target_fps": 0 } }"#);
    assert!(BridgeConfig::load_from(Some(zero_fps.path())).is_err());

    let zero_samples = write_config(r#"{ "tracking": { "min_board_samples": 0 } }"#);
    assert!(BridgeConfig::load_from(Some(zero_samples.path())).is_err());

    let not_json = write_config("link = 1");
    assert!(BridgeConfig::load_from(Some(not_json.path())).is_err());

    std::env::set_var("MARKER_BRIDGE_LINK_PORT", "eighty");
    assert!(BridgeConfig::load().is_err());
    std::env::set_var("MARKER_BRIDGE_LINK_PORT", "0");
    assert!(BridgeConfig::load().is_err());
    clear_env();

    std::env::set_var("MARKER_BRIDGE_MODE", "sideways");
    assert!(BridgeConfig::load().is_err());
    clear_env();
}
