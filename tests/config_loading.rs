use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use zone_watch::config::ZoneWatchConfig;
use zone_watch::ingest::SourceSpec;
use zone_watch::tracker::{InsideRule, ZoneRule};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ZONEWATCH_CONFIG",
        "ZONEWATCH_API_ADDR",
        "ZONEWATCH_SOURCE",
        "ZONEWATCH_BACKEND",
        "ZONEWATCH_MODEL",
        "ZONEWATCH_UPLOAD_DIR",
        "ZONEWATCH_TARGET_FPS",
        "ZONEWATCH_OBSERVATION_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, body: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "api": { "addr": "127.0.0.1:9100" },
            "upload": { "dir": "/tmp/zone-uploads", "max_bytes": 1048576 },
            "source": { "target_fps": 15, "width": 320, "height": 240 },
            "detector": { "backend": "stub", "confidence": 0.4 },
            "tracker": { "observation_window_ms": 1000, "zone_rule": "latest" }
        }"#,
    );
    std::env::set_var("ZONEWATCH_CONFIG", file.path());
    std::env::set_var("ZONEWATCH_OBSERVATION_MS", "2500");
    std::env::set_var("ZONEWATCH_SOURCE", "camera:/dev/video2");

    let cfg = ZoneWatchConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.api_addr, "127.0.0.1:9100");
    assert_eq!(cfg.upload_dir.to_str(), Some("/tmp/zone-uploads"));
    assert_eq!(cfg.max_upload_bytes, 1_048_576);
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!((cfg.source.width, cfg.source.height), (320, 240));
    assert_eq!(cfg.detector.backend, "stub");
    assert!((cfg.detector.confidence - 0.4).abs() < f32::EPSILON);
    assert_eq!(cfg.tracker.observation_window, Duration::from_millis(2500));
    assert_eq!(cfg.tracker.zone_rule, ZoneRule::Latest);
    assert_eq!(
        cfg.autostart,
        Some(SourceSpec::Camera {
            device: "/dev/video2".to_string()
        })
    );
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
        [source]
        autostart = "stub://scene"
        max_frames = 50

        [tracker]
        inside_rule = "overlap"
        min_overlap = 0.8
        zone_margin = 0.1

        [render]
        jpeg_quality = 60
        "#,
    );
    let cfg = ZoneWatchConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(
        cfg.autostart,
        Some(SourceSpec::File {
            path: "stub://scene".to_string()
        })
    );
    assert_eq!(cfg.source.max_frames, Some(50));
    assert_eq!(cfg.tracker.inside_rule, InsideRule::Overlap(0.8));
    assert!((cfg.tracker.zone_margin - 0.1).abs() < f32::EPSILON);
    assert_eq!(cfg.render.jpeg_quality, 60);
    assert_eq!(cfg.api_addr, "127.0.0.1:8501");
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let bad_window = config_file(".toml", "[source]\ntarget_fps = 0\n");
    assert!(ZoneWatchConfig::load_from(Some(bad_window.path())).is_err());

    let bad_rule = config_file(".json", r#"{ "tracker": { "zone_rule": "median" } }"#);
    assert!(ZoneWatchConfig::load_from(Some(bad_rule.path())).is_err());

    let bad_source = config_file(".json", r#"{ "source": { "autostart": "rtsp://cam" } }"#);
    assert!(ZoneWatchConfig::load_from(Some(bad_source.path())).is_err());

    std::env::set_var("ZONEWATCH_TARGET_FPS", "fast");
    let err = ZoneWatchConfig::load_from(None).expect_err("non-numeric fps");
    clear_env();
    assert!(err.to_string().contains("ZONEWATCH_TARGET_FPS"));
}

#[test]
fn missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let missing = std::env::temp_dir().join("zone-watch-missing-config.toml");
    assert!(ZoneWatchConfig::load_from(Some(&missing)).is_err());
}
