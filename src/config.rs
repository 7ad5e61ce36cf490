use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::{SourceSettings, SourceSpec};
use crate::tracker::{InsideRule, TrackerConfig, ZoneRule};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8501";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_BACKEND: &str = "cpu";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_MIN_OVERLAP: f32 = 0.9;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_THICKNESS: u32 = 2;
const MAX_TARGET_FPS: u32 = 120;

pub const KNOWN_BACKENDS: &[&str] = &["cpu", "stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    api: Option<ApiConfigFile>,
    upload: Option<UploadConfigFile>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    dir: Option<PathBuf>,
    max_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    autostart: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    max_frames: Option<u64>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    observation_window_ms: Option<u64>,
    lost_timeout_ms: Option<u64>,
    match_iou: Option<f32>,
    max_center_distance: Option<f32>,
    follow_jumps: Option<bool>,
    max_jump_distance: Option<f32>,
    zone_margin: Option<f32>,
    zone_rule: Option<ZoneRule>,
    inside_rule: Option<String>,
    min_overlap: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    jpeg_quality: Option<u8>,
    thickness: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ZoneWatchConfig {
    pub api_addr: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Session started as soon as the daemon is up.
    pub autostart: Option<SourceSpec>,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub tracker: TrackerConfig,
    pub render: RenderSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// Square model input side in pixels.
    pub input_size: u32,
    /// Minimum person confidence, also applied by the session.
    pub confidence: f32,
    pub iou: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub jpeg_quality: u8,
    pub thickness: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            thickness: DEFAULT_THICKNESS,
        }
    }
}

impl Default for ZoneWatchConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            autostart: None,
            source: SourceSettings::default(),
            detector: DetectorSettings::default(),
            tracker: TrackerConfig::default(),
            render: RenderSettings::default(),
        }
    }
}

impl ZoneWatchConfig {
    /// Load from `ZONEWATCH_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ZONEWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or(defaults.api_addr);

        let upload = file.upload.unwrap_or_default();
        let upload_dir = upload.dir.unwrap_or(defaults.upload_dir);
        let max_upload_bytes = upload.max_bytes.unwrap_or(defaults.max_upload_bytes);

        let source = file.source.unwrap_or_default();
        let autostart = source
            .autostart
            .as_deref()
            .map(SourceSpec::parse)
            .transpose()
            .context("invalid source.autostart")?;
        let source_settings = SourceSettings {
            target_fps: source.target_fps.unwrap_or(defaults.source.target_fps),
            width: source.width.unwrap_or(defaults.source.width),
            height: source.height.unwrap_or(defaults.source.height),
            max_frames: source.max_frames,
            seed: source.seed.unwrap_or(defaults.source.seed),
        };

        let detector = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector.backend.unwrap_or(defaults.detector.backend),
            model_path: detector.model_path,
            input_size: detector.input_size.unwrap_or(defaults.detector.input_size),
            confidence: detector.confidence.unwrap_or(defaults.detector.confidence),
            iou: detector.iou.unwrap_or(defaults.detector.iou),
        };

        let tracker = file.tracker.unwrap_or_default();
        let inside_rule = parse_inside_rule(
            tracker.inside_rule.as_deref(),
            tracker.min_overlap.unwrap_or(DEFAULT_MIN_OVERLAP),
        )?;
        let base = defaults.tracker;
        let tracker = TrackerConfig {
            observation_window: tracker
                .observation_window_ms
                .map(Duration::from_millis)
                .unwrap_or(base.observation_window),
            lost_timeout: tracker
                .lost_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.lost_timeout),
            match_iou: tracker.match_iou.unwrap_or(base.match_iou),
            max_center_distance: tracker
                .max_center_distance
                .unwrap_or(base.max_center_distance),
            follow_jumps: tracker.follow_jumps.unwrap_or(base.follow_jumps),
            max_jump_distance: tracker
                .max_jump_distance
                .unwrap_or(base.max_jump_distance),
            zone_margin: tracker.zone_margin.unwrap_or(base.zone_margin),
            zone_rule: tracker.zone_rule.unwrap_or(base.zone_rule),
            inside_rule,
        };

        let render = file.render.unwrap_or_default();
        let render = RenderSettings {
            jpeg_quality: render.jpeg_quality.unwrap_or(defaults.render.jpeg_quality),
            thickness: render.thickness.unwrap_or(defaults.render.thickness),
        };

        Ok(Self {
            api_addr,
            upload_dir,
            max_upload_bytes,
            autostart,
            source: source_settings,
            detector,
            tracker,
            render,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("ZONEWATCH_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(source) = env_value("ZONEWATCH_SOURCE") {
            self.autostart = Some(SourceSpec::parse(&source).context("invalid ZONEWATCH_SOURCE")?);
        }
        if let Some(backend) = env_value("ZONEWATCH_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(model) = env_value("ZONEWATCH_MODEL") {
            self.detector.model_path = Some(PathBuf::from(model));
        }
        if let Some(dir) = env_value("ZONEWATCH_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(fps) = env_value("ZONEWATCH_TARGET_FPS") {
            self.source.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("ZONEWATCH_TARGET_FPS must be an integer"))?;
        }
        if let Some(window) = env_value("ZONEWATCH_OBSERVATION_MS") {
            let millis: u64 = window.parse().map_err(|_| {
                anyhow!("ZONEWATCH_OBSERVATION_MS must be an integer number of milliseconds")
            })?;
            self.tracker.observation_window = Duration::from_millis(millis);
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("api addr '{}' is not a socket address", self.api_addr))?;
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("upload max_bytes must be greater than zero"));
        }

        if self.source.target_fps == 0 || self.source.target_fps > MAX_TARGET_FPS {
            return Err(anyhow!(
                "source target_fps must be between 1 and {}",
                MAX_TARGET_FPS
            ));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be non-zero"));
        }

        self.detector.backend = self.detector.backend.trim().to_ascii_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "detector backend must be one of {}, got '{}'",
                KNOWN_BACKENDS.join(", "),
                self.detector.backend
            ));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract backend requires detector.model_path"));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!("detector input_size must be a positive multiple of 32"));
        }
        check_unit("detector confidence", self.detector.confidence)?;
        check_unit("detector iou", self.detector.iou)?;

        check_unit("tracker match_iou", self.tracker.match_iou)?;
        let max_distance = self.tracker.max_center_distance;
        if max_distance.is_nan() || max_distance < 0.0 {
            return Err(anyhow!("tracker max_center_distance must be non-negative"));
        }
        let max_jump = self.tracker.max_jump_distance;
        if !max_jump.is_finite() || max_jump < max_distance {
            return Err(anyhow!(
                "tracker max_jump_distance must be finite and at least max_center_distance"
            ));
        }
        if !(0.0..1.0).contains(&self.tracker.zone_margin) {
            return Err(anyhow!("tracker zone_margin must be in [0, 1)"));
        }
        if self.tracker.lost_timeout.is_zero() {
            return Err(anyhow!("tracker lost_timeout must be greater than zero"));
        }
        if let InsideRule::Overlap(min) = self.tracker.inside_rule {
            if !(min > 0.0 && min <= 1.0) {
                return Err(anyhow!("tracker min_overlap must be in (0, 1]"));
            }
        }

        if !(1..=100).contains(&self.render.jpeg_quality) {
            return Err(anyhow!("render jpeg_quality must be between 1 and 100"));
        }
        if !(1..=16).contains(&self.render.thickness) {
            return Err(anyhow!("render thickness must be between 1 and 16"));
        }
        Ok(())
    }
}

fn parse_inside_rule(value: Option<&str>, min_overlap: f32) -> Result<InsideRule> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("contained") => Ok(InsideRule::Contained),
        Some("overlap") => Ok(InsideRule::Overlap(min_overlap)),
        Some(other) => Err(anyhow!(
            "tracker inside_rule must be 'contained' or 'overlap', got '{}'",
            other
        )),
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(anyhow!("{} must be in [0, 1], got {}", name, value))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let mut cfg = ZoneWatchConfig::default();
        cfg.validate()?;
        assert_eq!(cfg.api_addr, "127.0.0.1:8501");
        assert_eq!(cfg.tracker.observation_window, Duration::from_secs(2));
        assert_eq!(cfg.detector.backend, "cpu");
        Ok(())
    }

    #[test]
    fn tracker_section_maps_to_tracker_config() -> Result<()> {
        let file: ConfigFile = toml::from_str(
            r#"
            [tracker]
            observation_window_ms = 1500
            zone_rule = "union"
            inside_rule = "overlap"
            min_overlap = 0.75
            "#,
        )?;
        let cfg = ZoneWatchConfig::from_file(file)?;
        assert_eq!(cfg.tracker.observation_window, Duration::from_millis(1500));
        assert_eq!(cfg.tracker.zone_rule, ZoneRule::Union);
        assert_eq!(cfg.tracker.inside_rule, InsideRule::Overlap(0.75));
        assert_eq!(cfg.tracker.lost_timeout, Duration::from_secs(3));
        Ok(())
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = ZoneWatchConfig::default();
        cfg.render.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ZoneWatchConfig::default();
        cfg.detector.backend = "tract".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = ZoneWatchConfig::default();
        cfg.tracker.zone_margin = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ZoneWatchConfig::default();
        cfg.api_addr = "localhost".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn jump_limit_is_read_and_checked() -> Result<()> {
        let file: ConfigFile = toml::from_str("[tracker]\nmax_jump_distance = 2.0\n")?;
        let mut cfg = ZoneWatchConfig::from_file(file)?;
        cfg.validate()?;
        assert_eq!(cfg.tracker.max_jump_distance, 2.0);
        assert_eq!(ZoneWatchConfig::default().tracker.max_jump_distance, 3.0);

        cfg.tracker.max_jump_distance = -1.0;
        assert!(cfg.validate().is_err());
        cfg.tracker.max_jump_distance = f32::INFINITY;
        assert!(cfg.validate().is_err());
        cfg.tracker.max_jump_distance = 0.25;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn unknown_inside_rule_fails() {
        assert!(parse_inside_rule(Some("touching"), 0.5).is_err());
    }
}
