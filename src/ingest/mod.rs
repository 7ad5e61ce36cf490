//! Frame sources.
//!
//! - Camera devices (feature: ingest-v4l2)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` scenes (always available, used by tests and demos)
//!
//! Every source yields RGB24 `Frame`s carrying their index and the time elapsed
//! since the session started. Only local paths are accepted; there is no
//! network ingestion.

#[cfg(feature = "ingest-file-ffmpeg")]
pub mod file;
#[cfg(any(feature = "ingest-v4l2", test))]
mod normalize;
mod probe;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
pub use file::FileSource;
pub use probe::{available_cameras, is_valid_device_path, CameraInfo};
pub use synthetic::{Actor, Scene, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

pub const DEFAULT_TARGET_FPS: u32 = 10;
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Capture parameters shared by every source kind.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSettings {
    /// Camera rate request, synthetic clock rate and session pacing.
    pub target_fps: u32,
    /// Preferred size for cameras and the size of synthetic frames.
    pub width: u32,
    pub height: u32,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Seed for synthetic scenes.
    pub seed: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            max_frames: None,
            seed: 7,
        }
    }
}

/// What the user picked as input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    Camera { device: String },
    File { path: String },
}

impl SourceSpec {
    /// Parse `camera:/dev/video0`, `file:clip.mp4` or a bare `stub://scene`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Some(device) = value.strip_prefix("camera:") {
            return Self::camera(device);
        }
        if let Some(path) = value.strip_prefix("file:") {
            return Self::file(path);
        }
        if value.starts_with("stub://") {
            return Self::file(value);
        }
        Err(anyhow!(
            "source must look like camera:<device>, file:<path> or stub://<scene>, got '{}'",
            value
        ))
    }

    pub fn camera(device: &str) -> Result<Self> {
        let device = device.trim();
        if !device.starts_with("stub://") && !is_valid_device_path(device) {
            return Err(anyhow!("invalid camera device '{}'", device));
        }
        Ok(SourceSpec::Camera {
            device: device.to_string(),
        })
    }

    pub fn file(path: &str) -> Result<Self> {
        let path = path.trim();
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "file sources only support local paths (no URL schemes)"
            ));
        }
        Ok(SourceSpec::File {
            path: path.to_string(),
        })
    }

    pub fn is_synthetic(&self) -> bool {
        match self {
            SourceSpec::Camera { device } => device.starts_with("stub://"),
            SourceSpec::File { path } => path.starts_with("stub://"),
        }
    }

    fn location(&self) -> &str {
        match self {
            SourceSpec::Camera { device } => device,
            SourceSpec::File { path } => path,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Camera { device } => write!(f, "camera:{}", device),
            SourceSpec::File { path } => write!(f, "file:{}", path),
        }
    }
}

/// Statistics for any source.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// An opened frame source.
pub struct VideoSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    File(FileSource),
    #[cfg(feature = "ingest-v4l2")]
    Camera(V4l2Source),
}

impl VideoSource {
    pub fn open(spec: &SourceSpec, settings: &SourceSettings) -> Result<Self> {
        if spec.is_synthetic() {
            let source = SyntheticSource::new(spec.location(), settings.clone())?;
            return Ok(Self {
                backend: SourceBackend::Synthetic(source),
            });
        }
        match spec {
            SourceSpec::Camera { device } => open_camera(device, settings),
            SourceSpec::File { path } => open_file(path, settings),
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::File(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Camera(source) => source.connect(),
        }
    }

    /// Next frame, or `None` once the source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::File(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Camera(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::File(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Camera(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::File(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Camera(source) => source.stats(),
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(device: &str, settings: &SourceSettings) -> Result<VideoSource> {
    Ok(VideoSource {
        backend: SourceBackend::Camera(V4l2Source::new(device, settings.clone())?),
    })
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(_device: &str, _settings: &SourceSettings) -> Result<VideoSource> {
    Err(anyhow!("camera capture requires the ingest-v4l2 feature"))
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_file(path: &str, settings: &SourceSettings) -> Result<VideoSource> {
    Ok(VideoSource {
        backend: SourceBackend::File(FileSource::new(path, settings.clone())?),
    })
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_file(_path: &str, _settings: &SourceSettings) -> Result<VideoSource> {
    Err(anyhow!(
        "file playback requires the ingest-file-ffmpeg feature"
    ))
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_forms() -> Result<()> {
        assert_eq!(
            SourceSpec::parse("camera:/dev/video2")?,
            SourceSpec::Camera {
                device: "/dev/video2".to_string()
            }
        );
        assert_eq!(
            SourceSpec::parse("file:clips/desk.mp4")?,
            SourceSpec::File {
                path: "clips/desk.mp4".to_string()
            }
        );
        assert!(SourceSpec::parse("stub://scene")?.is_synthetic());
        Ok(())
    }

    #[test]
    fn rejects_remote_and_malformed_sources() {
        assert!(SourceSpec::parse("file:rtsp://cam.local/stream").is_err());
        assert!(SourceSpec::parse("file:").is_err());
        assert!(SourceSpec::parse("camera:/etc/passwd").is_err());
        assert!(SourceSpec::parse("clip.mp4").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() -> Result<()> {
        let spec = SourceSpec::parse("camera:/dev/video0")?;
        assert_eq!(SourceSpec::parse(&spec.to_string())?, spec);
        Ok(())
    }

    #[test]
    fn opens_synthetic_source() -> Result<()> {
        let settings = SourceSettings {
            width: 64,
            height: 48,
            max_frames: Some(1),
            ..SourceSettings::default()
        };
        let mut source = VideoSource::open(&SourceSpec::parse("stub://empty")?, &settings)?;
        source.connect()?;
        assert!(source.is_healthy());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().source, "stub://empty");
        Ok(())
    }

    #[test]
    fn spec_serializes_with_kind_tag() -> Result<()> {
        let spec = SourceSpec::parse("camera:/dev/video0")?;
        let json = serde_json::to_value(&spec)?;
        assert_eq!(json["kind"], "camera");
        assert_eq!(json["device"], "/dev/video0");
        Ok(())
    }
}
