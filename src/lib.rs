//! Zone Watch
//!
//! Per-person home zone monitoring on top of a frame-by-frame person detector.
//!
//! # Architecture
//!
//! Every frame flows through one synchronous pipeline:
//!
//! 1. **Ingest**: a camera, a video file or a synthetic scene yields RGB frames.
//! 2. **Detect**: the configured backend reports person boxes.
//! 3. **Track**: detections are associated with persons; each person observes
//!    for a fixed window, freezes a home zone and is then classified inside or
//!    outside that zone on every later frame.
//! 4. **Render**: boxes and zones are drawn green or red and JPEG-encoded.
//! 5. **Publish**: the browser polls the latest frame and status over HTTP.
//!
//! # Module Structure
//!
//! - `geometry`: axis-aligned boxes and the arithmetic the tracker needs
//! - `frame`: decoded RGB frames with capture timing
//! - `ingest`: frame sources (V4L2 cameras, ffmpeg files, synthetic scenes)
//! - `detect`: detector backends and the loader for the configured one
//! - `tracker`: identity association and home zone classification
//! - `render`: annotation and JPEG encoding
//! - `session`: the per-frame pipeline
//! - `api`: loopback HTTP server and session supervisor
//! - `config`: file and environment configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod render;
pub mod session;
pub mod tracker;

pub use api::{ApiConfig, ApiHandle, ApiServer, SessionState, StatusSnapshot, Supervisor};
pub use config::ZoneWatchConfig;
pub use detect::{Detection, DetectorBackend, ObjectClass, SharedBackend};
pub use frame::Frame;
pub use geometry::BoundingBox;
pub use ingest::{SourceSettings, SourceSpec, VideoSource};
pub use session::{
    EndReason, FrameSink, Session, SessionCommand, SessionFrame, SessionSettings, SessionSummary,
};
pub use tracker::{
    InsideRule, PersonId, PersonObservation, TrackerConfig, ZoneRule, ZoneStatus, ZoneTracker,
};
