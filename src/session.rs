//! One monitoring session: pull frame, detect, track, render, publish.
//!
//! A `Session` owns its source, its tracker and its annotator; the detector is
//! shared across sessions and locked once per frame. Processing is
//! synchronous, so one frame is fully handled before the next is pulled, and a
//! stop request is honoured between frames.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Serialize, Serializer};

use crate::config::ZoneWatchConfig;
use crate::detect::{self, SharedBackend};
use crate::ingest::{SourceSettings, SourceSpec, VideoSource};
use crate::render::{encode_jpeg, Annotator};
use crate::tracker::{PersonObservation, TrackerConfig, ZoneStatus, ZoneTracker};

/// Control messages from the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    Start(SourceSpec),
    Stop,
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub source: SourceSettings,
    pub tracker: TrackerConfig,
    pub min_confidence: f32,
    /// Produce annotated JPEG frames.
    pub render: bool,
    pub jpeg_quality: u8,
    pub thickness: u32,
    /// Sleep to hold `target_fps`; off for batch replays.
    pub pace: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ZoneWatchConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &ZoneWatchConfig) -> Self {
        Self {
            source: config.source.clone(),
            tracker: config.tracker.clone(),
            min_confidence: config.detector.confidence,
            render: true,
            jpeg_quality: config.render.jpeg_quality,
            thickness: config.render.thickness,
            pace: true,
        }
    }
}

/// Everything published for one processed frame.
#[derive(Clone, Debug, Serialize)]
pub struct SessionFrame {
    pub index: u64,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub width: u32,
    pub height: u32,
    pub observations: Vec<PersonObservation>,
    #[serde(skip)]
    pub jpeg: Option<Vec<u8>>,
}

impl SessionFrame {
    pub fn outside_count(&self) -> usize {
        self.observations
            .iter()
            .filter(|o| o.status == ZoneStatus::Outside)
            .count()
    }
}

fn as_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Receives every processed frame.
pub trait FrameSink {
    fn publish(&mut self, frame: &SessionFrame) -> Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(&SessionFrame) -> Result<()>,
{
    fn publish(&mut self, frame: &SessionFrame) -> Result<()> {
        self(frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    SourceEnded,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub frames: u64,
    /// Identities created during the session.
    pub persons_seen: u64,
    /// Observations classified outside, summed over all frames.
    pub outside_observations: u64,
    pub ended: EndReason,
}

pub struct Session {
    spec: SourceSpec,
    source: VideoSource,
    detector: SharedBackend,
    tracker: ZoneTracker,
    annotator: Annotator,
    settings: SessionSettings,
    frames: u64,
    persons_seen: u64,
    outside_observations: u64,
}

impl Session {
    /// Open and connect the source and start with an empty tracker.
    pub fn new(
        spec: SourceSpec,
        settings: &SessionSettings,
        detector: SharedBackend,
    ) -> Result<Self> {
        let mut source = VideoSource::open(&spec, &settings.source)
            .with_context(|| format!("open source {}", spec))?;
        source
            .connect()
            .with_context(|| format!("connect source {}", spec))?;
        log::info!("session: started on {}", spec);
        Ok(Self {
            spec,
            source,
            detector,
            tracker: ZoneTracker::new(settings.tracker.clone()),
            annotator: Annotator::new(settings.thickness),
            settings: settings.clone(),
            frames: 0,
            persons_seen: 0,
            outside_observations: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Process one frame; `None` once the source has ended.
    pub fn step(&mut self) -> Result<Option<SessionFrame>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };

        let detections = {
            let mut backend = self
                .detector
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            backend
                .detect(frame.pixels(), frame.width, frame.height)
                .with_context(|| format!("detect on frame {}", frame.index))?
        };
        let people = detect::people(detections, self.settings.min_confidence);
        let observations = self.tracker.ingest_frame(&people, frame.elapsed);

        self.frames += 1;
        let newest = observations.iter().map(|o| o.id.0).max().unwrap_or(0);
        self.persons_seen = self.persons_seen.max(newest);

        let (index, elapsed) = (frame.index, frame.elapsed);
        let (width, height) = (frame.width, frame.height);
        let jpeg = if self.settings.render {
            let mut image = frame.into_image()?;
            self.annotator.annotate(&mut image, &observations);
            Some(encode_jpeg(&image, self.settings.jpeg_quality)?)
        } else {
            None
        };

        let processed = SessionFrame {
            index,
            elapsed,
            width,
            height,
            observations,
            jpeg,
        };
        self.outside_observations += processed.outside_count() as u64;
        Ok(Some(processed))
    }

    /// Run until the source ends or `stop` returns true.
    pub fn run(
        &mut self,
        sink: &mut dyn FrameSink,
        stop: &dyn Fn() -> bool,
    ) -> Result<SessionSummary> {
        let interval = self.frame_interval();
        let ended = loop {
            if stop() {
                break EndReason::Stopped;
            }
            let started = Instant::now();
            let Some(frame) = self.step()? else {
                break EndReason::SourceEnded;
            };
            sink.publish(&frame)?;

            if let Some(interval) = interval {
                if let Some(rest) = interval.checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
            }
        };

        let summary = self.summary(ended);
        let stats = self.source.stats();
        log::debug!(
            "session: {} captured {} frames, healthy: {}",
            stats.source,
            stats.frames_captured,
            self.source.is_healthy()
        );
        log::info!(
            "session: {} finished ({:?}) after {} frames, {} persons",
            self.spec,
            summary.ended,
            summary.frames,
            summary.persons_seen
        );
        Ok(summary)
    }

    pub fn summary(&self, ended: EndReason) -> SessionSummary {
        SessionSummary {
            frames: self.frames,
            persons_seen: self.persons_seen,
            outside_observations: self.outside_observations,
            ended,
        }
    }

    fn frame_interval(&self) -> Option<Duration> {
        if !self.settings.pace || self.settings.source.target_fps == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            1.0 / self.settings.source.target_fps as f64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, StubBackend};
    use crate::geometry::BoundingBox;
    use std::sync::{Arc, Mutex};

    fn settings(frames: u64) -> SessionSettings {
        SessionSettings {
            source: SourceSettings {
                width: 64,
                height: 48,
                max_frames: Some(frames),
                ..SourceSettings::default()
            },
            pace: false,
            ..SessionSettings::default()
        }
    }

    fn scripted(script: Vec<Vec<Detection>>) -> SharedBackend {
        Arc::new(Mutex::new(StubBackend::with_script(script)))
    }

    #[test]
    fn step_filters_weak_detections() -> Result<()> {
        let bbox = BoundingBox::new(4.0, 4.0, 20.0, 40.0);
        let backend = scripted(vec![vec![
            Detection::person(bbox, 0.9),
            Detection::person(BoundingBox::new(40.0, 4.0, 60.0, 40.0), 0.05),
        ]]);
        let spec = SourceSpec::parse("stub://empty")?;
        let mut session = Session::new(spec, &settings(2), backend)?;

        let first = session.step()?.expect("frame");
        assert_eq!(first.observations.len(), 1);
        assert_eq!(first.observations[0].bbox, bbox);
        assert!(first.jpeg.is_some());

        let second = session.step()?.expect("frame");
        assert!(second.observations.is_empty());
        assert!(session.step()?.is_none());
        Ok(())
    }

    #[test]
    fn run_stops_when_asked() -> Result<()> {
        let mut session = Session::new(
            SourceSpec::parse("stub://empty")?,
            &settings(1_000),
            scripted(Vec::new()),
        )?;
        let mut published = 0u64;
        let mut sink = |_: &SessionFrame| -> Result<()> {
            published += 1;
            Ok(())
        };
        let count = std::cell::Cell::new(0u32);
        let summary = session.run(&mut sink, &|| {
            count.set(count.get() + 1);
            count.get() > 5
        })?;

        assert_eq!(summary.ended, EndReason::Stopped);
        assert_eq!(summary.frames, 5);
        assert_eq!(published, 5);
        Ok(())
    }

    #[test]
    fn frame_json_uses_millis() -> Result<()> {
        let frame = SessionFrame {
            index: 3,
            elapsed: Duration::from_millis(300),
            width: 10,
            height: 10,
            observations: Vec::new(),
            jpeg: Some(vec![1, 2, 3]),
        };
        let json = serde_json::to_value(&frame)?;
        assert_eq!(json["elapsed_ms"], 300);
        assert!(json.get("jpeg").is_none());
        Ok(())
    }
}
