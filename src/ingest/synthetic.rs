//! Synthetic `stub://` scenes.
//!
//! Actors are painted as bright rectangles on a dark background, which the cpu
//! detector backend reports as people. Time advances by `1 / target_fps` per
//! frame, so runs are reproducible regardless of wall-clock speed. Brightness
//! flickers per frame from a seeded generator.

use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{SourceSettings, SourceStats};
use crate::frame::{rgb_len, Frame};
use crate::geometry::BoundingBox;

/// One painted figure. Coordinates are fractions of the frame size.
#[derive(Clone, Debug, PartialEq)]
pub struct Actor {
    pub start: BoundingBox,
    /// When the actor starts moving, if ever.
    pub walk_after: Option<Duration>,
    /// Fractions of the frame size per second.
    pub velocity: (f32, f32),
}

impl Actor {
    pub fn still(start: BoundingBox) -> Self {
        Self {
            start,
            walk_after: None,
            velocity: (0.0, 0.0),
        }
    }

    pub fn walking(start: BoundingBox, walk_after: Duration, velocity: (f32, f32)) -> Self {
        Self {
            start,
            walk_after: Some(walk_after),
            velocity,
        }
    }

    /// Position in pixels at `elapsed`, unclipped.
    pub fn position(&self, elapsed: Duration, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f32, height as f32);
        let moving = match self.walk_after {
            Some(after) => elapsed.saturating_sub(after).as_secs_f32(),
            None => 0.0,
        };
        let dx = self.velocity.0 * moving;
        let dy = self.velocity.1 * moving;
        BoundingBox::new(
            ((self.start.left + dx) * w).round(),
            ((self.start.top + dy) * h).round(),
            ((self.start.right + dx) * w).round(),
            ((self.start.bottom + dy) * h).round(),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Scene {
    pub actors: Vec<Actor>,
}

impl Scene {
    /// One person sitting still and one who walks right after four seconds.
    pub fn seated_and_walker() -> Self {
        Self {
            actors: vec![
                Actor::still(BoundingBox::new(0.125, 0.2, 0.3125, 0.85)),
                Actor::walking(
                    BoundingBox::new(0.6, 0.3, 0.75, 0.85),
                    Duration::from_secs(4),
                    (0.0625, 0.0),
                ),
            ],
        }
    }

    /// Resolve a `stub://<name>` scene.
    pub fn named(name: &str) -> Result<Self> {
        match name {
            "" | "scene" | "demo" | "default" => Ok(Self::seated_and_walker()),
            "still" => Ok(Self {
                actors: vec![Actor::still(BoundingBox::new(0.125, 0.2, 0.3125, 0.85))],
            }),
            "empty" => Ok(Self { actors: Vec::new() }),
            other => Err(anyhow!("unknown synthetic scene '{}'", other)),
        }
    }
}

pub struct SyntheticSource {
    name: String,
    scene: Scene,
    settings: SourceSettings,
    rng: StdRng,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(uri: &str, settings: SourceSettings) -> Result<Self> {
        let name = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic sources use stub:// paths, got '{}'", uri))?;
        let scene = Scene::named(name.trim_matches('/'))?;
        Ok(Self::with_scene(uri, scene, settings))
    }

    pub fn with_scene(uri: &str, scene: Scene, settings: SourceSettings) -> Self {
        Self {
            name: uri.to_string(),
            rng: StdRng::seed_from_u64(settings.seed),
            scene,
            settings,
            frame_count: 0,
            connected: false,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps)",
            self.name,
            self.settings.width,
            self.settings.height,
            self.settings.target_fps
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} not connected", self.name));
        }
        if let Some(limit) = self.settings.max_frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }

        let index = self.frame_count;
        let fps = self.settings.target_fps.max(1) as f64;
        let elapsed = Duration::from_secs_f64(index as f64 / fps);
        let pixels = self.paint(elapsed);
        self.frame_count += 1;
        Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
            index,
            elapsed,
        )
        .map(Some)
    }

    fn paint(&mut self, elapsed: Duration) -> Vec<u8> {
        let (width, height) = (self.settings.width, self.settings.height);
        let background = self.rng.gen_range(20u8..=40);
        let mut pixels = vec![background; rgb_len(width, height)];

        for actor in &self.scene.actors {
            let shade = self.rng.gen_range(235u8..=255);
            let bbox = actor.position(elapsed, width, height).clamp_to(width, height);
            let (left, top) = (bbox.left as usize, bbox.top as usize);
            let (right, bottom) = (bbox.right as usize, bbox.bottom as usize);
            for y in top..bottom {
                let row = y * width as usize;
                for x in left..right {
                    let idx = (row + x) * 3;
                    pixels[idx..idx + 3].fill(shade);
                }
            }
        }
        pixels
    }

    pub fn is_healthy(&self) -> bool {
        self.connected
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.name.clone(),
        }
    }
}
