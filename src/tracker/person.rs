use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::geometry::BoundingBox;

use super::{InsideRule, TrackerConfig, ZoneRule};

/// Session-scoped identity of a tracked person. Assigned from 1 upward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub u64);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "person {}", self.0)
    }
}

/// Where a person stands relative to their home zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    /// Home zone not frozen yet.
    Observing,
    Inside,
    Outside,
}

impl ZoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneStatus::Observing => "observing",
            ZoneStatus::Inside => "inside",
            ZoneStatus::Outside => "outside",
        }
    }
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame result for one matched person.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonObservation {
    pub id: PersonId,
    /// Box detected on this frame.
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub home_zone: Option<BoundingBox>,
    pub status: ZoneStatus,
}

/// A person followed across frames for the length of one session.
///
/// The home zone is private and written once, so it cannot change after the
/// observation window closes.
#[derive(Clone, Debug)]
pub struct TrackedPerson {
    id: PersonId,
    first_seen: Duration,
    last_seen: Duration,
    last_box: BoundingBox,
    last_confidence: f32,
    samples: Vec<BoundingBox>,
    home_zone: Option<BoundingBox>,
    status: ZoneStatus,
    frames_seen: u64,
}

impl TrackedPerson {
    pub(crate) fn new(id: PersonId, detection: &Detection, elapsed: Duration) -> Self {
        Self {
            id,
            first_seen: elapsed,
            last_seen: elapsed,
            last_box: detection.bbox,
            last_confidence: detection.confidence,
            samples: Vec::new(),
            home_zone: None,
            status: ZoneStatus::Observing,
            frames_seen: 0,
        }
    }

    /// Record a matched detection and reclassify.
    pub(crate) fn observe(
        &mut self,
        detection: &Detection,
        elapsed: Duration,
        config: &TrackerConfig,
    ) -> ZoneStatus {
        self.last_seen = elapsed;
        self.last_box = detection.bbox;
        self.last_confidence = detection.confidence;
        self.frames_seen += 1;

        if self.home_zone.is_none() {
            self.samples.push(detection.bbox);
            if elapsed.saturating_sub(self.first_seen) >= config.observation_window {
                self.freeze(config.zone_rule, config.zone_margin);
            }
        }

        self.status = match &self.home_zone {
            Some(zone) => classify(zone, &detection.bbox, config.inside_rule),
            None => ZoneStatus::Observing,
        };
        self.status
    }

    fn freeze(&mut self, rule: ZoneRule, margin: f32) {
        if self.home_zone.is_some() {
            return;
        }
        let base = match rule {
            ZoneRule::Average => BoundingBox::average(&self.samples),
            ZoneRule::Union => self.samples.iter().copied().reduce(|acc, b| acc.union(&b)),
            ZoneRule::Latest => self.samples.last().copied(),
        }
        .unwrap_or(self.last_box);
        self.home_zone = Some(base.expand(margin));
    }

    pub fn id(&self) -> PersonId {
        self.id
    }

    pub fn last_seen(&self) -> Duration {
        self.last_seen
    }

    pub fn last_box(&self) -> BoundingBox {
        self.last_box
    }

    /// Boxes collected while the home zone was still open.
    pub fn samples(&self) -> &[BoundingBox] {
        &self.samples
    }

    pub fn home_zone(&self) -> Option<BoundingBox> {
        self.home_zone
    }

    pub fn status(&self) -> ZoneStatus {
        self.status
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn observation(&self) -> PersonObservation {
        PersonObservation {
            id: self.id,
            bbox: self.last_box,
            confidence: self.last_confidence,
            home_zone: self.home_zone,
            status: self.status,
        }
    }
}

/// Classify `bbox` against a frozen home zone.
pub fn classify(zone: &BoundingBox, bbox: &BoundingBox, rule: InsideRule) -> ZoneStatus {
    let inside = match rule {
        InsideRule::Contained => zone.contains(bbox),
        InsideRule::Overlap(min_fraction) => {
            if zone.contains(bbox) {
                true
            } else if bbox.area() <= 0.0 {
                let (cx, cy) = bbox.center();
                zone.contains_point(cx, cy)
            } else {
                bbox.intersection_area(zone) / bbox.area() >= min_fraction
            }
        }
    };
    if inside {
        ZoneStatus::Inside
    } else {
        ZoneStatus::Outside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(l: f32, t: f32, r: f32, b: f32) -> Detection {
        Detection::person(BoundingBox::new(l, t, r, b), 0.9)
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            zone_margin: 0.0,
            ..TrackerConfig::default()
        }
    }

    #[test]
    fn stays_observing_until_window_elapses() {
        let cfg = config();
        let d = det(0.0, 0.0, 10.0, 10.0);
        let mut person = TrackedPerson::new(PersonId(1), &d, Duration::ZERO);

        for ms in [0u64, 500, 1000, 1999] {
            let status = person.observe(&d, Duration::from_millis(ms), &cfg);
            assert_eq!(status, ZoneStatus::Observing);
            assert!(person.home_zone().is_none());
        }
        assert_eq!(
            person.observe(&d, Duration::from_millis(2000), &cfg),
            ZoneStatus::Inside
        );
        assert_eq!(person.samples().len(), 5);
    }

    #[test]
    fn zone_rules_shape_the_frozen_zone() {
        let a = det(0.0, 0.0, 10.0, 10.0);
        let b = det(4.0, 4.0, 14.0, 14.0);

        let freeze_with = |rule: ZoneRule| {
            let cfg = TrackerConfig {
                zone_rule: rule,
                ..config()
            };
            let mut person = TrackedPerson::new(PersonId(1), &a, Duration::ZERO);
            person.observe(&a, Duration::ZERO, &cfg);
            person.observe(&b, Duration::from_secs(2), &cfg);
            person.home_zone().expect("frozen")
        };

        assert_eq!(
            freeze_with(ZoneRule::Average),
            BoundingBox::new(2.0, 2.0, 12.0, 12.0)
        );
        assert_eq!(
            freeze_with(ZoneRule::Union),
            BoundingBox::new(0.0, 0.0, 14.0, 14.0)
        );
        assert_eq!(
            freeze_with(ZoneRule::Latest),
            BoundingBox::new(4.0, 4.0, 14.0, 14.0)
        );
    }

    #[test]
    fn home_zone_is_written_once() {
        let cfg = config();
        let d = det(0.0, 0.0, 10.0, 10.0);
        let mut person = TrackedPerson::new(PersonId(1), &d, Duration::ZERO);
        person.observe(&d, Duration::from_secs(2), &cfg);
        let frozen = person.home_zone();

        person.observe(&det(50.0, 50.0, 60.0, 60.0), Duration::from_secs(3), &cfg);
        person.freeze(ZoneRule::Latest, 0.5);
        assert_eq!(person.home_zone(), frozen);
        assert_eq!(person.samples().len(), 1);
    }

    #[test]
    fn overlap_rule_accepts_partial_drift() {
        let zone = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let shifted = BoundingBox::new(10.0, 0.0, 110.0, 100.0);
        assert_eq!(
            classify(&zone, &shifted, InsideRule::Contained),
            ZoneStatus::Outside
        );
        assert_eq!(
            classify(&zone, &shifted, InsideRule::Overlap(0.8)),
            ZoneStatus::Inside
        );
        assert_eq!(
            classify(&zone, &shifted, InsideRule::Overlap(0.95)),
            ZoneStatus::Outside
        );
    }

    #[test]
    fn disjoint_box_is_outside_under_every_rule() {
        let zone = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let away = BoundingBox::new(200.0, 200.0, 300.0, 300.0);
        for rule in [InsideRule::Contained, InsideRule::Overlap(0.01)] {
            assert_eq!(classify(&zone, &away, rule), ZoneStatus::Outside);
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ZoneStatus::Outside).unwrap(),
            "\"outside\""
        );
    }
}
