//! Per-person home zones.
//!
//! Every person first seen on a frame is observed for a short window. When the
//! window closes their collected boxes are frozen into a home zone, and from then
//! on each detection of that person is classified inside or outside of it.

mod matching;
mod person;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::geometry::BoundingBox;

use matching::{associate, nearest, MatchParams};

pub use person::{classify, PersonId, PersonObservation, TrackedPerson, ZoneStatus};

pub const DEFAULT_OBSERVATION_WINDOW: Duration = Duration::from_secs(2);
pub const DEFAULT_LOST_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MATCH_IOU: f32 = 0.3;
pub const DEFAULT_MAX_CENTER_DISTANCE: f32 = 0.5;
pub const DEFAULT_MAX_JUMP_DISTANCE: f32 = 3.0;
pub const DEFAULT_ZONE_MARGIN: f32 = 0.05;

/// How the observation-window boxes become a home zone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneRule {
    #[default]
    Average,
    Union,
    Latest,
}

/// When a detection counts as inside its home zone.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum InsideRule {
    /// Every corner within the zone, edges inclusive.
    #[default]
    Contained,
    /// At least this fraction of the detection's area within the zone.
    Overlap(f32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    pub observation_window: Duration,
    /// Persons unmatched for longer than this are dropped.
    pub lost_timeout: Duration,
    pub match_iou: f32,
    pub max_center_distance: f32,
    /// Pair leftover detections with persons seen on the previous frame.
    pub follow_jumps: bool,
    /// Longest followed jump, as a multiple of the person's last box diagonal.
    pub max_jump_distance: f32,
    pub zone_margin: f32,
    pub zone_rule: ZoneRule,
    pub inside_rule: InsideRule,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            observation_window: DEFAULT_OBSERVATION_WINDOW,
            lost_timeout: DEFAULT_LOST_TIMEOUT,
            match_iou: DEFAULT_MATCH_IOU,
            max_center_distance: DEFAULT_MAX_CENTER_DISTANCE,
            follow_jumps: true,
            max_jump_distance: DEFAULT_MAX_JUMP_DISTANCE,
            zone_margin: DEFAULT_ZONE_MARGIN,
            zone_rule: ZoneRule::Average,
            inside_rule: InsideRule::Contained,
        }
    }
}

impl TrackerConfig {
    fn match_params(&self) -> MatchParams {
        MatchParams {
            min_iou: self.match_iou,
            max_center_distance: self.max_center_distance,
        }
    }
}

/// Owns every tracked person of one session.
#[derive(Debug)]
pub struct ZoneTracker {
    config: TrackerConfig,
    persons: Vec<TrackedPerson>,
    next_id: u64,
    last_frame: Option<Duration>,
}

impl ZoneTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            persons: Vec::new(),
            next_id: 1,
            last_frame: None,
        }
    }

    /// Match, update and classify one frame's detections.
    ///
    /// Returns one observation per detection, in input order. A frame without
    /// detections changes nothing.
    pub fn ingest_frame(
        &mut self,
        detections: &[Detection],
        elapsed: Duration,
    ) -> Vec<PersonObservation> {
        if detections.is_empty() {
            return Vec::new();
        }
        self.prune(elapsed);

        let owners = self.assign(detections);
        let mut observations = Vec::with_capacity(detections.len());
        for (detection, owner) in detections.iter().zip(owners) {
            let index = match owner {
                Some(index) => index,
                None => self.spawn(detection, elapsed),
            };
            let person = &mut self.persons[index];
            let before = person.status();
            let status = person.observe(detection, elapsed, &self.config);
            if status != before {
                log_transition(person, before);
            }
            observations.push(person.observation());
        }
        self.last_frame = Some(elapsed);
        observations
    }

    /// Forget everyone and restart ids at 1.
    pub fn reset(&mut self) {
        self.persons.clear();
        self.next_id = 1;
        self.last_frame = None;
    }

    pub fn persons(&self) -> &[TrackedPerson] {
        &self.persons
    }

    pub fn person(&self, id: PersonId) -> Option<&TrackedPerson> {
        self.persons.iter().find(|p| p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    fn prune(&mut self, elapsed: Duration) {
        let timeout = self.config.lost_timeout;
        self.persons.retain(|p| {
            let keep = elapsed.saturating_sub(p.last_seen()) <= timeout;
            if !keep {
                log::debug!("tracker: dropping {} (unseen since {:?})", p.id(), p.last_seen());
            }
            keep
        });
    }

    /// Owning person index for each detection; `None` means a new person.
    fn assign(&self, detections: &[Detection]) -> Vec<Option<usize>> {
        let tracks: Vec<BoundingBox> = self.persons.iter().map(|p| p.last_box()).collect();
        let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox).collect();
        let assignment = associate(&tracks, &boxes, self.config.match_params());

        let mut owners = vec![None; detections.len()];
        for (track, detection) in &assignment.matches {
            owners[*detection] = Some(*track);
        }

        if self.config.follow_jumps {
            if let Some(previous) = self.last_frame {
                let recent: Vec<(usize, BoundingBox)> = assignment
                    .unmatched_tracks
                    .iter()
                    .filter(|t| self.persons[**t].last_seen() == previous)
                    .map(|t| (*t, tracks[*t]))
                    .collect();
                let leftover: Vec<(usize, BoundingBox)> = assignment
                    .unmatched_detections
                    .iter()
                    .map(|d| (*d, boxes[*d]))
                    .collect();
                let jumps = nearest(&recent, &leftover, self.config.max_jump_distance);
                for (track, detection) in jumps {
                    owners[detection] = Some(track);
                }
            }
        }
        owners
    }

    fn spawn(&mut self, detection: &Detection, elapsed: Duration) -> usize {
        let id = PersonId(self.next_id);
        self.next_id += 1;
        log::debug!("tracker: new {} at {:?}", id, elapsed);
        self.persons.push(TrackedPerson::new(id, detection, elapsed));
        self.persons.len() - 1
    }
}

impl Default for ZoneTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

fn log_transition(person: &TrackedPerson, before: ZoneStatus) {
    match (before, person.status()) {
        (ZoneStatus::Observing, status) => {
            if let Some(zone) = person.home_zone() {
                log::info!(
                    "tracker: {} home zone frozen at ({:.0},{:.0})-({:.0},{:.0}), {}",
                    person.id(),
                    zone.left,
                    zone.top,
                    zone.right,
                    zone.bottom,
                    status
                );
            }
        }
        (_, ZoneStatus::Outside) => log::warn!("tracker: {} left their home zone", person.id()),
        (_, ZoneStatus::Inside) => log::info!("tracker: {} back in their home zone", person.id()),
        (_, ZoneStatus::Observing) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(l: f32, t: f32, r: f32, b: f32) -> Detection {
        Detection::person(BoundingBox::new(l, t, r, b), 0.9)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn empty_frame_leaves_state_untouched() {
        let mut tracker = ZoneTracker::default();
        tracker.ingest_frame(&[det(0.0, 0.0, 10.0, 20.0)], ms(0));

        assert!(tracker.ingest_frame(&[], ms(60_000)).is_empty());
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.persons()[0].last_seen(), ms(0));
        assert_eq!(tracker.persons()[0].frames_seen(), 1);
    }

    #[test]
    fn one_observation_per_detection_in_input_order() {
        let mut tracker = ZoneTracker::default();
        let frame = [det(0.0, 0.0, 50.0, 100.0), det(400.0, 0.0, 450.0, 100.0)];
        let first = tracker.ingest_frame(&frame, ms(0));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, PersonId(1));
        assert_eq!(first[1].id, PersonId(2));

        let swapped = [frame[1], frame[0]];
        let second = tracker.ingest_frame(&swapped, ms(100));
        assert_eq!(second[0].id, PersonId(2));
        assert_eq!(second[1].id, PersonId(1));
        assert_eq!(second[0].bbox, frame[1].bbox);
    }

    #[test]
    fn zero_window_freezes_on_first_sight() {
        let mut tracker = ZoneTracker::new(TrackerConfig {
            observation_window: Duration::ZERO,
            ..TrackerConfig::default()
        });
        let out = tracker.ingest_frame(&[det(10.0, 10.0, 20.0, 30.0)], ms(0));
        assert_eq!(out[0].status, ZoneStatus::Inside);
        assert!(out[0].home_zone.is_some());
    }

    #[test]
    fn lost_person_is_replaced_by_a_new_identity() {
        let mut tracker = ZoneTracker::default();
        tracker.ingest_frame(&[det(0.0, 0.0, 50.0, 100.0)], ms(0));

        let out = tracker.ingest_frame(&[det(0.0, 0.0, 50.0, 100.0)], ms(3_500));
        assert_eq!(out[0].id, PersonId(2));
        assert_eq!(out[0].status, ZoneStatus::Observing);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn brief_absence_keeps_identity() {
        let mut tracker = ZoneTracker::default();
        tracker.ingest_frame(&[det(0.0, 0.0, 50.0, 100.0)], ms(0));
        let out = tracker.ingest_frame(&[det(2.0, 0.0, 52.0, 100.0)], ms(2_500));
        assert_eq!(out[0].id, PersonId(1));
        assert_eq!(out[0].status, ZoneStatus::Inside);
    }

    #[test]
    fn jump_without_follow_spawns_new_person() {
        let mut tracker = ZoneTracker::new(TrackerConfig {
            follow_jumps: false,
            ..TrackerConfig::default()
        });
        tracker.ingest_frame(&[det(100.0, 100.0, 200.0, 300.0)], ms(0));
        let out = tracker.ingest_frame(&[det(400.0, 400.0, 500.0, 600.0)], ms(500));
        assert_eq!(out[0].id, PersonId(2));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn reset_restarts_ids() {
        let mut tracker = ZoneTracker::default();
        tracker.ingest_frame(&[det(0.0, 0.0, 5.0, 5.0)], ms(0));
        tracker.reset();
        assert!(tracker.is_empty());
        let out = tracker.ingest_frame(&[det(300.0, 0.0, 305.0, 5.0)], ms(10));
        assert_eq!(out[0].id, PersonId(1));
    }

    #[test]
    fn newcomer_far_away_does_not_take_over_a_settled_identity() {
        let mut tracker = ZoneTracker::default();
        let seated = det(100.0, 100.0, 200.0, 300.0);
        let newcomer = det(1000.0, 100.0, 1100.0, 300.0);
        for frame in 0..=20u64 {
            tracker.ingest_frame(&[seated], ms(frame * 100));
        }

        // The seated person is missed for one frame while someone enters far away.
        let out = tracker.ingest_frame(&[newcomer], ms(2_100));
        assert_eq!(out[0].id, PersonId(2));
        assert_eq!(out[0].status, ZoneStatus::Observing);

        let out = tracker.ingest_frame(&[seated, newcomer], ms(2_200));
        assert_eq!(out[0].id, PersonId(1));
        assert_eq!(out[0].status, ZoneStatus::Inside);
        assert_eq!(out[1].id, PersonId(2));
        assert_eq!(out[1].status, ZoneStatus::Observing);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn jump_within_limit_keeps_identity() {
        let mut tracker = ZoneTracker::default();
        for frame in 0..=20u64 {
            tracker.ingest_frame(&[det(100.0, 100.0, 200.0, 300.0)], ms(frame * 100));
        }
        let out = tracker.ingest_frame(&[det(500.0, 100.0, 600.0, 300.0)], ms(2_100));
        assert_eq!(out[0].id, PersonId(1));
        assert_eq!(out[0].status, ZoneStatus::Outside);
    }
}
