use std::cmp::Ordering;

use crate::geometry::BoundingBox;

/// Gates for pairing a detection with a known person.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MatchParams {
    pub min_iou: f32,
    /// Multiple of the person's last box diagonal.
    pub max_center_distance: f32,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    track: usize,
    detection: usize,
    iou: f32,
    distance: f32,
}

/// One-to-one pairing of tracks to detections.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Assignment {
    /// `(track, detection)` index pairs.
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Greedy association: best IoU first, then nearest center.
pub(crate) fn associate(
    tracks: &[BoundingBox],
    detections: &[BoundingBox],
    params: MatchParams,
) -> Assignment {
    let mut candidates = Vec::new();
    for (t, track) in tracks.iter().enumerate() {
        let limit = params.max_center_distance * track.diagonal();
        for (d, detection) in detections.iter().enumerate() {
            let iou = track.iou(detection);
            let distance = track.center_distance(detection);
            if iou >= params.min_iou || distance <= limit {
                candidates.push(Candidate {
                    track: t,
                    detection: d,
                    iou,
                    distance,
                });
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.iou
            .total_cmp(&a.iou)
            .then(a.distance.total_cmp(&b.distance))
            .then(a.track.cmp(&b.track))
            .then(a.detection.cmp(&b.detection))
    });
    greedy(tracks.len(), detections.len(), candidates)
}

/// Pair leftovers by nearest center.
///
/// A pair is only considered when the centers are at most `max_jump` times
/// the track's last box diagonal apart.
pub(crate) fn nearest(
    tracks: &[(usize, BoundingBox)],
    detections: &[(usize, BoundingBox)],
    max_jump: f32,
) -> Vec<(usize, usize)> {
    let mut candidates = Vec::new();
    for (track, track_box) in tracks {
        let limit = max_jump * track_box.diagonal();
        for (detection, detection_box) in detections {
            let distance = track_box.center_distance(detection_box);
            if distance > limit {
                continue;
            }
            candidates.push(Candidate {
                track: *track,
                detection: *detection,
                iou: 0.0,
                distance,
            });
        }
    }
    candidates.sort_by(|a, b| match a.distance.total_cmp(&b.distance) {
        Ordering::Equal => (a.track, a.detection).cmp(&(b.track, b.detection)),
        other => other,
    });

    let mut used_tracks = Vec::new();
    let mut used_detections = Vec::new();
    let mut matches = Vec::new();
    for c in candidates {
        if used_tracks.contains(&c.track) || used_detections.contains(&c.detection) {
            continue;
        }
        used_tracks.push(c.track);
        used_detections.push(c.detection);
        matches.push((c.track, c.detection));
    }
    matches
}

fn greedy(track_count: usize, detection_count: usize, candidates: Vec<Candidate>) -> Assignment {
    let mut track_used = vec![false; track_count];
    let mut detection_used = vec![false; detection_count];
    let mut assignment = Assignment::default();

    for c in candidates {
        if track_used[c.track] || detection_used[c.detection] {
            continue;
        }
        track_used[c.track] = true;
        detection_used[c.detection] = true;
        assignment.matches.push((c.track, c.detection));
    }

    assignment.unmatched_tracks = (0..track_count).filter(|t| !track_used[*t]).collect();
    assignment.unmatched_detections = (0..detection_count)
        .filter(|d| !detection_used[*d])
        .collect();
    assignment
}
