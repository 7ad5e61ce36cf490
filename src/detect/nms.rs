use crate::detect::result::Detection;

/// Greedy non-maximum suppression.
///
/// Keeps the highest-confidence detection of every group whose pairwise IoU
/// exceeds `iou_threshold`. The surviving detections are sorted by descending
/// confidence.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let candidate = detections[index];
        let suppressed = detections[..kept].iter().any(|prev| {
            prev.class == candidate.class && prev.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::ObjectClass;
    use crate::geometry::BoundingBox;

    #[test]
    fn overlapping_boxes_keep_the_most_confident() {
        let mut detections = vec![
            Detection::person(BoundingBox::new(0.0, 0.0, 100.0, 200.0), 0.6),
            Detection::person(BoundingBox::new(4.0, 2.0, 104.0, 202.0), 0.9),
            Detection::person(BoundingBox::new(300.0, 0.0, 400.0, 200.0), 0.5),
        ];
        non_max_suppression(&mut detections, 0.45);

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[1].confidence, 0.5);
    }

    #[test]
    fn different_classes_do_not_suppress_each_other() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let mut detections = vec![
            Detection::person(bbox, 0.8),
            Detection {
                bbox,
                confidence: 0.7,
                class: ObjectClass::Other(56),
            },
        ];
        non_max_suppression(&mut detections, 0.45);
        assert_eq!(detections.len(), 2);
    }
}
