use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// COCO class index the detectors report for people.
pub const PERSON_CLASS_ID: u32 = 0;

/// A single frame's observation of an object.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box in frame pixel coordinates.
    pub bbox: BoundingBox,
    /// Detector score in 0..=1.
    pub confidence: f32,
    pub class: ObjectClass,
}

impl Detection {
    pub fn person(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            class: ObjectClass::Person,
        }
    }

    pub fn is_person(&self) -> bool {
        self.class == ObjectClass::Person
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Person,
    Other(u32),
}

impl ObjectClass {
    pub fn from_class_id(id: u32) -> Self {
        if id == PERSON_CLASS_ID {
            ObjectClass::Person
        } else {
            ObjectClass::Other(id)
        }
    }
}
