use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};

/// Stub backend for testing. Replays scripted detection sets, one per frame.
///
/// Once the script is exhausted every call returns no detections.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Vec<Detection>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, class: ObjectClass) -> bool {
        matches!(class, ObjectClass::Person)
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    #[test]
    fn stub_backend_replays_script_then_goes_quiet() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 20.0);
        let mut backend = StubBackend::with_script(vec![
            vec![Detection::person(bbox, 0.8)],
            vec![],
            vec![Detection::person(bbox, 0.7)],
        ]);

        assert_eq!(backend.detect(&[], 0, 0).unwrap().len(), 1);
        assert!(backend.detect(&[], 0, 0).unwrap().is_empty());
        assert_eq!(backend.detect(&[], 0, 0).unwrap()[0].confidence, 0.7);
        assert!(backend.detect(&[], 0, 0).unwrap().is_empty());
    }
}
