mod backend;
pub mod backends;
mod nms;
mod result;

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::{DetectorBackend, SharedBackend};
pub use backends::{CpuBackend, StubBackend};
pub use nms::non_max_suppression;
pub use result::{Detection, ObjectClass, PERSON_CLASS_ID};

/// Load the configured backend and share it.
///
/// Model artifacts are loaded and warmed up here, once, before any session
/// starts. A backend that cannot report people is rejected.
pub fn build_detector(settings: &DetectorSettings) -> Result<SharedBackend> {
    match settings.backend.as_str() {
        "cpu" => share(CpuBackend::new()),
        "stub" => share(StubBackend::new()),
        "tract" => load_tract(settings),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}

fn share<B: DetectorBackend + 'static>(mut backend: B) -> Result<SharedBackend> {
    if !backend.supports(ObjectClass::Person) {
        return Err(anyhow!(
            "detector backend '{}' cannot detect people",
            backend.name()
        ));
    }
    backend.warm_up()?;
    log::info!("detector: using the {} backend", backend.name());
    Ok(Arc::new(Mutex::new(backend)))
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &DetectorSettings) -> Result<SharedBackend> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
    let backend = backends::TractBackend::new(model_path, settings.input_size)?
        .with_thresholds(settings.confidence, settings.iou);
    log::info!(
        "detector: loaded {} ({}x{} input)",
        model_path.display(),
        settings.input_size,
        settings.input_size
    );
    share(backend)
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &DetectorSettings) -> Result<SharedBackend> {
    Err(anyhow!(
        "the tract detector backend requires the backend-tract feature"
    ))
}

/// Keep person detections at or above `min_confidence`.
pub fn people(detections: Vec<Detection>, min_confidence: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.is_person() && d.confidence >= min_confidence)
        .collect()
}
