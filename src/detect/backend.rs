use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::result::{Detection, ObjectClass};

/// A loaded backend shared by every session of the process.
///
/// Wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Detector backend trait.
///
/// A backend receives one RGB24 frame at a time and returns the objects it
/// found, in frame pixel coordinates. Backends are loaded once at startup and
/// reused across sessions, so `detect` must not carry per-session state that
/// changes its answers.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can report objects of `class`.
    fn supports(&self, class: ObjectClass) -> bool;

    /// Run detection on a frame.
    ///
    /// `pixels` is tightly packed RGB24, `width * height * 3` bytes.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
