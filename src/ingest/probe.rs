use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Number of `/dev/videoN` nodes probed.
pub const PROBED_DEVICES: u32 = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    pub index: u32,
    pub device: String,
}

/// Camera device nodes present on this machine, `/dev/video0` through `/dev/video9`.
pub fn available_cameras() -> Vec<CameraInfo> {
    probe_under(Path::new("/dev"))
}

fn probe_under(root: &Path) -> Vec<CameraInfo> {
    (0..PROBED_DEVICES)
        .filter_map(|index| {
            let path = root.join(format!("video{}", index));
            path.exists().then(|| CameraInfo {
                index,
                device: path.to_string_lossy().into_owned(),
            })
        })
        .collect()
}

/// Accepts `/dev/videoN` and the stable `/dev/v4l/by-id|by-path` links.
pub fn is_valid_device_path(device: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^/dev/(video[0-9]{1,3}|v4l/by-(id|path)/[A-Za-z0-9._:-]+)$").ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(device))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_device_paths() {
        assert!(is_valid_device_path("/dev/video0"));
        assert!(is_valid_device_path("/dev/video12"));
        assert!(is_valid_device_path(
            "/dev/v4l/by-id/usb-Logitech_C920-video-index0"
        ));
        assert!(!is_valid_device_path("/dev/video"));
        assert!(!is_valid_device_path("/dev/sda"));
        assert!(!is_valid_device_path("/dev/video0/../sda"));
    }

    #[test]
    fn probes_only_existing_nodes() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("video0"), b"")?;
        std::fs::write(dir.path().join("video3"), b"")?;
        std::fs::write(dir.path().join("video42"), b"")?;

        let found = probe_under(dir.path());
        let indices: Vec<u32> = found.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 3]);
        assert!(found[1].device.ends_with("video3"));
        Ok(())
    }
}
