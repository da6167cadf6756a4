use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::Marker;
use crate::config::PathsConfig;

/// Locations of the boot marker files.
#[derive(Debug, Clone)]
pub struct MarkerFiles {
    first_use: PathBuf,
    profile: PathBuf,
}

impl MarkerFiles {
    /// Markers at explicit paths.
    #[must_use]
    pub const fn new(first_use: PathBuf, profile: PathBuf) -> Self {
        Self { first_use, profile }
    }

    /// Markers from the `[paths]` section.
    #[must_use]
    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(paths.first_use_marker_path(), paths.profile_marker_path())
    }

    /// Path of one marker.
    #[must_use]
    pub fn path(&self, marker: Marker) -> &Path {
        match marker {
            Marker::FirstUseDone => &self.first_use,
            Marker::ProfileCreated => &self.profile,
        }
    }

    /// Whether a marker exists.
    #[must_use]
    pub fn present(&self, marker: Marker) -> bool {
        self.path(marker).exists()
    }
}

/// The file whose presence lets the device suspend.
///
/// Only the device hardware profile manages it; on other profiles every
/// call is a no-op.
#[derive(Debug, Clone)]
pub struct SuspendMarker {
    path: PathBuf,
    managed: bool,
}

impl SuspendMarker {
    /// Creates a handle. `managed` is false for emulator and desktop.
    #[must_use]
    pub const fn new(path: PathBuf, managed: bool) -> Self {
        Self { path, managed }
    }

    /// Creates or removes the file. Errors are logged.
    pub fn set(&self, allowed: bool) {
        if !self.managed {
            return;
        }

        let result = if allowed {
            self.path
                .parent()
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|()| std::fs::write(&self.path, b""))
        } else {
            match std::fs::remove_file(&self.path) {
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        };

        match result {
            Ok(()) => debug!(path = %self.path.display(), allowed, "suspend marker updated"),
            Err(error) => {
                warn!(path = %self.path.display(), allowed, %error, "failed to update suspend marker");
            },
        }
    }

    /// Whether the file currently exists.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_presence() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            preferences_dir: dir.path().to_path_buf(),
            ..PathsConfig::default()
        };
        let markers = MarkerFiles::from_config(&paths);

        assert!(!markers.present(Marker::FirstUseDone));
        std::fs::write(dir.path().join("ran-first-use"), b"").unwrap();
        assert!(markers.present(Marker::FirstUseDone));
        assert!(!markers.present(Marker::ProfileCreated));
    }

    #[test]
    fn test_suspend_marker_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SuspendMarker::new(dir.path().join("run").join("suspend-allowed"), true);

        marker.set(true);
        assert!(marker.is_set());
        marker.set(true);
        assert!(marker.is_set());
        marker.set(false);
        assert!(!marker.is_set());
        marker.set(false);
        assert!(!marker.is_set());
    }

    #[test]
    fn test_unmanaged_suspend_marker_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SuspendMarker::new(dir.path().join("suspend-allowed"), false);
        marker.set(true);
        assert!(!marker.is_set());
    }
}
