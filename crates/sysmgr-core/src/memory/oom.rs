use std::path::Path;

use tracing::{info, warn};

/// Exempts the process rooted at `proc_self` (normally `/proc/self`) from the
/// kernel OOM killer.
///
/// Writes `-1000` to `oom_score_adj`, falling back to `-17` in the legacy
/// `oom_adj`. Returns whether either write succeeded.
pub fn protect_from_oom_killer(proc_self: &Path) -> bool {
    let score_adj = proc_self.join("oom_score_adj");
    if score_adj.exists() {
        match std::fs::write(&score_adj, "-1000") {
            Ok(()) => {
                info!(path = %score_adj.display(), "protected from the OOM killer");
                return true;
            },
            Err(error) => warn!(path = %score_adj.display(), %error, "failed to set oom_score_adj"),
        }
    }

    let legacy = proc_self.join("oom_adj");
    if legacy.exists() {
        match std::fs::write(&legacy, "-17") {
            Ok(()) => {
                info!(path = %legacy.display(), "protected from the OOM killer (legacy)");
                return true;
            },
            Err(error) => warn!(path = %legacy.display(), %error, "failed to set oom_adj"),
        }
    }

    warn!("neither oom_score_adj nor oom_adj is available");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_score_adj() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("oom_score_adj"), "0").unwrap();
        std::fs::write(dir.path().join("oom_adj"), "0").unwrap();

        assert!(protect_from_oom_killer(dir.path()));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("oom_score_adj")).unwrap(),
            "-1000"
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("oom_adj")).unwrap(), "0");
    }

    #[test]
    fn test_falls_back_to_legacy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("oom_adj"), "0").unwrap();

        assert!(protect_from_oom_killer(dir.path()));
        assert_eq!(std::fs::read_to_string(dir.path().join("oom_adj")).unwrap(), "-17");
    }

    #[test]
    fn test_neither_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!protect_from_oom_killer(dir.path()));
    }
}
