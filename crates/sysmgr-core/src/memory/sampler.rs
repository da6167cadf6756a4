//! Per-process memory sampling from `/proc/<pid>/status`.
//!
//! ```text
//! VmRSS:	    1234 kB
//! VmSwap:	       0 kB
//! ```
//!
//! Usage is `VmRSS + VmSwap`, normalized to megabytes. Units other than
//! `kB` and `mB` are taken to be bytes.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use super::MemorySampler;

/// Upper bound on a status file read.
const MAX_STATUS_FILE_SIZE: u64 = 64 * 1024;

/// Samples processes through procfs.
#[derive(Debug, Clone)]
pub struct ProcStatusSampler {
    proc_root: PathBuf,
}

impl Default for ProcStatusSampler {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcStatusSampler {
    /// Creates a sampler reading below `proc_root`.
    #[must_use]
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl MemorySampler for ProcStatusSampler {
    fn sample_mb(&self, pid: u32) -> Option<u64> {
        let path = self.proc_root.join(pid.to_string()).join("status");
        let file = File::open(path).ok()?;
        let mut content = String::new();
        file.take(MAX_STATUS_FILE_SIZE)
            .read_to_string(&mut content)
            .ok()?;
        parse_status_mb(&content)
    }
}

/// Extracts `VmRSS + VmSwap` in megabytes from a status file.
///
/// Returns `None` without a `VmRSS` line (kernel threads, zombies). A
/// missing `VmSwap` line counts as zero.
#[must_use]
pub fn parse_status_mb(content: &str) -> Option<u64> {
    let mut rss = None;
    let mut swap = 0;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            rss = Some(parse_amount_mb(rest)?);
        } else if let Some(rest) = line.strip_prefix("VmSwap:") {
            swap = parse_amount_mb(rest)?;
        }
    }
    rss.map(|rss: u64| rss.saturating_add(swap))
}

fn parse_amount_mb(field: &str) -> Option<u64> {
    let mut parts = field.split_whitespace();
    let value: u64 = parts.next()?.parse().ok()?;
    let mb = match parts.next() {
        Some(unit) if unit.eq_ignore_ascii_case("kb") => value / 1024,
        Some(unit) if unit.eq_ignore_ascii_case("mb") => value,
        _ => value / (1024 * 1024),
    };
    Some(mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tcalc\nState:\tS (sleeping)\nVmPeak:\t  300000 kB\n\
                          VmRSS:\t  102400 kB\nVmData:\t   20000 kB\nVmSwap:\t   10240 kB\n";

    #[test]
    fn test_parse_rss_plus_swap() {
        assert_eq!(parse_status_mb(STATUS), Some(110));
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_status_mb("VmRSS:\t 12 mB\nVmSwap:\t 3 mB\n"), Some(15));
        assert_eq!(parse_status_mb("VmRSS:\t 2097152\n"), Some(2));
    }

    #[test]
    fn test_missing_swap_counts_as_zero() {
        assert_eq!(parse_status_mb("VmRSS:\t 2048 kB\n"), Some(2));
    }

    #[test]
    fn test_missing_rss_is_none() {
        assert_eq!(parse_status_mb("Name:\tkthreadd\nState:\tS\n"), None);
        assert_eq!(parse_status_mb("VmRSS:\t garbage kB\n"), None);
    }

    #[test]
    fn test_sample_from_fake_proc_root() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("42")).unwrap();
        std::fs::write(root.path().join("42").join("status"), STATUS).unwrap();

        let sampler = ProcStatusSampler::new(root.path());
        assert_eq!(sampler.sample_mb(42), Some(110));
        assert_eq!(sampler.sample_mb(43), None);
    }

    #[test]
    fn test_sample_own_process() {
        let sampler = ProcStatusSampler::default();
        if std::path::Path::new("/proc/self/status").exists() {
            assert!(sampler.sample_mb(std::process::id()).is_some());
        }
    }
}
