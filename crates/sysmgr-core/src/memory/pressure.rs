//! System memory state from `/proc/meminfo`.

use std::path::Path;

use super::SystemMemoryState;
use crate::config::MemoryConfig;

/// Thresholds on `MemAvailable` that classify the system memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPressure {
    medium_mb: u64,
    low_mb: u64,
    critical_mb: u64,
}

impl MemoryPressure {
    /// Creates thresholds. Each is the available memory at or below which
    /// the state applies.
    #[must_use]
    pub const fn new(medium_mb: u64, low_mb: u64, critical_mb: u64) -> Self {
        Self {
            medium_mb,
            low_mb,
            critical_mb,
        }
    }

    /// Thresholds from the `[memory]` section.
    #[must_use]
    pub const fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            config.medium_available_mb,
            config.low_available_mb,
            config.critical_available_mb,
        )
    }

    /// Maps available memory to a state.
    #[must_use]
    pub const fn classify(&self, available_mb: u64) -> SystemMemoryState {
        if available_mb <= self.critical_mb {
            SystemMemoryState::Critical
        } else if available_mb <= self.low_mb {
            SystemMemoryState::Low
        } else if available_mb <= self.medium_mb {
            SystemMemoryState::Medium
        } else {
            SystemMemoryState::Normal
        }
    }

    /// Reads `MemAvailable` from a meminfo file and classifies it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read or has no
    /// `MemAvailable` line.
    pub fn read(&self, meminfo: &Path) -> std::io::Result<SystemMemoryState> {
        let content = std::fs::read_to_string(meminfo)?;
        let available = parse_mem_available_mb(&content).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "MemAvailable missing from meminfo",
            )
        })?;
        Ok(self.classify(available))
    }
}

/// Extracts `MemAvailable` in megabytes.
#[must_use]
pub fn parse_mem_available_mb(content: &str) -> Option<u64> {
    let line = content
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))?;
    let kb: u64 = line.split_whitespace().next()?.parse().ok()?;
    Some(kb / 1024)
}
