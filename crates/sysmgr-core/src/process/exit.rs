use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;

/// How a native process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code zero.
    Clean,
    /// Non-zero exit code.
    Error(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// Neither code nor signal was reported.
    Unknown,
}

impl ExitKind {
    /// Classifies an exit status.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(0), _) => Self::Clean,
            (Some(code), _) => Self::Error(code),
            (None, Some(signal)) => Self::Signal(signal),
            (None, None) => Self::Unknown,
        }
    }

    /// Whether the process exited with code zero.
    #[must_use]
    pub const fn is_clean(self) -> bool {
        matches!(self, Self::Clean)
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => f.write_str("exited cleanly"),
            Self::Error(code) => write!(f, "exited with code {code}"),
            Self::Signal(signal) => match Signal::try_from(*signal) {
                Ok(name) => write!(f, "killed by {}", name.as_str()),
                Err(_) => write!(f, "killed by signal {signal}"),
            },
            Self::Unknown => f.write_str("exited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_raw_statuses() {
        assert_eq!(ExitKind::from_status(ExitStatus::from_raw(0)), ExitKind::Clean);
        assert_eq!(
            ExitKind::from_status(ExitStatus::from_raw(3 << 8)),
            ExitKind::Error(3)
        );
        assert_eq!(
            ExitKind::from_status(ExitStatus::from_raw(9)),
            ExitKind::Signal(9)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitKind::Signal(15).to_string(), "killed by SIGTERM");
        assert_eq!(ExitKind::Error(2).to_string(), "exited with code 2");
        assert!(ExitKind::Clean.is_clean());
    }
}
