//! Error types for the aegish library

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the aegish library
///
/// Analysis stages (canonicalization, static validation) never surface these:
/// their failures are converted into flags and verdicts instead.
#[derive(Error, Debug)]
pub enum AegishError {
    // Configuration errors
    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Refusing to trust config {path}: {reason}")]
    ConfigIntegrity { path: PathBuf, reason: String },

    #[error("Invalid block pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // Sandbox errors
    #[error("Sandbox initialization failed: {0}")]
    SandboxInit(String),

    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    #[cfg(target_os = "linux")]
    #[error("Landlock error: {0}")]
    Landlock(#[from] landlock::RulesetError),

    #[cfg(target_os = "linux")]
    #[error("Landlock path error: {0}")]
    LandlockPath(#[from] landlock::PathFdError),

    // Execution errors
    #[error("Runner binary not found: {0}")]
    RunnerMissing(PathBuf),

    #[error("Runner binary {path} failed integrity check (expected {expected}, found {actual})")]
    RunnerHashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Command timed out after {0:?}")]
    ExecTimeout(Duration),

    #[error("Command exceeds {max} characters ({len})")]
    CommandTooLong { len: usize, max: usize },

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(unix)]
    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),
}

/// Failure outcomes of an external classifier call.
///
/// Each is distinct so policy can tell a timeout from an unparseable reply or
/// a refusal. All of them route through the configured fail mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("classifier refused to answer: {0}")]
    Refused(String),

    #[error("classifier unavailable: {0}")]
    Unavailable(String),
}

impl ClassifierError {
    /// Short tag used in verdict reasons and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Timeout(_) => "timeout",
            ClassifierError::Malformed(_) => "malformed",
            ClassifierError::Refused(_) => "refused",
            ClassifierError::Unavailable(_) => "unavailable",
        }
    }
}

/// Result type alias for aegish operations
pub type Result<T> = std::result::Result<T, AegishError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_error_kinds_are_distinct() {
        let kinds = [
            ClassifierError::Timeout(Duration::from_secs(1)).kind(),
            ClassifierError::Malformed(String::new()).kind(),
            ClassifierError::Refused(String::new()).kind(),
            ClassifierError::Unavailable(String::new()).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_classifier_error_converts() {
        let err: AegishError = ClassifierError::Refused("policy".into()).into();
        assert!(err.to_string().contains("refused"));
    }
}
