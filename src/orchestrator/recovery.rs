//! Recovery manager
//!
//! Classifies a stage error into a kind and severity, and decides
//! retry-vs-terminal. Severity is observability-only; control flow depends
//! solely on the kind and the attempt budget.

use serde::{Deserialize, Serialize};

use crate::Error;

/// What went wrong, coarsely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, rate limit, timeout. Retryable.
    Transient,
    /// Malformed model output or a patch that would not apply. Retryable a
    /// bounded number of times; a different sampling may succeed.
    Validation,
    /// Missing required context, programming or configuration error.
    /// Not retryable.
    Structural,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Structural)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
}

/// Decides whether a failed run gets another attempt.
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    max_iterations: u32,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self { max_iterations: 3 }
    }
}

impl RecoveryManager {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Map a crate error onto the taxonomy.
    pub fn classify(&self, error: &Error) -> ErrorClassification {
        use ErrorKind::*;
        use ErrorSeverity::*;

        let (kind, severity) = match error {
            Error::RateLimited(_) => (Transient, Low),
            Error::Timeout(_) => (Transient, Medium),
            Error::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    (Transient, Medium)
                } else if e.status().is_some_and(|s| s.as_u16() == 429) {
                    (Transient, Low)
                } else if e.status().is_some_and(|s| s.is_server_error()) {
                    (Transient, Medium)
                } else {
                    (Transient, High)
                }
            }
            Error::Github(_) | Error::Gemini(_) => (Transient, Medium),
            Error::ModelOutput(_) | Error::Json(_) | Error::Patch(_) => (Validation, Medium),
            Error::MissingContext(_) => (Structural, High),
            Error::Config(_) | Error::IllegalTransition { .. } => (Structural, High),
            Error::Command(_) | Error::Io(_) | Error::Toml(_) => (Structural, Medium),
        };

        ErrorClassification { kind, severity }
    }

    /// Retry only while the attempt budget holds and the kind is
    /// retryable. `attempt` counts executions, starting at 1.
    pub fn should_retry(&self, classification: &ErrorClassification, attempt: u32) -> bool {
        classification.kind.is_retryable() && attempt < self.max_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        let recovery = RecoveryManager::default();
        let class = recovery.classify(&Error::RateLimited("429".to_string()));
        assert_eq!(class.kind, ErrorKind::Transient);
        assert!(class.kind.is_retryable());

        let class = recovery.classify(&Error::Timeout("gemini".to_string()));
        assert_eq!(class.kind, ErrorKind::Transient);
    }

    #[test]
    fn model_output_and_patch_failures_are_validation() {
        let recovery = RecoveryManager::default();
        let class = recovery.classify(&Error::ModelOutput("not json".to_string()));
        assert_eq!(class.kind, ErrorKind::Validation);
        assert!(class.kind.is_retryable());

        let class = recovery.classify(&Error::Patch("hunk mismatch".to_string()));
        assert_eq!(class.kind, ErrorKind::Validation);
    }

    #[test]
    fn structural_errors_never_retry() {
        let recovery = RecoveryManager::default();
        let class = recovery.classify(&Error::MissingContext("analysis"));
        assert_eq!(class.kind, ErrorKind::Structural);
        assert!(!recovery.should_retry(&class, 1));

        let class = recovery.classify(&Error::Config("no handler".to_string()));
        assert_eq!(class.severity, ErrorSeverity::High);
        assert!(!class.kind.is_retryable());
    }

    #[test]
    fn retry_budget_is_bounded_by_max_iterations() {
        let recovery = RecoveryManager::new(3);
        let class = ErrorClassification {
            kind: ErrorKind::Transient,
            severity: ErrorSeverity::Low,
        };
        assert!(recovery.should_retry(&class, 1));
        assert!(recovery.should_retry(&class, 2));
        assert!(!recovery.should_retry(&class, 3));
        assert!(!recovery.should_retry(&class, 4));
    }
}
