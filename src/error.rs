//! Error types for the medir benchmark harness.
//!
//! Two error levels exist on purpose. `MedirError` is the crate-level error:
//! anything that reaches it aborts the run. Resource exhaustion inside a unit
//! of work is NOT a `MedirError` — it is a tagged variant of
//! [`crate::backend::WorkError`] that the resource guard converts into a
//! `Measurement::NotApplicable` result, so a sweep continues past cells that
//! do not fit in memory.

use thiserror::Error;

/// Crate-level errors. All variants abort the run.
#[derive(Debug, Error)]
pub enum MedirError {
    /// Malformed or contradictory benchmark configuration.
    ///
    /// Raised before any measurement begins; never recovered.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the configuration problem
        reason: String,
    },

    /// A unit of work failed with a programming-error-class failure.
    ///
    /// This indicates a bug in the workload construction (shape mismatch,
    /// missing field), not a resource limit, and stops the run with the
    /// offending cell identified.
    #[error("workload failure for model '{model}' (batch_size={batch_size}, sequence_length={sequence_length}): {reason}")]
    Workload {
        /// Model identifier of the failing cell
        model: String,
        /// Batch size of the failing cell
        batch_size: usize,
        /// Sequence length of the failing cell
        sequence_length: usize,
        /// Description of the failure
        reason: String,
    },

    /// Result persistence failed.
    #[error("I/O error for '{path}': {reason}")]
    Io {
        /// Path of the file that could not be written
        path: String,
        /// Underlying OS error description
        reason: String,
    },
}

impl MedirError {
    /// Wrap an I/O error with the path it occurred on.
    #[must_use]
    pub fn io(path: &str, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Convenience result type for medir operations.
pub type Result<T> = std::result::Result<T, MedirError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_display() {
        let err = MedirError::InvalidConfiguration {
            reason: "no models".to_string(),
        };
        assert!(err.to_string().contains("invalid configuration"));
        assert!(err.to_string().contains("no models"));
    }

    #[test]
    fn test_workload_error_names_cell() {
        let err = MedirError::Workload {
            model: "tiny-model".to_string(),
            batch_size: 4,
            sequence_length: 128,
            reason: "shape mismatch".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tiny-model"));
        assert!(msg.contains("batch_size=4"));
        assert!(msg.contains("sequence_length=128"));
        assert!(msg.contains("shape mismatch"));
    }

    #[test]
    fn test_io_error_wrapping() {
        let os_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = MedirError::io("/tmp/out.csv", &os_err);
        assert!(matches!(err, MedirError::Io { .. }));
        assert!(err.to_string().contains("/tmp/out.csv"));
    }
}
