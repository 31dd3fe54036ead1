// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Error
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Geometry mismatch in {context}: expected {expected:?}, got {actual:?}")]
    InvalidGeometry {
        context: String,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Structure '{0}' has no mask")]
    MissingStructure(String),

    #[error("Numeric failure in {context}: {message}")]
    NumericFailure { context: String, message: String },

    #[error("Did not converge after {iterations} iterations (residual {residual:.3e})")]
    Unconverged { iterations: usize, residual: f64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Allocation failed: {0}")]
    ResourceExhausted(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{component}: {source}")]
    Context {
        component: String,
        #[source]
        source: Box<PlanError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlanError {
    /// Wrap an error with the component (and optional beam/objective index)
    /// it was raised in. Used by the plan controller when surfacing engine
    /// and optimizer failures.
    pub fn in_component(self, component: impl Into<String>) -> PlanError {
        PlanError::Context {
            component: component.into(),
            source: Box::new(self),
        }
    }
}

pub type PlanResult<T> = Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wrapping_preserves_source() {
        let err = PlanError::MissingStructure("PTV".into()).in_component("dose engine, beam 2");
        let msg = format!("{err}");
        assert!(msg.contains("dose engine, beam 2"));
        assert!(msg.contains("PTV"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PlanError = io.into();
        assert!(matches!(err, PlanError::Io(_)));
    }
}
