//! Errors raised while decoding or constructing query values

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// A value does not match any variant of the clause it was decoded as.
    #[error("Shape violation in {clause}: {message}")]
    ShapeViolation {
        clause: &'static str,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn shape(clause: &'static str, message: impl Into<String>) -> Self {
        ModelError::ShapeViolation {
            clause,
            message: message.into(),
        }
    }

    pub fn is_shape_violation(&self) -> bool {
        matches!(self, ModelError::ShapeViolation { .. })
    }
}
