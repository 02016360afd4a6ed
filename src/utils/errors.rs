//! Error types for the loop-to-kernel transformation.
//!
//! Every error is fatal to the single transformation call that raised it.
//! The caller is expected to keep the original loop in place; nothing in
//! this crate retries or produces partial output.

use thiserror::Error;

/// Error raised by a transformation call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The statement is not the supported `for (i = 0; i <= ub; i++)` shape.
    #[error("malformed loop: {reason} in `{stmt}`")]
    MalformedLoop {
        /// What did not match
        reason: String,
        /// One-line rendering of the offending statement
        stmt: String,
    },

    /// The loop body uses a pattern the analysis cannot classify.
    #[error("unsupported pattern: {reason}{} in `{stmt}`", ident_suffix(.ident))]
    UnsupportedPattern {
        /// What is unsupported
        reason: String,
        /// The identifier involved, if there is a single one
        ident: Option<String>,
        /// One-line rendering of the offending statement
        stmt: String,
    },

    /// The transformation parameters cannot produce a valid launch.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration
        reason: String,
    },
}

fn ident_suffix(ident: &Option<String>) -> String {
    match ident {
        Some(name) => format!(" (identifier `{}`)", name),
        None => String::new(),
    }
}

/// Discriminant of a [`TransformError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    /// See [`TransformError::MalformedLoop`]
    MalformedLoop,
    /// See [`TransformError::UnsupportedPattern`]
    UnsupportedPattern,
    /// See [`TransformError::InvalidConfig`]
    InvalidConfig,
}

impl TransformError {
    /// Create a malformed-loop error.
    pub fn malformed(reason: impl Into<String>, stmt: impl ToString) -> Self {
        TransformError::MalformedLoop { reason: reason.into(), stmt: stmt.to_string() }
    }

    /// Create an unsupported-pattern error.
    pub fn unsupported(reason: impl Into<String>, stmt: impl ToString) -> Self {
        TransformError::UnsupportedPattern {
            reason: reason.into(),
            ident: None,
            stmt: stmt.to_string(),
        }
    }

    /// Create an invalid-configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        TransformError::InvalidConfig { reason: reason.into() }
    }

    /// Attach the identifier an unsupported pattern is about.
    pub fn with_ident(self, name: &str) -> Self {
        match self {
            TransformError::UnsupportedPattern { reason, stmt, .. } => {
                TransformError::UnsupportedPattern { reason, ident: Some(name.to_string()), stmt }
            }
            other => other,
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> TransformErrorKind {
        match self {
            TransformError::MalformedLoop { .. } => TransformErrorKind::MalformedLoop,
            TransformError::UnsupportedPattern { .. } => TransformErrorKind::UnsupportedPattern,
            TransformError::InvalidConfig { .. } => TransformErrorKind::InvalidConfig,
        }
    }

    /// The identifier an unsupported pattern is about, if recorded.
    pub fn ident(&self) -> Option<&str> {
        match self {
            TransformError::UnsupportedPattern { ident, .. } => ident.as_deref(),
            _ => None,
        }
    }
}

/// Result type using TransformError.
pub type TransformResult<T> = Result<T, TransformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransformError::unsupported("multiple reduction targets", "s = s + t;")
            .with_ident("t");
        let s = err.to_string();
        assert!(s.contains("multiple reduction targets"));
        assert!(s.contains("identifier `t`"));
        assert!(s.contains("s = s + t;"));
        assert_eq!(err.kind(), TransformErrorKind::UnsupportedPattern);
        assert_eq!(err.ident(), Some("t"));
    }

    #[test]
    fn test_with_ident_only_touches_unsupported() {
        let err = TransformError::malformed("missing test", "for (;;) x;").with_ident("x");
        assert_eq!(err.kind(), TransformErrorKind::MalformedLoop);
        assert_eq!(err.ident(), None);
    }
}
