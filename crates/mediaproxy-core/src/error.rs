//! The stable error taxonomy shared by every public operation in the core.
//!
//! Grounded on `spark-core::error::CoreError`'s code+message+cause shape, but
//! closed over the eight outcomes the dataplane actually produces (see
//! `spec.md` §7) rather than an open `&'static str` namespace: every failure
//! that crosses a `Connection`/`Group`/manager boundary fits one of these.

use std::sync::Arc;

/// A boxed lower-level cause, shared so a `CoreError` stays `Clone`.
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The stable error domain for the dataplane core.
///
/// Each variant corresponds to one row of the taxonomy table in `spec.md`
/// §7. Variants carry an optional `context` string for diagnostics and an
/// optional chained `cause` for subtype failures that could not be
/// translated one-to-one (see [`CoreError::general_failure`]).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("operation invalid for current state{}", context_suffix(.context))]
    WrongState { context: Option<String> },

    #[error("hot-path transmit with no link assigned{}", context_suffix(.context))]
    NoLinkAssigned { context: Option<String> },

    #[error("bad argument{}", context_suffix(.context))]
    BadArgument { context: Option<String> },

    #[error("allocation or task-spawn failure{}", context_suffix(.context))]
    OutOfMemory { context: Option<String> },

    #[error("cancellation observed while blocking{}", context_suffix(.context))]
    ContextCancelled { context: Option<String> },

    #[error("bounded wait elapsed{}", context_suffix(.context))]
    Timeout { context: Option<String> },

    #[error("general failure{}", context_suffix(.context))]
    GeneralFailure {
        context: Option<String>,
        #[source]
        cause: Option<ErrorCause>,
    },

    #[error("operation not supported in this direction{}", context_suffix(.context))]
    NotSupported { context: Option<String> },
}

fn context_suffix(context: &Option<String>) -> String {
    match context {
        Some(c) => format!(": {c}"),
        None => String::new(),
    }
}

impl CoreError {
    pub fn wrong_state(context: impl Into<String>) -> Self {
        CoreError::WrongState {
            context: Some(context.into()),
        }
    }

    pub fn no_link_assigned() -> Self {
        CoreError::NoLinkAssigned { context: None }
    }

    pub fn bad_argument(context: impl Into<String>) -> Self {
        CoreError::BadArgument {
            context: Some(context.into()),
        }
    }

    pub fn out_of_memory(context: impl Into<String>) -> Self {
        CoreError::OutOfMemory {
            context: Some(context.into()),
        }
    }

    pub fn context_cancelled() -> Self {
        CoreError::ContextCancelled { context: None }
    }

    pub fn timeout() -> Self {
        CoreError::Timeout { context: None }
    }

    pub fn general_failure(context: impl Into<String>) -> Self {
        CoreError::GeneralFailure {
            context: Some(context.into()),
            cause: None,
        }
    }

    pub fn from_cause(
        context: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CoreError::GeneralFailure {
            context: Some(context.into()),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn not_supported() -> Self {
        CoreError::NotSupported { context: None }
    }

    /// Whether this outcome increments the `errors`/`transactions_failed`
    /// counters on the hot path, per spec.md §7 "Observable behaviour".
    pub fn is_hot_path_countable(&self) -> bool {
        !matches!(self, CoreError::NotSupported { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_state_carries_context() {
        let e = CoreError::wrong_state("establish in closing");
        assert!(e.to_string().contains("establish in closing"));
    }

    #[test]
    fn not_supported_is_not_hot_path_countable() {
        assert!(!CoreError::not_supported().is_hot_path_countable());
        assert!(CoreError::no_link_assigned().is_hot_path_countable());
    }
}
