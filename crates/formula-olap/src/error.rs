use crate::value::{Category, Shape};
use std::time::Duration;

pub type OlapResult<T> = Result<T, OlapError>;

/// How far an [`OlapError`] propagates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised while compiling, before any evaluation starts.
    Compile,
    /// Recoverable; rendered as an error marker in the cell that raised it.
    Cell,
    /// Aborts the whole query evaluation.
    Fatal,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OlapError {
    #[error("cannot convert {expression} from {from} to {to}")]
    NoConversion {
        expression: String,
        from: Shape,
        to: Category,
    },

    #[error("no function {name} matches signature {signature}")]
    NoMatchingFunction { name: String, signature: String },

    #[error(
        "no acceptable representation for {expression}: produces {produced:?}, accepts {accepted:?}"
    )]
    NoAcceptableRepresentation {
        expression: String,
        produced: Vec<crate::calc::ResultStyle>,
        accepted: Vec<crate::calc::ResultStyle>,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("unknown member: {0}")]
    UnknownMember(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("null member used where a member is required: {0}")]
    NullMember(String),

    #[error("number of tuples exceeded the result limit of {limit}")]
    ResourceLimit { limit: usize },

    #[error("native evaluation not supported for {expression}: {reason}")]
    NativeUnsupported { expression: String, reason: String },

    #[error("evaluation loop: {expression} is evaluating itself")]
    EvaluationLoop { expression: String },

    #[error("query cancelled")]
    Cancelled,

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OlapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OlapError::NoConversion { .. }
            | OlapError::NoMatchingFunction { .. }
            | OlapError::NoAcceptableRepresentation { .. }
            | OlapError::Type(_) => ErrorKind::Compile,
            OlapError::Eval(_)
            | OlapError::UnknownMember(_)
            | OlapError::DivisionByZero
            | OlapError::NullMember(_) => ErrorKind::Cell,
            OlapError::ResourceLimit { .. }
            | OlapError::NativeUnsupported { .. }
            | OlapError::EvaluationLoop { .. }
            | OlapError::Cancelled
            | OlapError::Timeout(_)
            | OlapError::Backend(_)
            | OlapError::Config(_)
            | OlapError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_cell_error(&self) -> bool {
        self.kind() == ErrorKind::Cell
    }

    pub fn is_compile_error(&self) -> bool {
        self.kind() == ErrorKind::Compile
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        OlapError::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors_by_propagation() {
        assert_eq!(OlapError::DivisionByZero.kind(), ErrorKind::Cell);
        assert_eq!(
            OlapError::ResourceLimit { limit: 10 }.kind(),
            ErrorKind::Fatal
        );
        assert!(OlapError::Type("bad".into()).is_compile_error());
        assert!(!OlapError::Cancelled.is_cell_error());
    }

    #[test]
    fn messages_name_the_offending_expression() {
        let err = OlapError::EvaluationLoop {
            expression: "NonEmptyCrossJoin([Store].[City].Members, [Product].[Category].Members)"
                .into(),
        };
        assert!(err.to_string().contains("is evaluating itself"));
    }
}
