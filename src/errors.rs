//! Public error surface of an `eval` call.

use thiserror::Error;

use crate::exception::{ExceptionKind, Raised};
use crate::lexer::LexError;
use crate::parser::ParseError;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// An exception left the script uncaught.
    #[error("uncaught exception: {0}")]
    Exception(Raised),
    /// The script called `exit(code)` and nothing caught the SystemExit.
    /// Surfaced as a value, never as a process exit.
    #[error("exit requested with code {code}")]
    Exit { code: i64 },
    #[error("execution cancelled: {reason}")]
    Cancelled { reason: String },
}

impl From<Raised> for EvalError {
    fn from(raised: Raised) -> Self {
        match raised.kind {
            ExceptionKind::SystemExit => EvalError::Exit {
                code: raised.exit_code.unwrap_or(0),
            },
            ExceptionKind::Cancelled => EvalError::Cancelled {
                reason: raised.message,
            },
            _ => EvalError::Exception(raised),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_exit_becomes_a_typed_exit_result() {
        let err = EvalError::from(Raised::system_exit(7));
        assert!(matches!(err, EvalError::Exit { code: 7 }));
    }

    #[test]
    fn cancellation_keeps_its_reason() {
        let err = EvalError::from(Raised::cancelled("deadline exceeded"));
        assert!(err.to_string().contains("deadline exceeded"));
    }

    #[test]
    fn uncaught_exception_carries_kind_and_message() {
        let err = EvalError::from(Raised::name_error("name 'x' is not defined"));
        assert_eq!(
            err.to_string(),
            "uncaught exception: NameError: name 'x' is not defined"
        );
    }
}
