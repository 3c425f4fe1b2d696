//! Script-level exceptions.
//!
//! A raised exception travels the `Err` rail of every evaluation function,
//! so try/except/finally unwinding stays explicit in the evaluator instead
//! of leaning on host panics.

use std::fmt;

/// Closed set of exception kinds scripts can raise and catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Name,
    Type,
    Value,
    Index,
    Key,
    Arity,
    Attribute,
    ZeroDivision,
    Permission,
    Import,
    Runtime,
    Cancelled,
    SystemExit,
    /// `raise "message"` or `raise SomeValue` from script code.
    User,
}

impl ExceptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionKind::Name => "NameError",
            ExceptionKind::Type => "TypeError",
            ExceptionKind::Value => "ValueError",
            ExceptionKind::Index => "IndexError",
            ExceptionKind::Key => "KeyError",
            ExceptionKind::Arity => "ArityError",
            ExceptionKind::Attribute => "AttributeError",
            ExceptionKind::ZeroDivision => "ZeroDivisionError",
            ExceptionKind::Permission => "PermissionError",
            ExceptionKind::Import => "ImportError",
            ExceptionKind::Runtime => "RuntimeError",
            ExceptionKind::Cancelled => "Cancelled",
            ExceptionKind::SystemExit => "SystemExit",
            ExceptionKind::User => "Exception",
        }
    }
}

/// An in-flight exception: kind, message, and the exit code for SystemExit.
#[derive(Debug, Clone, PartialEq)]
pub struct Raised {
    pub kind: ExceptionKind,
    pub message: String,
    pub exit_code: Option<i64>,
}

impl Raised {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Name, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Value, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Index, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Key, message)
    }

    pub fn arity_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Arity, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Attribute, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ZeroDivision, message)
    }

    pub fn permission_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Permission, message)
    }

    pub fn import_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Import, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Runtime, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Cancelled, message)
    }

    pub fn system_exit(code: i64) -> Self {
        Self {
            kind: ExceptionKind::SystemExit,
            message: format!("exit requested with code {code}"),
            exit_code: Some(code),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::User, message)
    }

    /// Whether an `except Name` handler catches this exception.
    ///
    /// `Exception` is the catch-most name: it matches every kind except
    /// SystemExit and Cancelled, which only a bare `except` intercepts.
    pub fn matches_handler(&self, name: &str) -> bool {
        if name == "Exception" {
            return !matches!(
                self.kind,
                ExceptionKind::SystemExit | ExceptionKind::Cancelled
            );
        }
        self.kind.name() == name
    }
}

impl fmt::Display for Raised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // User-raised exceptions display as their payload alone, so
        // `str(e)` after `raise "boom"` yields exactly "boom".
        if self.kind == ExceptionKind::User {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_raised_displays_message_only() {
        let raised = Raised::user("boom");
        assert_eq!(raised.to_string(), "boom");
    }

    #[test]
    fn kinded_exception_displays_kind_prefix() {
        let raised = Raised::type_error("bad operand");
        assert_eq!(raised.to_string(), "TypeError: bad operand");
    }

    #[test]
    fn exception_handler_excludes_exit_and_cancel() {
        assert!(Raised::value_error("x").matches_handler("Exception"));
        assert!(!Raised::system_exit(1).matches_handler("Exception"));
        assert!(!Raised::cancelled("deadline").matches_handler("Exception"));
        assert!(Raised::system_exit(1).matches_handler("SystemExit"));
    }
}
