pub mod ast;
pub mod binder;
pub mod builtins;
pub mod context;
pub mod environment;
pub mod errors;
pub mod evaluator;
pub mod exception;
pub mod interpreter;
pub mod lexer;
pub mod library;
pub mod parser;
pub mod sandbox;
pub mod token;
pub mod value;

#[cfg(test)]
mod harness;

pub use context::{CancelToken, ExecutionContext, NativeCall};
pub use errors::EvalError;
pub use exception::{ExceptionKind, Raised};
pub use interpreter::Interpreter;
pub use library::{Library, LibraryTemplate, file_library};
pub use sandbox::{SandboxConfig, SandboxPolicy};
pub use value::Value;
