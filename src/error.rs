//! Host-facing error types
//!
//! Guest exceptions never appear here: they are ordinary [`Value`]s thrown
//! through a thread's state stack. `EngineError` covers failures that belong to
//! the host: malformed source, misuse of the blocking bridge, dangling ids and
//! inconsistent checkpoints.
//!
//! [`Value`]: crate::value::Value

use thiserror::Error;

use crate::bridge::ResolverId;
use crate::heap::ObjectId;
use crate::scheduler::ThreadId;
use crate::scope::ScopeId;

/// Source location information for error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("SyntaxError: {message} at {location}")]
    Syntax {
        message: String,
        location: SourceLocation,
    },

    #[error("no such thread: {0}")]
    UnknownThread(ThreadId),

    #[error("no such object: {0}")]
    UnknownObject(ObjectId),

    #[error("no such scope: {0}")]
    UnknownScope(ScopeId),

    #[error("no native function registered under '{0}'")]
    UnknownNative(String),

    /// The host asked to call something that is not a function.
    #[error("{0} is not a function")]
    NotCallable(String),

    /// A resolver was settled a second time. This is a bug in the native
    /// binding, not something guest code can observe or catch.
    #[error("resolver {0} has already been settled")]
    ResolverSettled(ResolverId),

    #[error("resolver {0} was never issued")]
    UnknownResolver(ResolverId),

    /// The engine was entered again from inside a step (for example a native
    /// function calling `run()` or `snapshot()`).
    #[error("engine re-entered while {0}")]
    Reentrant(&'static str),

    /// The evaluator found a state stack it cannot continue from.
    #[error("corrupt execution state: {0}")]
    CorruptState(String),

    #[error("cannot rehydrate checkpoint: {0}")]
    Rehydrate(String),
}

impl EngineError {
    pub fn syntax_error(message: impl Into<String>, line: u32, column: u32) -> Self {
        EngineError::Syntax {
            message: message.into(),
            location: SourceLocation { line, column },
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        EngineError::CorruptState(message.into())
    }

    pub fn rehydrate(message: impl Into<String>) -> Self {
        EngineError::Rehydrate(message.into())
    }

    /// Whether this error describes bad guest source rather than a host bug.
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, EngineError::Syntax { .. })
    }
}
