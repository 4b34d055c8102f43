//! A resumable, checkpointable guest-script engine
//!
//! Guest programs (an ES5 subset) run on cooperative threads that can sleep,
//! block on host calls and be killed. Every thread keeps its continuation as
//! an explicit stack of evaluator states, so the whole engine can be
//! snapshotted between any two steps and rehydrated in another process.
//!
//! # Example
//!
//! ```
//! use spindle::{Interpreter, StepResult, Value};
//!
//! let mut engine = Interpreter::new();
//! let main = engine.load("var x = 6; x * 7").unwrap();
//! engine.run().unwrap();
//! assert_eq!(
//!     engine.completion(main),
//!     Some(&spindle::Completion::Returned(Value::Number(42.0)))
//! );
//! # let _ = StepResult::Continue;
//! ```

pub mod ast;
pub mod bridge;
pub mod checkpoint;
pub mod config;
pub mod conversions;
pub mod error;
pub mod heap;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod platform;
pub mod scheduler;
pub mod scope;
pub mod trace;
pub mod value;

pub use bridge::ResolverId;
pub use checkpoint::{Snapshot, SNAPSHOT_VERSION};
pub use config::EngineConfig;
pub use error::EngineError;
pub use heap::{Class, ObjectId};
pub use interpreter::natives::{NativeCall, NativeOutcome, NativeRegistry};
pub use interpreter::{EngineStatus, ErrorKind, GcStats, Interpreter, StepResult};
pub use parser::parse;
pub use platform::{ManualTimeProvider, StdTimeProvider, TimeProvider};
pub use scheduler::{Completion, ThreadId, ThreadStatus};
pub use scope::ScopeId;
pub use trace::Reachable;
pub use value::{CheapClone, JsString, Value};
