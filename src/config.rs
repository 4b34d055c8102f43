//! Engine configuration

use serde::{Deserialize, Serialize};

/// Tunable limits of an [`Interpreter`](crate::Interpreter).
///
/// All fields have defaults, so a host can deserialize a partial JSON
/// object:
///
/// ```
/// let config: spindle::EngineConfig = serde_json::from_str(r#"{"timeslice": 100}"#).unwrap();
/// assert_eq!(config.timeslice, Some(100));
/// assert_eq!(config.max_call_depth, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Steps a thread may take before it is moved to the back of the ready
    /// queue. `None` lets a thread run until it suspends, blocks or ends.
    pub timeslice: Option<u32>,
    /// Nested guest calls allowed before a `RangeError` is thrown.
    pub max_call_depth: usize,
    /// Prototype links followed by a property lookup.
    pub max_proto_depth: usize,
    /// Scope links followed by a name lookup before the chain is declared
    /// corrupt.
    pub max_scope_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeslice: None,
            max_call_depth: 256,
            max_proto_depth: 1_000,
            max_scope_depth: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn with_timeslice(mut self, steps: u32) -> Self {
        self.timeslice = Some(steps.max(1));
        self
    }
}
