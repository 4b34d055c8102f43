//! Integration tests for the interpreter, organized by feature
//!
//! These tests exercise the engine through the public API.
//!
//! ## Aggressive Test Defaults
//!
//! The `eval` helpers collect garbage before every step, so a value the
//! evaluator forgets to root disappears at once:
//!
//! ```bash
//! cargo test                  # Default: collect before every step
//! GC_EVERY=100 cargo test     # Collect every 100 steps
//! GC_EVERY=0 cargo test       # Never collect
//! ```

mod blocking;
mod checkpoint;
mod error;
mod function;
mod gc;
mod object;
mod operators;
mod scheduler;

use std::rc::Rc;

use spindle::{
    Completion, EngineConfig, EngineError, Interpreter, ManualTimeProvider, StepResult, ThreadId,
    Value,
};

/// Create an engine on a hand-driven clock starting at 0.
pub fn create_test_runtime() -> (Interpreter, ManualTimeProvider) {
    create_runtime_with(EngineConfig::default())
}

pub fn create_runtime_with(config: EngineConfig) -> (Interpreter, ManualTimeProvider) {
    let clock = ManualTimeProvider::new();
    let interp = Interpreter::with_config(config, Rc::new(clock.clone()));
    (interp, clock)
}

fn gc_every() -> usize {
    std::env::var("GC_EVERY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1)
}

/// Call `run()` until every thread is finished or waits on the host,
/// moving the clock to each wake time in between.
pub fn run_to_idle(interp: &mut Interpreter, clock: &ManualTimeProvider) -> Result<(), EngineError> {
    while let Some(at) = interp.run()? {
        clock.advance(at.saturating_sub(interp.now()));
    }
    Ok(())
}

/// Step until `thread` has a completion, collecting garbage between steps.
///
/// A guest throw comes back as `Err` holding the thrown value's string form.
pub fn run_thread(
    interp: &mut Interpreter,
    clock: &ManualTimeProvider,
    thread: ThreadId,
) -> Result<Value, String> {
    let every = gc_every();
    let mut steps = 0usize;
    loop {
        match interp.completion(thread).cloned() {
            Some(Completion::Returned(value)) => return Ok(value),
            Some(Completion::Threw { value, .. }) => return Err(interp.display(&value)),
            Some(Completion::Killed) => return Err(format!("{} was killed", thread)),
            None => {}
        }
        if every > 0 && steps % every == 0 {
            interp.collect_garbage().map_err(|e| e.to_string())?;
        }
        steps += 1;
        match interp.step().map_err(|e| e.to_string())? {
            StepResult::Idle {
                next_wake: Some(at),
            } => clock.advance(at.saturating_sub(interp.now())),
            StepResult::Idle { next_wake: None } => {
                return Err(format!("{} can never finish", thread));
            }
            _ => {}
        }
    }
}

/// Helper function to evaluate guest source.
#[allow(clippy::expect_used)]
pub fn eval(source: &str) -> Value {
    eval_result(source).expect("eval failed")
}

/// Helper function to evaluate and return Result for error testing.
pub fn eval_result(source: &str) -> Result<Value, String> {
    let (mut interp, clock) = create_test_runtime();
    let main = interp.load(source).map_err(|e| e.to_string())?;
    run_thread(&mut interp, &clock, main)
}

/// Evaluate and return the completion value's string form (for objects).
#[allow(clippy::expect_used)]
pub fn eval_display(source: &str) -> String {
    let (mut interp, clock) = create_test_runtime();
    let main = interp.load(source).expect("load failed");
    let value = run_thread(&mut interp, &clock, main).expect("eval failed");
    interp.display(&value)
}

/// Helper to check if evaluation throws an error containing a specific message
pub fn throws_error(source: &str, error_contains: &str) -> bool {
    match eval_result(source) {
        Err(e) => e.contains(error_contains),
        Ok(_) => false,
    }
}

/// Shorthand for string values in assertions
pub fn s(value: &str) -> Value {
    Value::from(value)
}
