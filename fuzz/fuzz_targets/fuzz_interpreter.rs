#![no_main]

use std::rc::Rc;

use libfuzzer_sys::fuzz_target;
use spindle::{EngineConfig, Interpreter, ManualTimeProvider, StepResult};

const MAX_STEPS: usize = 100_000;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    if source.len() > 10_000 {
        return;
    }

    let time = ManualTimeProvider::new();
    let config = EngineConfig::default().with_timeslice(50);
    let mut interp = Interpreter::with_config(config, Rc::new(time.clone()));
    if interp.load(source).is_err() {
        return;
    }

    let mut steps = 0;
    while steps < MAX_STEPS {
        steps += 1;
        match interp.step() {
            Ok(StepResult::Idle { next_wake: Some(at) }) => time.set(at.max(time.get())),
            Ok(StepResult::Idle { next_wake: None }) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        if steps % 1_000 == 0 {
            let _ = interp.collect_garbage();
        }
    }

    // Whatever state the run stopped in must survive a checkpoint.
    let snapshot = interp.snapshot().and_then(|s| s.to_json());
    if let Ok(json) = snapshot {
        let restored = spindle::Snapshot::from_json(&json).and_then(|s| {
            Interpreter::rehydrate(s, spindle::NativeRegistry::new(), Rc::new(time.clone()))
        });
        assert!(restored.is_ok(), "snapshot failed to rehydrate");
    }
});
