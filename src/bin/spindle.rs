//! CLI for running guest scripts with spindle
//!
//! Usage: spindle [options] <script.js>
//!
//! Options:
//!   --timeslice <n>        Steps a thread may take before yielding
//!   --checkpoint <file>    Write a JSON snapshot once the run stops
//!
//! The script runs in real time until no thread can make progress. Set
//! `RUST_LOG` (for example `RUST_LOG=spindle=debug`) to see engine events.

use std::env;
use std::fs;
use std::process::ExitCode;
use std::rc::Rc;

use spindle::{Completion, EngineConfig, Interpreter, StdTimeProvider};
use tracing_subscriber::EnvFilter;

struct Config {
    timeslice: Option<u32>,
    checkpoint: Option<String>,
    script: String,
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map_or("spindle", |s| s.as_str());

    let mut timeslice = None;
    let mut checkpoint = None;
    let mut script = None;
    let mut i = 1;
    while i < args.len() {
        let Some(arg) = args.get(i) else {
            break;
        };
        if arg == "--timeslice" {
            i += 1;
            timeslice = Some(
                args.get(i)
                    .ok_or_else(|| "--timeslice requires a value".to_string())?
                    .parse::<u32>()
                    .map_err(|_| "--timeslice must be a positive integer".to_string())?,
            );
        } else if arg == "--checkpoint" {
            i += 1;
            checkpoint = Some(
                args.get(i)
                    .ok_or_else(|| "--checkpoint requires a file name".to_string())?
                    .clone(),
            );
        } else if arg.starts_with("--") {
            return Err(format!("unknown option {}", arg));
        } else {
            script = Some(arg.clone());
        }
        i += 1;
    }

    let script = script.ok_or_else(|| {
        format!(
            "Usage: {} [--timeslice <n>] [--checkpoint <file>] <script.js>",
            program_name
        )
    })?;
    Ok(Config {
        timeslice,
        checkpoint,
        script,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, String> {
    let config = parse_args()?;
    let source = fs::read_to_string(&config.script)
        .map_err(|e| format!("cannot read {}: {}", config.script, e))?;

    let mut engine_config = EngineConfig::default();
    if let Some(steps) = config.timeslice {
        engine_config = engine_config.with_timeslice(steps);
    }
    let mut engine = Interpreter::with_config(engine_config, Rc::new(StdTimeProvider::new()));
    let main = engine.load(&source).map_err(|e| e.to_string())?;

    engine.start();
    engine.run_realtime().map_err(|e| e.to_string())?;
    engine.pause();

    if let Some(path) = &config.checkpoint {
        let json = engine
            .snapshot()
            .and_then(|s| s.to_json_pretty())
            .map_err(|e| e.to_string())?;
        fs::write(path, json).map_err(|e| format!("cannot write {}: {}", path, e))?;
    }

    match engine.completion(main) {
        Some(Completion::Returned(value)) => {
            println!("{}", engine.display(value));
            Ok(ExitCode::SUCCESS)
        }
        Some(Completion::Threw { stack, .. }) => {
            eprintln!("Uncaught {}", stack);
            Ok(ExitCode::FAILURE)
        }
        Some(Completion::Killed) => {
            eprintln!("main thread was killed");
            Ok(ExitCode::FAILURE)
        }
        None => {
            let status = engine.thread_status(main);
            eprintln!("main thread did not finish ({:?})", status);
            Ok(ExitCode::FAILURE)
        }
    }
}
