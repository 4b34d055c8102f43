#![no_main]

use libfuzzer_sys::fuzz_target;
use spindle::parser::Parser;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    if source.len() > 100_000 {
        return;
    }

    // Ok or a SyntaxError, never a panic
    let mut parser = Parser::new(source);
    let _ = parser.parse_program();
});
