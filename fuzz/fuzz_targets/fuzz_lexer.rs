#![no_main]

use libfuzzer_sys::fuzz_target;
use spindle::lexer::{Lexer, TokenKind};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    if source.len() > 100_000 {
        return;
    }

    // Every input ends in Eof or an Error token
    let mut lexer = Lexer::new(source);
    let mut tokens = 0usize;
    loop {
        let token = lexer.next_token();
        if matches!(token.kind, TokenKind::Eof | TokenKind::Error(_)) {
            break;
        }
        tokens += 1;
        assert!(tokens <= source.len() + 1, "lexer stopped advancing");
    }
});
