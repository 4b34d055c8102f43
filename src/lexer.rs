//! Lexer for guest source code
//!
//! Converts source text into a stream of tokens.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::value::JsString;

/// Source span information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    String(JsString),
    True,
    False,
    Null,

    Identifier(JsString),

    // Keywords
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    For,
    While,
    Do,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    Try,
    Catch,
    Finally,
    Throw,
    New,
    This,
    Typeof,
    Instanceof,
    In,
    Void,
    Delete,
    Debugger,
    With,

    // Operators
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Percent,    // %
    PlusPlus,   // ++
    MinusMinus, // --
    Eq,         // =
    EqEq,       // ==
    EqEqEq,     // ===
    BangEq,     // !=
    BangEqEq,   // !==
    Lt,         // <
    LtEq,       // <=
    Gt,         // >
    GtEq,       // >=
    LtLt,       // <<
    GtGt,       // >>
    GtGtGt,     // >>>
    Amp,        // &
    AmpAmp,     // &&
    Pipe,       // |
    PipePipe,   // ||
    Caret,      // ^
    Tilde,      // ~
    Bang,       // !
    Question,   // ?

    // Assignment Operators
    PlusEq,   // +=
    MinusEq,  // -=
    StarEq,   // *=
    SlashEq,  // /=
    PercentEq, // %=
    AmpEq,    // &=
    PipeEq,   // |=
    CaretEq,  // ^=
    LtLtEq,   // <<=
    GtGtEq,   // >>=
    GtGtGtEq, // >>>=

    // Punctuation
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Dot,       // .
    Comma,     // ,
    Colon,     // :
    Semicolon, // ;

    // Special
    Eof,
    /// Malformed input; the message becomes a SyntaxError in the parser
    Error(String),
}

/// A token with its source location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn eof(pos: usize, line: u32, column: u32) -> Self {
        Self {
            kind: TokenKind::Eof,
            span: Span::new(pos, pos, line, column),
        }
    }
}

/// Lexer for tokenizing guest source code
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    current_pos: usize,
    line: u32,
    column: u32,
    start_pos: usize,
    start_line: u32,
    start_column: u32,
    /// Tracks if we just saw a newline (for ASI)
    saw_newline: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
            start_pos: 0,
            start_line: 1,
            start_column: 1,
            saw_newline: false,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Get the next token from the source
    pub fn next_token(&mut self) -> Token {
        if let Some(message) = self.skip_whitespace_and_comments() {
            return Token::new(TokenKind::Error(message), self.make_span());
        }

        self.start_pos = self.current_pos;
        self.start_line = self.line;
        self.start_column = self.column;

        let Some((_pos, ch)) = self.advance() else {
            return Token::eof(self.current_pos, self.line, self.column);
        };

        let kind = match ch {
            // Single character tokens
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '~' => TokenKind::Tilde,
            '?' => TokenKind::Question,

            // Potentially multi-character tokens
            '.' => self.scan_dot(),
            '+' => self.scan_plus(),
            '-' => self.scan_minus(),
            '*' => self.scan_with_eq(TokenKind::Star, TokenKind::StarEq),
            '/' => self.scan_with_eq(TokenKind::Slash, TokenKind::SlashEq),
            '%' => self.scan_with_eq(TokenKind::Percent, TokenKind::PercentEq),
            '^' => self.scan_with_eq(TokenKind::Caret, TokenKind::CaretEq),
            '=' => self.scan_equals(),
            '!' => self.scan_bang(),
            '<' => self.scan_less_than(),
            '>' => self.scan_greater_than(),
            '&' => self.scan_ampersand(),
            '|' => self.scan_pipe(),

            '"' | '\'' => self.scan_string(ch),

            '0'..='9' => self.scan_number(ch),

            c if is_id_start(c) => self.scan_identifier(c),

            c => TokenKind::Error(format!("Unexpected character '{}'", c)),
        };

        Token::new(kind, self.make_span())
    }

    /// Check if there was a newline before the current token
    pub fn had_newline_before(&self) -> bool {
        self.saw_newline
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((pos, ch)) = result {
            self.current_pos = pos + ch.len_utf8();
            if is_line_terminator(ch) {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_next(&self) -> Option<char> {
        let slice = self.source.get(self.current_pos..)?;
        let mut iter = slice.chars();
        iter.next();
        iter.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn make_span(&self) -> Span {
        Span::new(
            self.start_pos,
            self.current_pos,
            self.start_line,
            self.start_column,
        )
    }

    /// Returns an error message for an unterminated block comment.
    fn skip_whitespace_and_comments(&mut self) -> Option<String> {
        self.saw_newline = false;

        loop {
            match self.peek() {
                Some(c) if is_line_terminator(c) => {
                    self.saw_newline = true;
                    self.advance();
                }
                Some(c) if is_whitespace(c) => {
                    self.advance();
                }
                Some('/') => match self.peek_next() {
                    Some('/') => {
                        self.advance();
                        self.advance();
                        while let Some(ch) = self.peek() {
                            if is_line_terminator(ch) {
                                break;
                            }
                            self.advance();
                        }
                    }
                    Some('*') => {
                        self.start_pos = self.current_pos;
                        self.start_line = self.line;
                        self.start_column = self.column;
                        self.advance();
                        self.advance();
                        loop {
                            match self.advance() {
                                Some((_, '*')) if self.peek() == Some('/') => {
                                    self.advance();
                                    break;
                                }
                                Some((_, c)) if is_line_terminator(c) => {
                                    self.saw_newline = true;
                                }
                                Some(_) => {}
                                None => return Some("Unterminated comment".to_string()),
                            }
                        }
                    }
                    _ => break,
                },
                _ => break,
            }
        }
        None
    }

    fn scan_with_eq(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        if self.match_char('=') { with_eq } else { plain }
    }

    fn scan_dot(&mut self) -> TokenKind {
        if matches!(self.peek(), Some('0'..='9')) {
            // .123 style number
            self.scan_number('.')
        } else {
            TokenKind::Dot
        }
    }

    fn scan_plus(&mut self) -> TokenKind {
        if self.match_char('+') {
            TokenKind::PlusPlus
        } else if self.match_char('=') {
            TokenKind::PlusEq
        } else {
            TokenKind::Plus
        }
    }

    fn scan_minus(&mut self) -> TokenKind {
        if self.match_char('-') {
            TokenKind::MinusMinus
        } else if self.match_char('=') {
            TokenKind::MinusEq
        } else {
            TokenKind::Minus
        }
    }

    fn scan_equals(&mut self) -> TokenKind {
        if self.match_char('=') {
            if self.match_char('=') {
                TokenKind::EqEqEq
            } else {
                TokenKind::EqEq
            }
        } else {
            TokenKind::Eq
        }
    }

    fn scan_bang(&mut self) -> TokenKind {
        if self.match_char('=') {
            if self.match_char('=') {
                TokenKind::BangEqEq
            } else {
                TokenKind::BangEq
            }
        } else {
            TokenKind::Bang
        }
    }

    fn scan_less_than(&mut self) -> TokenKind {
        if self.match_char('<') {
            self.scan_with_eq(TokenKind::LtLt, TokenKind::LtLtEq)
        } else if self.match_char('=') {
            TokenKind::LtEq
        } else {
            TokenKind::Lt
        }
    }

    fn scan_greater_than(&mut self) -> TokenKind {
        if self.match_char('>') {
            if self.match_char('>') {
                self.scan_with_eq(TokenKind::GtGtGt, TokenKind::GtGtGtEq)
            } else {
                self.scan_with_eq(TokenKind::GtGt, TokenKind::GtGtEq)
            }
        } else if self.match_char('=') {
            TokenKind::GtEq
        } else {
            TokenKind::Gt
        }
    }

    fn scan_ampersand(&mut self) -> TokenKind {
        if self.match_char('&') {
            TokenKind::AmpAmp
        } else {
            self.scan_with_eq(TokenKind::Amp, TokenKind::AmpEq)
        }
    }

    fn scan_pipe(&mut self) -> TokenKind {
        if self.match_char('|') {
            TokenKind::PipePipe
        } else {
            self.scan_with_eq(TokenKind::Pipe, TokenKind::PipeEq)
        }
    }

    fn scan_string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();

        loop {
            match self.advance() {
                Some((_, c)) if c == quote => break,
                Some((_, '\\')) => match self.advance() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'b')) => value.push('\x08'),
                    Some((_, 'f')) => value.push('\x0C'),
                    Some((_, 'v')) => value.push('\x0B'),
                    Some((_, '0')) if !matches!(self.peek(), Some('0'..='9')) => value.push('\0'),
                    Some((_, '0'..='9')) => {
                        return TokenKind::Error("Octal escape sequences are not allowed".into());
                    }
                    Some((_, 'x')) => match self.scan_hex_escape(2).and_then(char::from_u32) {
                        Some(ch) => value.push(ch),
                        None => return TokenKind::Error("Invalid hexadecimal escape".into()),
                    },
                    Some((_, 'u')) => {
                        let Some(unit) = self.scan_hex_escape(4) else {
                            return TokenKind::Error("Invalid Unicode escape".into());
                        };
                        self.push_code_unit(&mut value, unit);
                    }
                    // Line continuation
                    Some((_, c)) if is_line_terminator(c) => {}
                    Some((_, '\r')) => {
                        self.match_char('\n');
                    }
                    Some((_, c)) => value.push(c),
                    None => return TokenKind::Error("Unterminated string literal".into()),
                },
                Some((_, c)) if is_line_terminator(c) || c == '\r' => {
                    return TokenKind::Error("Unterminated string literal".into());
                }
                Some((_, c)) => value.push(c),
                None => return TokenKind::Error("Unterminated string literal".into()),
            }
        }

        TokenKind::String(JsString::from(value))
    }

    /// Append a `\uXXXX` code unit, pairing a high surrogate with a following
    /// `\uXXXX` low surrogate when present.
    fn push_code_unit(&mut self, value: &mut String, unit: u32) {
        if (0xD800..0xDC00).contains(&unit)
            && self.peek() == Some('\\')
            && self.peek_next() == Some('u')
        {
            let rest = self.source.get(self.current_pos + 2..).unwrap_or("");
            let low = rest
                .get(..4)
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .filter(|low| (0xDC00..0xE000).contains(low));
            if let Some(low) = low {
                for _ in 0..6 {
                    self.advance();
                }
                let code = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                value.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                return;
            }
        }
        value.push(char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER));
    }

    fn scan_hex_escape(&mut self, count: usize) -> Option<u32> {
        let mut hex_str = String::new();
        for _ in 0..count {
            match self.peek() {
                Some(ch) if ch.is_ascii_hexdigit() => {
                    hex_str.push(ch);
                    self.advance();
                }
                _ => return None,
            }
        }
        u32::from_str_radix(&hex_str, 16).ok()
    }

    fn scan_number(&mut self, first: char) -> TokenKind {
        let mut num_str = String::new();

        if first == '0' && matches!(self.peek(), Some('x' | 'X')) {
            self.advance();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_hexdigit() {
                    num_str.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            if num_str.is_empty() {
                return TokenKind::Error("Invalid hexadecimal literal".into());
            }
            let value = num_str
                .chars()
                .filter_map(|c| c.to_digit(16))
                .fold(0.0, |acc, d| acc * 16.0 + d as f64);
            return self.check_number_end(TokenKind::Number(value));
        }
        if first == '0' && matches!(self.peek(), Some('0'..='9')) {
            return TokenKind::Error("Octal literals are not allowed".into());
        }

        num_str.push(first);
        if first != '.' {
            self.scan_digits(&mut num_str);
            if self.peek() == Some('.') {
                self.advance();
                num_str.push('.');
                self.scan_digits(&mut num_str);
            }
        } else {
            self.scan_digits(&mut num_str);
        }

        // Exponent part
        if matches!(self.peek(), Some('e' | 'E')) {
            num_str.push('e');
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                if let Some((_, ch)) = self.advance() {
                    num_str.push(ch);
                }
            }
            if !matches!(self.peek(), Some('0'..='9')) {
                return TokenKind::Error("Missing exponent".into());
            }
            self.scan_digits(&mut num_str);
        }

        match num_str.parse() {
            Ok(n) => self.check_number_end(TokenKind::Number(n)),
            Err(_) => TokenKind::Error(format!("Invalid number '{}'", num_str)),
        }
    }

    fn scan_digits(&mut self, into: &mut String) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                into.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    /// An identifier may not start immediately after a numeric literal.
    fn check_number_end(&mut self, token: TokenKind) -> TokenKind {
        match self.peek() {
            Some(c) if is_id_start(c) || c.is_ascii_digit() => {
                TokenKind::Error("Identifier starts immediately after numeric literal".into())
            }
            _ => token,
        }
    }

    fn scan_identifier(&mut self, first: char) -> TokenKind {
        let mut name = String::new();
        name.push(first);

        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match name.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,

            "var" => TokenKind::Var,
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "finally" => TokenKind::Finally,
            "throw" => TokenKind::Throw,
            "new" => TokenKind::New,
            "this" => TokenKind::This,
            "typeof" => TokenKind::Typeof,
            "instanceof" => TokenKind::Instanceof,
            "in" => TokenKind::In,
            "void" => TokenKind::Void,
            "delete" => TokenKind::Delete,
            "debugger" => TokenKind::Debugger,
            "with" => TokenKind::With,

            _ => TokenKind::Identifier(JsString::from(name)),
        }
    }
}

fn is_line_terminator(ch: char) -> bool {
    matches!(ch, '\n' | '\u{2028}' | '\u{2029}')
}

fn is_whitespace(ch: char) -> bool {
    matches!(
        ch,
        ' ' | '\t' | '\r' | '\u{000B}' | '\u{000C}' | '\u{00A0}' | '\u{FEFF}'
    ) || (!ch.is_ascii() && ch.is_whitespace())
}

/// Check if a character can start an identifier
fn is_id_start(ch: char) -> bool {
    ch == '_' || ch == '$' || ch.is_alphabetic()
}

/// Check if a character can continue an identifier
fn is_id_continue(ch: char) -> bool {
    ch == '_' || ch == '$' || ch.is_alphanumeric() || ch == '\u{200C}' || ch == '\u{200D}'
}
