//! Lexer for the textual IR.
//!
//! The lexer converts IR text into a stream of tokens.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::errors::{LexerError, LexerErrorKind};
use crate::utils::location::{SourceLocation, Span};
use std::iter::Peekable;
use std::str::Chars;
use unicode_xid::UnicodeXID;

/// A lexer for tokenizing IR text.
pub struct Lexer<'a> {
    /// The source text
    source: &'a str,
    /// Character iterator
    chars: Peekable<Chars<'a>>,
    /// Current byte offset
    offset: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// Start of current token
    token_start: SourceLocation,
    /// Whether we've hit EOF
    at_eof: bool,
}

/// Characters allowed inside bare words and sigiled names.
fn is_name_char(c: char) -> bool {
    c.is_xid_continue() || matches!(c, '_' | '.' | '-' | '$')
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
            offset: 0,
            line: 1,
            column: 1,
            token_start: SourceLocation::start(),
            at_eof: false,
        }
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.offset)
    }

    fn mark_token_start(&mut self) {
        self.token_start = self.current_location();
    }

    fn make_span(&self) -> Span {
        Span::from_locations(self.token_start, self.current_location())
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Peek one character past the current one.
    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.offset..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skip whitespace and `;` line comments.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.advance();
                }
                Some(';') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        let span = self.make_span();
        let lexeme = self.source[span.start_offset..span.end_offset].to_string();
        Token::new(kind, span, lexeme)
    }

    fn make_error(&self, message: &str, kind: LexerErrorKind) -> LexerError {
        LexerError {
            message: message.to_string(),
            span: self.make_span(),
            kind,
        }
    }

    fn skip_digits(&mut self) -> usize {
        let mut count = 0;
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.advance();
            count += 1;
        }
        count
    }

    /// Scan a number literal; the first digit or `-` is already consumed.
    fn scan_number(&mut self, first: char) -> Result<Token, LexerError> {
        if first == '0' && self.peek() == Some('x') {
            self.advance();
            let mut digits = 0;
            while self.peek().map(|c| c.is_ascii_hexdigit()).unwrap_or(false) {
                self.advance();
                digits += 1;
            }
            if digits == 0 {
                return Err(self.make_error("Expected hex digits after '0x'", LexerErrorKind::InvalidNumber));
            }
            return Ok(self.make_token(TokenKind::Float));
        }

        if first == '-' && self.skip_digits() == 0 {
            return Err(self.make_error("Expected digits after '-'", LexerErrorKind::InvalidNumber));
        }
        self.skip_digits();

        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            is_float = true;
            self.advance();
            self.skip_digits();
        }

        if self.peek() == Some('e') || self.peek() == Some('E') {
            is_float = true;
            self.advance();
            if self.peek() == Some('+') || self.peek() == Some('-') {
                self.advance();
            }
            if self.skip_digits() == 0 {
                return Err(self.make_error(
                    "Invalid floating-point exponent",
                    LexerErrorKind::InvalidNumber,
                ));
            }
        }

        if is_float {
            Ok(self.make_token(TokenKind::Float))
        } else {
            Ok(self.make_token(TokenKind::Integer))
        }
    }

    /// Scan a bare word: a keyword, a type, an opcode or a label.
    fn scan_identifier(&mut self) -> Token {
        while self.peek().map(is_name_char).unwrap_or(false) {
            self.advance();
        }

        let span = self.make_span();
        let lexeme = &self.source[span.start_offset..span.end_offset];
        let kind = TokenKind::keyword(lexeme).unwrap_or(TokenKind::Identifier);
        Token::new(kind, span, lexeme.to_string())
    }

    /// Scan the name after a sigil; the sigil is already consumed.
    fn scan_sigiled(&mut self, kind: TokenKind) -> Result<Token, LexerError> {
        let mut len = 0;
        while self.peek().map(is_name_char).unwrap_or(false) {
            self.advance();
            len += 1;
        }
        if len == 0 {
            return Err(self.make_error("Expected a name after sigil", LexerErrorKind::EmptyName));
        }
        Ok(self.make_token(kind))
    }

    /// Scan a quoted string; the opening quote is already consumed.
    fn scan_string(&mut self, kind: TokenKind) -> Result<Token, LexerError> {
        loop {
            match self.advance() {
                Some('"') => break,
                Some('\n') | None => {
                    return Err(self.make_error(
                        "Unterminated string literal",
                        LexerErrorKind::UnterminatedString,
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(self.make_token(kind))
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace();
        self.mark_token_start();

        let c = match self.advance() {
            Some(c) => c,
            None => {
                self.at_eof = true;
                return Ok(self.make_token(TokenKind::Eof));
            }
        };

        match c {
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '[' => Ok(self.make_token(TokenKind::LeftBracket)),
            ']' => Ok(self.make_token(TokenKind::RightBracket)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            '=' => Ok(self.make_token(TokenKind::Equal)),
            ':' => Ok(self.make_token(TokenKind::Colon)),
            '*' => Ok(self.make_token(TokenKind::Star)),
            '.' => {
                if self.match_char('.') && self.match_char('.') {
                    Ok(self.make_token(TokenKind::Ellipsis))
                } else {
                    Err(self.make_error("Expected '...'", LexerErrorKind::UnexpectedChar))
                }
            }

            '%' => self.scan_sigiled(TokenKind::LocalName),
            '@' => self.scan_sigiled(TokenKind::GlobalName),
            '#' => self.scan_sigiled(TokenKind::AttrGroup),
            '!' => match self.peek() {
                Some('"') => {
                    self.advance();
                    self.scan_string(TokenKind::MetadataString)
                }
                Some(c) if is_name_char(c) => self.scan_sigiled(TokenKind::MetadataName),
                _ => Ok(self.make_token(TokenKind::Bang)),
            },

            '"' => self.scan_string(TokenKind::String),

            c if c.is_ascii_digit() => self.scan_number(c),
            '-' if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) => self.scan_number('-'),

            c if c.is_xid_start() || c == '_' => Ok(self.scan_identifier()),

            _ => Err(self.make_error(
                &format!("Unexpected character: '{}'", c),
                LexerErrorKind::UnexpectedChar,
            )),
        }
    }

    /// Check if we've reached EOF.
    pub fn is_at_end(&self) -> bool {
        self.at_eof
    }

    /// Collect all tokens into a vector.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at_eof {
            None
        } else {
            let result = self.next_token();
            if result.as_ref().map(|t| t.is_eof()).unwrap_or(false) {
                self.at_eof = true;
            }
            Some(result)
        }
    }
}
