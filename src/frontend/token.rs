//! Token types for the textual IR.
//!
//! This module defines all token types produced by the lexer.

use crate::utils::location::Span;
use std::fmt;

/// A token in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The source span
    pub span: Span,
    /// The lexeme (raw text)
    pub lexeme: String,
}

impl Token {
    /// Create a new token.
    pub fn new(kind: TokenKind, span: Span, lexeme: String) -> Self {
        Self { kind, span, lexeme }
    }

    /// Check if this is an EOF token.
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    /// Name carried by a sigiled token, without its sigil (`%x` gives `x`).
    pub fn name(&self) -> &str {
        match self.kind {
            TokenKind::LocalName | TokenKind::GlobalName | TokenKind::MetadataName | TokenKind::AttrGroup => {
                &self.lexeme[1..]
            }
            TokenKind::MetadataString => self.lexeme[2..].trim_end_matches('"'),
            TokenKind::String => self.lexeme.trim_matches('"'),
            _ => &self.lexeme,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.lexeme)
    }
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    /// Integer literal, possibly negative
    Integer,
    /// Decimal or hexadecimal floating-point literal
    Float,
    /// Quoted string
    String,

    // Names
    /// Bare word: types, opcodes, flags, labels
    Identifier,
    /// `%name`
    LocalName,
    /// `@name`
    GlobalName,
    /// `!name` or `!0`
    MetadataName,
    /// `!"text"`
    MetadataString,
    /// `#0`
    AttrGroup,

    // Keywords
    Define,
    Declare,
    True,
    False,
    Null,
    Undef,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Equal,
    Colon,
    Star,
    /// Lone `!`, as in `!{`
    Bang,
    /// `...`
    Ellipsis,

    Eof,
}

impl TokenKind {
    /// Check if this is a keyword.
    pub fn is_keyword(&self) -> bool {
        use TokenKind::*;
        matches!(self, Define | Declare | True | False | Null | Undef)
    }

    /// Get the keyword for a string, if it is a keyword.
    pub fn keyword(s: &str) -> Option<TokenKind> {
        match s {
            "define" => Some(TokenKind::Define),
            "declare" => Some(TokenKind::Declare),
            "true" => Some(TokenKind::True),
            "false" => Some(TokenKind::False),
            "null" => Some(TokenKind::Null),
            "undef" | "poison" => Some(TokenKind::Undef),
            _ => None,
        }
    }

    /// Get a human-readable name for this token kind.
    pub fn name(&self) -> &'static str {
        use TokenKind::*;
        match self {
            Integer => "integer",
            Float => "float",
            String => "string",
            Identifier => "identifier",
            LocalName => "local name",
            GlobalName => "global name",
            MetadataName => "metadata name",
            MetadataString => "metadata string",
            AttrGroup => "attribute group",
            Define => "define",
            Declare => "declare",
            True => "true",
            False => "false",
            Null => "null",
            Undef => "undef",
            LeftParen => "(",
            RightParen => ")",
            LeftBracket => "[",
            RightBracket => "]",
            LeftBrace => "{",
            RightBrace => "}",
            Comma => ",",
            Equal => "=",
            Colon => ":",
            Star => "*",
            Bang => "!",
            Ellipsis => "...",
            Eof => "end of file",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
