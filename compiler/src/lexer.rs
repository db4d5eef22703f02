// Lexer for symbolic expression text.
//
// Ranges, subsets and volumes are persisted as text (`0:N:32`, `i + j`,
// `32*ceil(N/32)`). This module tokenizes that text with the `logos` crate;
// `parser` turns the tokens into expression trees.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in expression text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Expression token types.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // ── Operators ──
    //
    // `**` and `//` are listed before their one-character prefixes; logos
    // prefers the longest match regardless, the order is for readability.
    #[token("**")]
    StarStar,
    #[token("*")]
    Star,
    #[token("//")]
    SlashSlash,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,

    // ── Punctuation ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,

    // ── Literals ──
    /// Non-negative integer literal. Negative values are unary minus.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::StarStar => write!(f, "**"),
            Token::Star => write!(f, "*"),
            Token::SlashSlash => write!(f, "//"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Ident(name) => write!(f, "{name}"),
        }
    }
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex expression text into tokens.
///
/// Errors for unrecognised characters are collected; lexing continues past
/// them.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn range_text() {
        assert_eq!(
            lex_ok("0:N:32"),
            vec![
                Token::Int(0),
                Token::Colon,
                Token::Ident("N".into()),
                Token::Colon,
                Token::Int(32),
            ]
        );
    }

    #[test]
    fn operators_longest_match() {
        assert_eq!(
            lex_ok("a**2 // b * c / d"),
            vec![
                Token::Ident("a".into()),
                Token::StarStar,
                Token::Int(2),
                Token::SlashSlash,
                Token::Ident("b".into()),
                Token::Star,
                Token::Ident("c".into()),
                Token::Slash,
                Token::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn function_call() {
        assert_eq!(
            lex_ok("32*ceil(N/32)"),
            vec![
                Token::Int(32),
                Token::Star,
                Token::Ident("ceil".into()),
                Token::LParen,
                Token::Ident("N".into()),
                Token::Slash,
                Token::Int(32),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn spans_are_byte_offsets() {
        let result = lex("i + 10");
        let spans: Vec<_> = result.tokens.iter().map(|(_, s)| (s.start, s.end)).collect();
        assert_eq!(spans, vec![(0, 1), (2, 3), (4, 6)]);
    }

    #[test]
    fn bad_character_is_reported_and_skipped() {
        let result = lex("N $ 1");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.tokens.len(), 2);
    }
}
