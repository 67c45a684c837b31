//! The rule-source tokenizer.
//!
//! The whole input is tokenized up front into a buffered list, which is
//! what makes unlimited lookahead and rewind cheap: the cursor is an
//! index, [`Tokenizer::unget`] steps it back one token, and
//! [`Tokenizer::mark`]/[`Tokenizer::rewind`] restore it across the
//! multi-token comparisons the module cache protocol performs.
//!
//! Input may come from an in-memory string, any reader, or a file path —
//! the parser cannot tell the difference.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

use crate::error::RuleError;

/// Maximum length of a single token, in bytes.
pub const MAX_TOKEN: usize = 1024;

/// Characters that lex as single-character `Key` tokens.
pub const KEY_CHARS: &[char] = &[':', ';', '(', ')', '!', '&', '|', ',', '%'];

/// Reserved words with built-in meaning in rule bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Allow,
    Deny,
    Continue,
    Drop,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Keyword> {
        match word {
            "allow" => Some(Keyword::Allow),
            "deny" => Some(Keyword::Deny),
            "continue" => Some(Keyword::Continue),
            "drop" => Some(Keyword::Drop),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Keyword::Allow => "allow",
            Keyword::Deny => "deny",
            Keyword::Continue => "continue",
            Keyword::Drop => "drop",
        }
    }
}

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A single key character (`: ; ( ) ! & | , %`).
    Key,
    /// A bare word; may carry a [`Keyword`] id.
    Word,
    /// A quoted string, escapes already decoded.
    Str,
}

/// One classified token with its source line for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub keyword: Option<Keyword>,
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
}

impl Token {
    /// Is this the given key character?
    pub fn is_key(&self, ch: char) -> bool {
        self.kind == TokenKind::Key && self.text.chars().next() == Some(ch)
    }

    /// Is this a word or string usable as a free-form argument?
    pub fn is_text(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Str)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Str => write!(f, "\"{}\"", self.text),
            _ => write!(f, "{}", self.text),
        }
    }
}

/// Tokenization failures, reported against the line being lexed.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token too long near line {0}")]
    TooLong(u32),

    #[error("read failure: {0}")]
    Read(#[from] io::Error),

    #[error("lex failure near line {line}: {reason}")]
    Lex { line: u32, reason: String },
}

impl From<TokenError> for RuleError {
    fn from(err: TokenError) -> RuleError {
        match err {
            TokenError::Read(e) => RuleError::System(e),
            TokenError::TooLong(line) => RuleError::usage(line, "token too long"),
            TokenError::Lex { line, reason } => RuleError::usage(line, reason),
        }
    }
}

/// A rewindable cursor over a fully-buffered token list.
#[derive(Debug)]
pub struct Tokenizer {
    tokens: Vec<Token>,
    pos: usize,
}

/// An opaque cursor position for [`Tokenizer::rewind`].
#[derive(Debug, Clone, Copy)]
pub struct Mark(usize);

impl Tokenizer {
    /// Tokenize an in-memory buffer.
    pub fn from_source(source: &str) -> Result<Tokenizer, TokenError> {
        Ok(Tokenizer {
            tokens: lex(source)?,
            pos: 0,
        })
    }

    /// Read a source to end and tokenize it.
    pub fn from_reader(mut reader: impl Read) -> Result<Tokenizer, TokenError> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        Tokenizer::from_source(&source)
    }

    /// Tokenize the contents of a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Tokenizer, TokenError> {
        let source = std::fs::read_to_string(path)?;
        Tokenizer::from_source(&source)
    }

    /// Look at the next token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Consume and return the next token.
    pub fn get(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(token)
    }

    /// Push back exactly one previously-issued token.
    pub fn unget(&mut self) {
        debug_assert!(self.pos > 0, "unget before any get");
        self.pos = self.pos.saturating_sub(1);
    }

    /// Record the cursor position.
    pub fn mark(&self) -> Mark {
        Mark(self.pos)
    }

    /// Restore a previously recorded position.
    pub fn rewind(&mut self, mark: Mark) {
        debug_assert!(mark.0 <= self.tokens.len());
        self.pos = mark.0;
    }

    /// The source line of the next token, or of the last token at EOF.
    /// Used to anchor diagnostics.
    pub fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    /// All remaining tokens, without consuming them.
    pub fn remaining(&self) -> &[Token] {
        &self.tokens[self.pos..]
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

fn lex(source: &str) -> Result<Vec<Token>, TokenError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;

    while let Some(&c) = chars.peek() {
        // Whitespace
        if c == '\n' {
            line += 1;
            chars.next();
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        // Hash comment to end of line
        if c == '#' {
            for c in chars.by_ref() {
                if c == '\n' {
                    line += 1;
                    break;
                }
            }
            continue;
        }

        // Key character
        if KEY_CHARS.contains(&c) {
            chars.next();
            tokens.push(Token {
                keyword: None,
                kind: TokenKind::Key,
                text: c.to_string(),
                line,
            });
            continue;
        }

        // Quoted string with escape decoding
        if c == '"' {
            chars.next();
            let text = lex_string(&mut chars, &mut line)?;
            tokens.push(Token {
                keyword: None,
                kind: TokenKind::Str,
                text,
                line,
            });
            continue;
        }

        // Bare word
        let mut text = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '"' || c == '#' || KEY_CHARS.contains(&c) {
                break;
            }
            text.push(c);
            chars.next();
            if text.len() > MAX_TOKEN {
                return Err(TokenError::TooLong(line));
            }
        }
        tokens.push(Token {
            keyword: Keyword::from_word(&text),
            kind: TokenKind::Word,
            text,
            line,
        });
    }

    Ok(tokens)
}

/// Lex a quoted string body, decoding `\xNN`, `\c`, and `^C` escapes.
/// The opening quote has been consumed; consumes through the closing one.
fn lex_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: &mut u32,
) -> Result<String, TokenError> {
    let start = *line;
    let mut text = String::new();

    loop {
        let c = chars.next().ok_or_else(|| TokenError::Lex {
            line: start,
            reason: "unterminated string".to_string(),
        })?;
        match c {
            '"' => return Ok(text),
            '\n' => {
                *line += 1;
                text.push(c);
            }
            '\\' => {
                let next = chars.next().ok_or_else(|| TokenError::Lex {
                    line: start,
                    reason: "dangling escape".to_string(),
                })?;
                if next == 'x' {
                    let hi = chars.next().and_then(|c| c.to_digit(16));
                    let lo = chars.next().and_then(|c| c.to_digit(16));
                    match (hi, lo) {
                        (Some(hi), Some(lo)) => {
                            text.push(char::from_u32((hi << 4) | lo).unwrap());
                        }
                        _ => {
                            return Err(TokenError::Lex {
                                line: start,
                                reason: "bad hex escape".to_string(),
                            });
                        }
                    }
                } else {
                    text.push(next);
                }
            }
            '^' => {
                let next = chars.next().ok_or_else(|| TokenError::Lex {
                    line: start,
                    reason: "dangling caret".to_string(),
                })?;
                text.push(char::from_u32(next as u32 ^ 0x40).unwrap_or(next));
            }
            _ => text.push(c),
        }
        if text.len() > MAX_TOKEN {
            return Err(TokenError::TooLong(start));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(TokenKind, String)> {
        let t = Tokenizer::from_source(source).unwrap();
        t.remaining()
            .iter()
            .map(|t| (t.kind, t.text.clone()))
            .collect()
    }

    #[test]
    fn test_rule_line_tokenizes() {
        let got = kinds("%default method:string = \"GET\" : deny");
        assert_eq!(
            got,
            vec![
                (TokenKind::Key, "%".into()),
                (TokenKind::Word, "default".into()),
                (TokenKind::Word, "method".into()),
                (TokenKind::Key, ":".into()),
                (TokenKind::Word, "string".into()),
                (TokenKind::Word, "=".into()),
                (TokenKind::Str, "GET".into()),
                (TokenKind::Key, ":".into()),
                (TokenKind::Word, "deny".into()),
            ]
        );
    }

    #[test]
    fn test_keywords_classified() {
        let t = Tokenizer::from_source("allow deny continue drop allowx").unwrap();
        let ids: Vec<Option<Keyword>> = t.remaining().iter().map(|t| t.keyword).collect();
        assert_eq!(
            ids,
            vec![
                Some(Keyword::Allow),
                Some(Keyword::Deny),
                Some(Keyword::Continue),
                Some(Keyword::Drop),
                None,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let got = kinds("a # comment ; with : keys\nb");
        assert_eq!(
            got,
            vec![(TokenKind::Word, "a".into()), (TokenKind::Word, "b".into())]
        );
    }

    #[test]
    fn test_line_numbers() {
        let t = Tokenizer::from_source("a\nb\n\nc").unwrap();
        let lines: Vec<u32> = t.remaining().iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 4]);
    }

    #[test]
    fn test_string_escapes() {
        let got = kinds(r#""a\"b" "\x41" "^A""#);
        assert_eq!(got[0].1, "a\"b");
        assert_eq!(got[1].1, "A");
        assert_eq!(got[2].1, "\u{1}");
    }

    #[test]
    fn test_unterminated_string() {
        let err = Tokenizer::from_source("\"never closed").unwrap_err();
        assert!(matches!(err, TokenError::Lex { .. }));
        assert!(err.to_string().contains("near line 1"));
    }

    #[test]
    fn test_too_long() {
        let long = "w".repeat(MAX_TOKEN + 10);
        assert!(matches!(
            Tokenizer::from_source(&long),
            Err(TokenError::TooLong(1))
        ));
    }

    #[test]
    fn test_unget_and_rewind() {
        let mut t = Tokenizer::from_source("a b c").unwrap();
        assert_eq!(t.get().unwrap().text, "a");
        let mark = t.mark();
        assert_eq!(t.get().unwrap().text, "b");
        assert_eq!(t.get().unwrap().text, "c");
        t.rewind(mark);
        assert_eq!(t.get().unwrap().text, "b");
        t.unget();
        assert_eq!(t.get().unwrap().text, "b");
    }

    #[test]
    fn test_sources_equivalent() {
        let text = "%default uid:uid = 0 : deny";
        let a = Tokenizer::from_source(text).unwrap();
        let b = Tokenizer::from_reader(text.as_bytes()).unwrap();
        assert_eq!(a.remaining(), b.remaining());
    }
}
