//! Path pattern forms and their compilation to regular expressions.
//!
//! Supported syntax for string patterns:
//! * literal text, compared segment-wise
//! * `:name` captures one non-empty segment
//! * `:name?` makes the parameter (and the `/` before it) optional
//! * `:name(expr)` captures with a custom expression
//! * `(expr)` captures with a custom expression under a numeric key
//! * `*` captures any remainder under a numeric key
use std::fmt;

use regex::Regex;
use thiserror::Error;

/// Problems found while turning a pattern string into a matcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatternError {
    #[error("Unbalanced parenthesis at offset {0}")]
    Unbalanced(usize),

    #[error("Empty capture expression at offset {0}")]
    EmptyExpression(usize),

    #[error("Invalid expression: {0}")]
    Regex(String),
}

/// A path pattern as given at registration time.
#[derive(Debug, Clone)]
pub enum PathPattern {
    /// Literal path, possibly containing parameter syntax
    Literal(String),
    /// Precompiled expression, used as-is
    Regex(Regex),
    /// Alternatives tried in order; the first that matches wins
    List(Vec<PathPattern>),
}

impl PathPattern {
    /// The root pattern `/`.
    pub fn root() -> Self {
        Self::Literal("/".to_string())
    }

    /// The path text of a literal pattern; routes are shared only between
    /// registrations of the same literal path.
    pub fn literal_path(&self) -> Option<&str> {
        match self {
            Self::Literal(path) => Some(path),
            Self::Regex(_) | Self::List(_) => None,
        }
    }
}

impl Default for PathPattern {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(path) => f.write_str(path),
            Self::Regex(regex) => write!(f, "/{}/", regex.as_str()),
            Self::List(patterns) => {
                f.write_str("[")?;
                for (i, pattern) in patterns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{pattern}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for PathPattern {
    fn from(path: &str) -> Self {
        Self::Literal(path.to_string())
    }
}

impl From<String> for PathPattern {
    fn from(path: String) -> Self {
        Self::Literal(path)
    }
}

impl From<&String> for PathPattern {
    fn from(path: &String) -> Self {
        Self::Literal(path.clone())
    }
}

impl From<Regex> for PathPattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

impl<T: Into<PathPattern>> From<Vec<T>> for PathPattern {
    fn from(patterns: Vec<T>) -> Self {
        Self::List(patterns.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<PathPattern>, const N: usize> From<[T; N]> for PathPattern {
    fn from(patterns: [T; N]) -> Self {
        Self::List(patterns.into_iter().map(Into::into).collect())
    }
}

/// One lexical piece of a string pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Literal(String),
    Capture {
        name: String,
        expr: Option<String>,
        optional: bool,
        /// Whether the capture swallowed the `/` preceding it
        prefixed: bool,
    },
    Wildcard {
        name: String,
    },
}

impl Token {
    pub(crate) fn is_literal(&self) -> bool {
        matches!(self, Token::Literal(_))
    }
}

/// Split a pattern string into literal and capture tokens.
pub(crate) fn tokenize(pattern: &str) -> Result<Vec<Token>, PatternError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut unnamed = 0usize;
    let mut chars = pattern.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            ':' => {
                let mut name = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    literal.push(':');
                    continue;
                }
                let expr = match chars.peek() {
                    Some(&(open, '(')) => {
                        chars.next();
                        Some(read_group(&mut chars, open)?)
                    }
                    _ => None,
                };
                let optional = chars.next_if(|&(_, next)| next == '?').is_some();
                let prefixed = literal.ends_with('/');
                if prefixed {
                    literal.pop();
                }
                flush(&mut tokens, &mut literal);
                tokens.push(Token::Capture {
                    name,
                    expr,
                    optional,
                    prefixed,
                });
            }
            '(' => {
                let expr = read_group(&mut chars, offset)?;
                let optional = chars.next_if(|&(_, next)| next == '?').is_some();
                let prefixed = optional && literal.ends_with('/');
                if prefixed {
                    literal.pop();
                }
                flush(&mut tokens, &mut literal);
                tokens.push(Token::Capture {
                    name: unnamed.to_string(),
                    expr: Some(expr),
                    optional,
                    prefixed,
                });
                unnamed += 1;
            }
            '*' => {
                flush(&mut tokens, &mut literal);
                tokens.push(Token::Wildcard {
                    name: unnamed.to_string(),
                });
                unnamed += 1;
            }
            other => literal.push(other),
        }
    }

    flush(&mut tokens, &mut literal);
    Ok(tokens)
}

fn flush(tokens: &mut Vec<Token>, literal: &mut String) {
    if !literal.is_empty() {
        tokens.push(Token::Literal(std::mem::take(literal)));
    }
}

/// Read a parenthesised expression whose `(` sits at `open`; nested groups
/// and escaped characters are kept verbatim.
fn read_group<I>(chars: &mut std::iter::Peekable<I>, open: usize) -> Result<String, PatternError>
where
    I: Iterator<Item = (usize, char)>,
{
    let mut depth = 1usize;
    let mut expr = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => {
                expr.push(c);
                if let Some((_, escaped)) = chars.next() {
                    expr.push(escaped);
                }
            }
            '(' => {
                depth += 1;
                expr.push(c);
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if expr.is_empty() {
                        return Err(PatternError::EmptyExpression(open));
                    }
                    return Ok(expr);
                }
                expr.push(c);
            }
            _ => expr.push(c),
        }
    }
    Err(PatternError::Unbalanced(open))
}

/// Regular expression source for a token list plus the parameter names in
/// group order (`p0`, `p1`, ... map onto the returned names).
pub(crate) fn regex_source(tokens: &[Token], case_sensitive: bool) -> (String, Vec<String>) {
    let mut source = String::new();
    let mut keys = Vec::new();

    for token in tokens {
        match token {
            Token::Literal(text) => push_literal(&mut source, text, case_sensitive),
            Token::Capture {
                name,
                expr,
                optional,
                prefixed,
            } => {
                let group = format!(
                    "(?P<p{}>{})",
                    keys.len(),
                    expr.as_deref().unwrap_or("[^/]+")
                );
                keys.push(name.clone());
                match (prefixed, optional) {
                    (true, true) => source.push_str(&format!("(?:/{group})?")),
                    (true, false) => source.push_str(&format!("/{group}")),
                    (false, true) => source.push_str(&format!("{group}?")),
                    (false, false) => source.push_str(&group),
                }
            }
            Token::Wildcard { name } => {
                source.push_str(&format!("(?P<p{}>(?s:.*))", keys.len()));
                keys.push(name.clone());
            }
        }
    }

    (source, keys)
}

/// Escape literal text, folding ASCII letters when matching is case-insensitive.
fn push_literal(source: &mut String, text: &str, case_sensitive: bool) {
    let mut buf = [0u8; 4];
    for c in text.chars() {
        if !case_sensitive && c.is_ascii_alphabetic() {
            source.push('[');
            source.push(c.to_ascii_lowercase());
            source.push(c.to_ascii_uppercase());
            source.push(']');
        } else {
            source.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
    }
}
