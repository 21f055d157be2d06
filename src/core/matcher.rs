//! Compiled path matchers.
//!
//! A [`PathMatcher`] is built once at registration and never changes. Testing
//! a path is pure: the match result (consumed prefix, captured params) is
//! returned to the caller and never cached on the matcher.
//!
//! Candidate paths are decoded segment by segment and brought to NFC before
//! comparison, so `/caf%C3%A9` and `/cafe%CC%81` both match a `/café` pattern.
//! The consumed prefix is reported back in the raw url's terms so routers can
//! strip it without re-encoding anything.
use std::{borrow::Cow, ops::Range};

use regex::Regex;
use unicode_normalization::{UnicodeNormalization, is_nfc};

use crate::core::{
    context::Params,
    pattern::{PathPattern, PatternError, Token, regex_source, tokenize},
};

/// How a pattern is compared against candidate paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Compare literal text exactly instead of folding ASCII case
    pub case_sensitive: bool,
    /// Require trailing-slash agreement between pattern and path
    pub strict: bool,
    /// Require the whole path to be consumed (otherwise a prefix match)
    pub end: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            strict: false,
            end: true,
        }
    }
}

/// Successful match of a path against a [`PathMatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// Raw (undecoded) prefix of the candidate consumed by the pattern
    pub matched: String,
    /// Parameters captured by the pattern, decoded and normalized
    pub params: Params,
}

#[derive(Debug)]
enum Strategy {
    /// Root prefix: matches any non-empty path, consumes nothing
    Slash,
    /// Literal text without captures
    Literal { text: String, trailing_slash: bool },
    /// Compiled string pattern; group `prefix` holds the consumed text
    Pattern { regex: Regex, keys: Vec<String> },
    /// Caller supplied expression, used as-is
    Expression { regex: Regex },
    /// First matching alternative wins
    Any(Vec<PathMatcher>),
}

/// A pattern compiled with fixed [`MatchOptions`].
#[derive(Debug)]
pub struct PathMatcher {
    strategy: Strategy,
    options: MatchOptions,
}

impl PathMatcher {
    /// Compile `pattern` under `options`.
    pub fn compile(pattern: &PathPattern, options: MatchOptions) -> Result<Self, PatternError> {
        let strategy = match pattern {
            PathPattern::Literal(path) => Self::compile_literal(path, options)?,
            PathPattern::Regex(regex) => Strategy::Expression {
                regex: regex.clone(),
            },
            PathPattern::List(patterns) => Strategy::Any(
                patterns
                    .iter()
                    .map(|p| Self::compile(p, options))
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(Self { strategy, options })
    }

    fn compile_literal(path: &str, options: MatchOptions) -> Result<Strategy, PatternError> {
        if path == "/" && !options.end && !options.strict {
            return Ok(Strategy::Slash);
        }

        let normalized: String = path.nfc().collect();
        let body = match normalized.strip_suffix('/') {
            Some(trimmed) if !options.strict => trimmed.to_string(),
            _ => normalized,
        };
        let trailing_slash = body.ends_with('/');

        let tokens = tokenize(&body)?;
        if tokens.iter().all(Token::is_literal) {
            return Ok(Strategy::Literal {
                text: body,
                trailing_slash,
            });
        }

        let (source, keys) = regex_source(&tokens, options.case_sensitive);
        let anchored = if options.end {
            format!("^{source}{}$", if options.strict { "" } else { "/?" })
        } else if trailing_slash {
            format!("^(?P<prefix>{source})")
        } else {
            format!("^(?P<prefix>{source})(?:/|$)")
        };
        let regex = Regex::new(&anchored).map_err(|e| PatternError::Regex(e.to_string()))?;
        Ok(Strategy::Pattern { regex, keys })
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    /// Whether this matcher consumes a prefix rather than the whole path.
    pub fn is_prefix(&self) -> bool {
        !self.options.end
    }

    /// Test a raw path (no query string).
    pub fn test(&self, path: &str) -> Option<PathMatch> {
        self.test_candidate(&Candidate::new(path))
    }

    /// Test an already prepared candidate.
    pub fn test_candidate(&self, candidate: &Candidate) -> Option<PathMatch> {
        if candidate.raw.is_empty() {
            return None;
        }

        let (consumed, params) = match &self.strategy {
            Strategy::Slash => (0, Params::new()),
            Strategy::Literal {
                text,
                trailing_slash,
            } => (self.match_literal(text, *trailing_slash, &candidate.text)?, Params::new()),
            Strategy::Pattern { regex, keys } => {
                let caps = regex.captures(&candidate.text)?;
                let consumed = match caps.name("prefix") {
                    Some(prefix) => prefix.end(),
                    None => candidate.text.len(),
                };
                let params = keys
                    .iter()
                    .enumerate()
                    .filter_map(|(i, key)| {
                        caps.name(&format!("p{i}"))
                            .map(|m| (key.clone(), m.as_str().to_string()))
                    })
                    .collect();
                (consumed, params)
            }
            Strategy::Expression { regex } => {
                let caps = regex.captures(&candidate.text)?;
                let whole = caps.get(0)?;
                if whole.start() != 0 {
                    return None;
                }
                let mut params = Params::new();
                let mut unnamed = 0usize;
                for (i, name) in regex.capture_names().enumerate().skip(1) {
                    let key = match name {
                        Some(name) => name.to_string(),
                        None => {
                            unnamed += 1;
                            (unnamed - 1).to_string()
                        }
                    };
                    if let Some(m) = caps.get(i) {
                        params.insert(key, m.as_str());
                    }
                }
                (whole.end(), params)
            }
            Strategy::Any(matchers) => {
                return matchers.iter().find_map(|m| m.test_candidate(candidate));
            }
        };

        let raw_end = candidate.raw_offset(consumed)?;
        Some(PathMatch {
            matched: candidate.raw[..raw_end].to_string(),
            params,
        })
    }

    /// Length of `path` consumed by literal `text`, if it matches.
    fn match_literal(&self, text: &str, trailing_slash: bool, path: &str) -> Option<usize> {
        let head = path.get(..text.len())?;
        let equal = if self.options.case_sensitive {
            head == text
        } else {
            head.eq_ignore_ascii_case(text)
        };
        if !equal {
            return None;
        }

        let rest = &path[text.len()..];
        let accepted = if self.options.end {
            rest.is_empty() || (!self.options.strict && rest == "/")
        } else {
            trailing_slash || rest.is_empty() || rest.starts_with('/')
        };
        accepted.then_some(text.len())
    }
}

/// A raw path prepared for matching: decoded, normalized, and mapped back to
/// offsets in the raw text.
#[derive(Debug, Clone)]
pub struct Candidate {
    raw: String,
    text: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
struct Segment {
    raw: Range<usize>,
    text: Range<usize>,
    /// Decoding and normalization left the segment untouched
    verbatim: bool,
}

impl Candidate {
    pub fn new(raw: &str) -> Self {
        let mut text = String::with_capacity(raw.len());
        let mut segments = Vec::new();
        let mut raw_start = 0usize;

        for (i, piece) in raw.split('/').enumerate() {
            if i > 0 {
                text.push('/');
                raw_start += 1;
            }
            let decoded = decode_segment(piece);
            let verbatim = decoded == piece;
            let text_start = text.len();
            text.push_str(&decoded);
            segments.push(Segment {
                raw: raw_start..raw_start + piece.len(),
                text: text_start..text.len(),
                verbatim,
            });
            raw_start += piece.len();
        }

        Self {
            raw: raw.to_string(),
            text,
            segments,
        }
    }

    /// Raw path this candidate was built from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decoded, normalized path used for comparison.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Map an offset in [`text`](Self::text) back to the raw path. Offsets
    /// inside a segment that decoding changed have no raw equivalent.
    fn raw_offset(&self, offset: usize) -> Option<usize> {
        for segment in &self.segments {
            if offset == segment.text.start {
                return Some(segment.raw.start);
            }
            if offset == segment.text.end {
                return Some(segment.raw.end);
            }
            if segment.text.contains(&offset) {
                return segment
                    .verbatim
                    .then(|| segment.raw.start + (offset - segment.text.start));
            }
        }
        None
    }
}

/// Percent-decode one segment and bring it to NFC. Undecodable input, and
/// input that would decode to a `/`, is kept as-is.
fn decode_segment(segment: &str) -> Cow<'_, str> {
    let decoded = match urlencoding::decode(segment) {
        Ok(decoded) if segment.contains('%') && !decoded.contains('/') => decoded,
        _ => Cow::Borrowed(segment),
    };
    if is_nfc(&decoded) {
        decoded
    } else {
        Cow::Owned(decoded.nfc().collect())
    }
}
