//! Code-sequence pattern grammar.
//!
//! A pattern is a whitespace-separated list of tokens:
//!
//! ```text
//! 8            literal code
//! .            any single code
//! [12]         class of single-digit codes (1 or 2)
//! [101,102]    class of arbitrary codes
//! (1040|2064)  alternation, captured as context
//! (#[12])      the anchor; any of the forms above inside (# … )
//! (?!(1040|2064))  zero-width: the next code must not be 1040 or 2064
//! ```
//!
//! Consuming tokens occupy consecutive stream slots. A negative lookahead
//! constrains the slot of the next consuming token (or the slot after the
//! last one when it comes last) and is satisfied when that slot is past the
//! end of the stream.

use std::fmt;

use crate::error::{Error, Result};
use crate::stream::CodeStream;
use crate::value::TagValue;

// ── Tokens ────────────────────────────────────────────────────────────────

/// Set of codes one slot accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeClass {
    Any,
    Codes(Vec<i64>),
    /// Named hole filled by [`crate::codemap::template`] before compiling.
    Placeholder(String),
}

impl CodeClass {
    #[inline]
    pub fn contains(&self, code: i64) -> bool {
        match self {
            CodeClass::Any => true,
            CodeClass::Codes(codes) => codes.contains(&code),
            CodeClass::Placeholder(_) => false,
        }
    }

    fn parse(expr: &str) -> Option<CodeClass> {
        let expr = expr.trim();
        if expr == "." {
            return Some(CodeClass::Any);
        }
        if let Some(inner) = strip_wrapped(expr, "(", ")") {
            return CodeClass::parse(inner);
        }
        if let Some(inner) = strip_wrapped(expr, "[", "]") {
            let codes = if inner.contains(',') || inner.contains('|') {
                parse_code_list(inner)?
            } else {
                inner
                    .chars()
                    .map(|c| c.to_digit(10).map(i64::from))
                    .collect::<Option<Vec<_>>>()?
            };
            return (!codes.is_empty()).then_some(CodeClass::Codes(codes));
        }
        if expr.contains('|') {
            return parse_code_list(expr).map(CodeClass::Codes);
        }
        if let Ok(code) = expr.parse::<i64>() {
            return Some(CodeClass::Codes(vec![code]));
        }
        let is_ident = !expr.is_empty()
            && expr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && expr.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        is_ident.then(|| CodeClass::Placeholder(expr.to_string()))
    }
}

impl fmt::Display for CodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeClass::Any => f.write_str("."),
            CodeClass::Codes(codes) if codes.len() == 1 => write!(f, "{}", codes[0]),
            CodeClass::Codes(codes) => {
                let parts: Vec<String> = codes.iter().map(i64::to_string).collect();
                write!(f, "[{}]", parts.join(","))
            }
            CodeClass::Placeholder(name) => f.write_str(name),
        }
    }
}

fn strip_wrapped<'a>(s: &'a str, open: &str, close: &str) -> Option<&'a str> {
    s.strip_prefix(open)?.strip_suffix(close)
}

fn parse_code_list(s: &str) -> Option<Vec<i64>> {
    s.split([',', '|'])
        .map(|p| p.trim().parse::<i64>().ok())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Consumes one slot.
    Match {
        class: CodeClass,
        anchor: bool,
        captured: bool,
    },
    /// Zero-width check on the next slot.
    NotFollowedBy(Vec<i64>),
}

impl Token {
    pub fn literal(code: i64) -> Token {
        Token::Match { class: CodeClass::Codes(vec![code]), anchor: false, captured: false }
    }

    pub fn anchor(class: CodeClass) -> Token {
        Token::Match { class, anchor: true, captured: false }
    }

    pub fn is_anchor(&self) -> bool {
        matches!(self, Token::Match { anchor: true, .. })
    }

    /// Parse one whitespace-free token. `None` means the token is malformed.
    pub fn parse(tok: &str) -> Option<Token> {
        if let Some(inner) = strip_wrapped(tok, "(?!", ")") {
            let class = CodeClass::parse(inner)?;
            return match class {
                CodeClass::Codes(codes) => Some(Token::NotFollowedBy(codes)),
                _ => None,
            };
        }
        if let Some(inner) = strip_wrapped(tok, "(#", ")") {
            return CodeClass::parse(inner).map(Token::anchor);
        }
        if let Some(inner) = strip_wrapped(tok, "(", ")") {
            return CodeClass::parse(inner)
                .map(|class| Token::Match { class, anchor: false, captured: true });
        }
        CodeClass::parse(tok).map(|class| Token::Match { class, anchor: false, captured: false })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Match { class, anchor: true, .. } => write!(f, "(#{class})"),
            Token::Match { class, captured: true, .. } => write!(f, "({class})"),
            Token::Match { class, .. } => write!(f, "{class}"),
            Token::NotFollowedBy(codes) => {
                let parts: Vec<String> = codes.iter().map(i64::to_string).collect();
                write!(f, "(?!({}))", parts.join("|"))
            }
        }
    }
}

/// Split a pattern string into tokens.
pub fn tokenize(pattern: &str) -> std::result::Result<Vec<Token>, String> {
    pattern
        .split_whitespace()
        .map(|t| Token::parse(t).ok_or_else(|| t.to_string()))
        .collect()
}

/// Canonical text form of a token list.
pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(Token::to_string).collect::<Vec<_>>().join(" ")
}

// ── Compiled pattern ──────────────────────────────────────────────────────

/// One consuming slot, addressed relative to the anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub offset: isize,
    pub class: CodeClass,
    pub captured: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lookahead {
    pub offset: isize,
    pub forbidden: Vec<i64>,
}

/// A compiled code-sequence pattern with its tag values.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeSequencePattern {
    /// Declaration index within the codemap.
    pub pattern_id: usize,
    /// Canonical pattern text.
    pub regexp: String,
    /// Index of the anchor among the consuming tokens.
    pub anchor_index: usize,
    /// Anchor slot class.
    pub anchor: CodeClass,
    /// Non-anchor consuming slots.
    pub slots: Vec<Slot>,
    pub lookaheads: Vec<Lookahead>,
    /// One value per codemap tag column, in column order.
    pub tag_values: Vec<TagValue>,
}

impl CodeSequencePattern {
    /// Compile `tokens`. Fails unless exactly one token is the anchor and no
    /// placeholder is left unbound.
    pub fn compile(pattern_id: usize, tokens: &[Token], tag_values: Vec<TagValue>) -> Result<Self> {
        let regexp = render(tokens);
        let anchors = tokens.iter().filter(|t| t.is_anchor()).count();
        if anchors != 1 {
            return Err(Error::schema(format!(
                "pattern {pattern_id} '{regexp}': expected exactly one anchor token, found {anchors}"
            )));
        }

        let mut consuming: Vec<(CodeClass, bool, bool)> = Vec::new();
        let mut pending: Vec<(usize, Vec<i64>)> = Vec::new();
        for tok in tokens {
            match tok {
                Token::Match { class, anchor, captured } => {
                    if let CodeClass::Placeholder(name) = class {
                        return Err(Error::schema(format!(
                            "pattern {pattern_id} '{regexp}': unbound placeholder '{name}'"
                        )));
                    }
                    consuming.push((class.clone(), *anchor, *captured));
                }
                Token::NotFollowedBy(codes) => pending.push((consuming.len(), codes.clone())),
            }
        }

        // exactly one anchor was counted above
        let anchor_index = consuming.iter().position(|(_, a, _)| *a).unwrap_or(0);
        let anchor = consuming[anchor_index].0.clone();
        let slots = consuming
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != anchor_index)
            .map(|(i, (class, _, captured))| Slot {
                offset: i as isize - anchor_index as isize,
                class: class.clone(),
                captured: *captured,
            })
            .collect();
        let lookaheads = pending
            .into_iter()
            .map(|(slot, forbidden)| Lookahead {
                offset: slot as isize - anchor_index as isize,
                forbidden,
            })
            .collect();

        Ok(Self { pattern_id, regexp, anchor_index, anchor, slots, lookaheads, tag_values })
    }

    /// Parse and compile a pattern string.
    pub fn parse(pattern_id: usize, pattern: &str, tag_values: Vec<TagValue>) -> Result<Self> {
        let tokens = tokenize(pattern).map_err(|bad| {
            Error::schema(format!("pattern {pattern_id} '{pattern}': malformed token '{bad}'"))
        })?;
        Self::compile(pattern_id, &tokens, tag_values)
    }

    /// Does the pattern match with its anchor at stream index `position`?
    ///
    /// Literal and class slots fail when their neighbour is missing;
    /// lookaheads succeed vacuously.
    pub fn matches_at(&self, stream: &CodeStream, position: usize) -> bool {
        let pos = position as isize;
        match stream.code_at(pos) {
            Some(code) if self.anchor.contains(code) => {}
            _ => return false,
        }
        let slots_ok = self.slots.iter().all(|slot| {
            stream.code_at(pos + slot.offset).is_some_and(|c| slot.class.contains(c))
        });
        slots_ok
            && self.lookaheads.iter().all(|la| {
                stream.code_at(pos + la.offset).map_or(true, |c| !la.forbidden.contains(&c))
            })
    }

    /// Relative offsets of captured context slots.
    pub fn captured_offsets(&self) -> impl Iterator<Item = isize> + '_ {
        self.slots.iter().filter(|s| s.captured).map(|s| s.offset)
    }

    /// Codes the anchor can match, or `None` for a wildcard anchor.
    pub fn anchor_codes(&self) -> Option<&[i64]> {
        match &self.anchor {
            CodeClass::Codes(codes) => Some(codes),
            _ => None,
        }
    }
}
