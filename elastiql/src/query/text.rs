//! Text matching shared by the query DSL and query strings
//!
//! The mapped mode of a field decides how a text value is compared:
//! `keyword` matches exactly, `keyword-ignore-case` lower-cases both sides,
//! `text` (and unmapped fields) match a whole word case-insensitively and
//! `contains` matches any substring.

use crate::context::QueryContext;
use crate::literal::Literal;
use crate::mapping::FieldRef;
use crate::sql::{BinaryOp, Expr};

pub const MODE_KEYWORD: &str = "keyword";
pub const MODE_KEYWORD_IGNORE_CASE: &str = "keyword-ignore-case";
pub const MODE_TEXT: &str = "text";
pub const MODE_CONTAINS: &str = "contains";

const WORD_START: &str = r"(^|[ \t])";
const WORD_END: &str = r"([ \t]|$)";

/// A text operand and how its special characters are interpreted
#[derive(Debug, Clone, Copy)]
pub enum TextValue<'a> {
    /// `*` and `?` are wildcards, `\` escapes
    Term(&'a str),
    /// Matched literally
    Phrase(&'a str),
    /// A regular expression
    Regex(&'a str),
}

/// Build the text predicate for `field`. Returns `None` when the field is
/// mapped to a non-text type and should be compared as a plain value.
pub fn text_match(ctx: &QueryContext, field: &FieldRef, value: TextValue<'_>) -> Option<Expr> {
    let mode = field.field_type(ctx);
    let column = || Expr::Field(field.clone());
    let lower = || Expr::function("LOWER", vec![column()]);
    let re = |left: Expr, pattern: String| Expr::binary(BinaryOp::Regex, left, Expr::lit(pattern.as_str()));

    match value {
        TextValue::Term(text) => match mode.as_str() {
            MODE_KEYWORD => Some(match translate_wildcard(text) {
                (pattern, true) => similar_to(column(), pattern),
                (_, false) => eq(column(), text.to_string()),
            }),
            MODE_KEYWORD_IGNORE_CASE => Some(match translate_wildcard(text) {
                (pattern, true) => similar_to(lower(), pattern.to_lowercase()),
                (_, false) => eq(lower(), text.to_lowercase()),
            }),
            "" | MODE_TEXT => {
                let (esc, _) = translate_wildcard_to_regex(text);
                Some(re(column(), format!("{}(?i){}{}", WORD_START, esc, WORD_END)))
            }
            MODE_CONTAINS => {
                let (esc, _) = translate_wildcard_to_regex(text);
                Some(re(column(), format!("(?i){}", esc)))
            }
            _ => None,
        },
        TextValue::Phrase(text) => match mode.as_str() {
            MODE_KEYWORD => Some(eq(column(), text.to_string())),
            MODE_KEYWORD_IGNORE_CASE => Some(eq(lower(), text.to_lowercase())),
            "" | MODE_TEXT => Some(re(
                column(),
                format!("{}(?i){}{}", WORD_START, quote_meta(text), WORD_END),
            )),
            MODE_CONTAINS => Some(re(column(), format!("(?i){}", quote_meta(text)))),
            _ => None,
        },
        TextValue::Regex(pattern) => Some(match mode.as_str() {
            MODE_KEYWORD => re(column(), format!("^{}$", pattern)),
            MODE_KEYWORD_IGNORE_CASE => re(column(), format!("^(?i){}$", pattern)),
            MODE_CONTAINS => re(column(), format!("(?i){}", pattern)),
            _ => re(lower(), format!("{}{}{}", WORD_START, pattern, WORD_END)),
        }),
    }
}

fn eq(left: Expr, text: String) -> Expr {
    Expr::binary(BinaryOp::Eq, left, Expr::Literal(Literal::String(text)))
}

fn similar_to(left: Expr, pattern: String) -> Expr {
    Expr::binary(BinaryOp::SimilarTo, left, Expr::Literal(Literal::String(pattern)))
}

/// Escape regex metacharacters. Only `\.+*?()|[]{}^$` are escaped.
pub fn quote_meta(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if r"\.+*?()|[]{}^$".contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Lucene wildcards to SQL `SIMILAR TO`: `*` -> `%`, `?` -> `_`.
/// The flag reports whether any wildcard or escape was present.
pub fn translate_wildcard(text: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut wildcard = false;
    let mut escaping = false;
    for ch in text.chars() {
        if escaping {
            out.push(ch);
            escaping = false;
            continue;
        }
        match ch {
            '\\' => {
                escaping = true;
                wildcard = true;
            }
            '*' => {
                out.push('%');
                wildcard = true;
            }
            '?' => {
                out.push('_');
                wildcard = true;
            }
            _ => out.push(ch),
        }
    }
    (out, wildcard)
}

/// Lucene wildcards to a regular expression: `*` -> `.*`, `?` -> `.`,
/// everything else quoted.
pub fn translate_wildcard_to_regex(text: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len() * 2);
    let mut wildcard = false;
    let mut escaping = false;
    for ch in text.chars() {
        if escaping {
            out.push_str(&quote_meta(ch.encode_utf8(&mut [0; 4])));
            escaping = false;
            continue;
        }
        match ch {
            '\\' => {
                escaping = true;
                wildcard = true;
            }
            '*' => {
                out.push_str(".*");
                wildcard = true;
            }
            '?' => {
                out.push('.');
                wildcard = true;
            }
            _ => out.push_str(&quote_meta(ch.encode_utf8(&mut [0; 4]))),
        }
    }
    (out, wildcard)
}

/// Lucene wildcards to SQL `LIKE`: `*` -> `%`, `?` -> `_`
pub fn translate_like(text: &str) -> String {
    translate_wildcard(text).0
}
