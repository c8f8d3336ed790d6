//! Identifier escaping for table, schema and column names.
//!
//! User-supplied names are never interpolated into SQL as-is. A name is
//! either a single identifier, escaped with [`escape_identifier`], or a dotted
//! qualified name of up to four parts (`server.database.schema.object`),
//! parsed by [`parse_qualified_name`] and escaped part by part.

use crate::core::ParseError;
use std::fmt;

/// Maximum number of parts in a qualified name.
pub const MAX_NAME_PARTS: usize = 4;

/// An ordered list of raw (unescaped) name parts, e.g. `["dbo", "Users"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    parts: Vec<String>,
}

impl QualifiedName {
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Bracket-quotes every part and joins them with `.`.
    pub fn escaped(&self) -> String {
        self.parts
            .iter()
            .map(|part| quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.escaped())
    }
}

/// Escapes a single identifier into bracket form.
///
/// Surrounding whitespace is trimmed and one layer of existing brackets is
/// removed before every `]` is doubled and the result re-wrapped, so escaping
/// an already escaped plain identifier returns it unchanged. Empty input
/// yields an empty string.
pub fn escape_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let inner = if is_bracketed(trimmed) {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };
    quote_identifier(inner)
}

/// Parses and escapes a dotted qualified name such as `dbo.Users` or
/// `[my schema].[my.table]`.
///
/// Empty input yields an empty string.
pub fn escape_qualified_name(raw: &str) -> Result<String, ParseError> {
    Ok(parse_qualified_name(raw)?.escaped())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Inside an unquoted part, or at the start of any part
    Unquoted,
    /// Inside `[...]`
    Quoted,
    /// A quoted part just closed; only `.` or the end may follow
    BetweenSeparators,
}

/// Splits a qualified name into its raw parts in one forward scan.
///
/// Inside brackets `.` and `[` are literal and `]]` is a literal `]`.
/// Outside brackets parts must be plain identifiers: a letter, `_`, `@` or
/// `#` first, then letters, digits, `_`, `@`, `#` or `$`.
pub fn parse_qualified_name(raw: &str) -> Result<QualifiedName, ParseError> {
    let input = raw.trim();
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut state = ScanState::Unquoted;
    let mut chars = input.chars().peekable();

    let fail = |reason: &str| ParseError::new(reason, input);

    while let Some(c) = chars.next() {
        match (state, c) {
            (ScanState::Quoted, ']') => {
                if chars.peek() == Some(&']') {
                    chars.next();
                    current.push(']');
                } else {
                    push_part(&mut parts, &mut current).map_err(&fail)?;
                    state = ScanState::BetweenSeparators;
                }
            }
            (ScanState::Quoted, c) => current.push(c),

            (ScanState::Unquoted, '[') if current.is_empty() => state = ScanState::Quoted,
            (ScanState::Unquoted, ']') | (ScanState::BetweenSeparators, ']') => {
                return Err(fail("unescaped ']' outside brackets"));
            }
            (ScanState::Unquoted, '.') => push_part(&mut parts, &mut current).map_err(&fail)?,
            (ScanState::Unquoted, c) => {
                if !is_identifier_char(c, current.is_empty()) {
                    return Err(fail(&format!("invalid character {:?} in unquoted name", c)));
                }
                current.push(c);
            }

            (ScanState::BetweenSeparators, '.') => state = ScanState::Unquoted,
            (ScanState::BetweenSeparators, c) => {
                return Err(fail(&format!("unexpected character {:?} after closing bracket", c)));
            }
        }
    }

    match state {
        ScanState::Quoted => return Err(fail("unterminated bracket")),
        ScanState::Unquoted if !input.is_empty() => {
            push_part(&mut parts, &mut current).map_err(&fail)?
        }
        _ => {}
    }

    Ok(QualifiedName { parts })
}

/// Moves the current part into `parts`, enforcing non-empty parts and the
/// part limit.
fn push_part(parts: &mut Vec<String>, current: &mut String) -> Result<(), &'static str> {
    if current.is_empty() {
        return Err("empty name part");
    }
    if parts.len() == MAX_NAME_PARTS {
        return Err("too many name parts (at most 4: server.database.schema.object)");
    }
    parts.push(std::mem::take(current));
    Ok(())
}

/// Bracket-quotes a raw name exactly as given, doubling every `]`.
///
/// Unlike [`escape_identifier`] nothing is trimmed or unwrapped, so this is
/// the form to use for names read back from the schema.
pub fn quote_identifier(part: &str) -> String {
    format!("[{}]", part.replace(']', "]]"))
}

fn is_bracketed(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('[') && s.ends_with(']')
}

fn is_identifier_char(c: char, first: bool) -> bool {
    if c.is_alphabetic() || c == '_' || c == '@' || c == '#' {
        return true;
    }
    !first && (c.is_ascii_digit() || c == '$')
}
