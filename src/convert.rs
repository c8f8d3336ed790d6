//! Conversion between typed column values and CSV text.
//!
//! Export renders every value as text; import parses text back using the
//! target column's type tag. Binary payloads travel in one of three
//! encodings selected per transfer.

use crate::core::db::{parse_timestamp, ColumnDescriptor, DataType, Value, DATETIME_FORMAT};
use crate::core::ConversionError;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::trace;
use uuid::Uuid;

/// Textual encoding of byte payloads in CSV fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryMode {
    /// Bytes written as text verbatim
    Raw,
    /// Lowercase hexadecimal, two digits per byte
    #[default]
    Hex,
    /// Standard base64 alphabet with padding
    Base64,
}

impl FromStr for BinaryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(BinaryMode::Raw),
            "hex" => Ok(BinaryMode::Hex),
            "base64" => Ok(BinaryMode::Base64),
            other => Err(format!(
                "unknown binary format '{}' (expected hex, base64 or raw)",
                other
            )),
        }
    }
}

impl fmt::Display for BinaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryMode::Raw => "raw",
            BinaryMode::Hex => "hex",
            BinaryMode::Base64 => "base64",
        })
    }
}

const TRUE_TOKENS: &[&str] = &["true", "1", "y", "yes", "t"];
const FALSE_TOKENS: &[&str] = &["false", "0", "n", "no", "f"];

static WKT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?is)^\s*",
        r"(POINT|LINESTRING|POLYGON|MULTIPOINT|MULTILINESTRING|MULTIPOLYGON|GEOMETRYCOLLECTION",
        r"|CIRCULARSTRING|COMPOUNDCURVE|CURVEPOLYGON|MULTICURVE|MULTISURFACE|FULLGLOBE)",
        r"(\s*(ZM|Z|M))?\s*(\(.*\)|EMPTY)?\s*$",
    ))
    .expect("WKT pattern is valid")
});

/// Renders a value as CSV text.
///
/// Null becomes the empty string. An integer in a bit column is rendered as
/// a boolean, since some drivers report bits as integers.
pub fn value_to_text(value: &Value, data_type: DataType, mode: BinaryMode) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) if data_type == DataType::Bit => (*i != 0).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Bytes(bytes) => encode_bytes(bytes, mode),
        Value::DateTime(ts) => ts.format(DATETIME_FORMAT).to_string(),
    }
}

/// Parses CSV text into a value for `column`.
///
/// Empty text is never an error: it becomes null for nullable columns and a
/// type default otherwise (zero, false, empty bytes or empty string).
pub fn text_to_value(
    text: &str,
    column: &ColumnDescriptor,
    mode: BinaryMode,
) -> Result<Value, ConversionError> {
    if text.is_empty() {
        if column.nullable {
            return Ok(Value::Null);
        }
        trace!("Substituting default for empty field in non-nullable column {}", column.name);
        return Ok(default_value(column.data_type));
    }

    let fail = |reason: String| ConversionError::new(&column.name, text, reason);

    match column.data_type {
        DataType::Integer => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| fail(format!("not an integer: {}", e))),
        DataType::Float => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| fail(format!("not a number: {}", e))),
        DataType::Decimal => {
            let trimmed = text.trim();
            trimmed
                .parse::<f64>()
                .map(|_| Value::Text(trimmed.to_string()))
                .map_err(|e| fail(format!("not a number: {}", e)))
        }
        DataType::Bit => parse_bit(text).map(Value::Bool).ok_or_else(|| {
            fail("not a boolean token (expected true/false, 1/0, y/n, yes/no, t/f)".to_string())
        }),
        DataType::Spatial if is_wkt(text) => Ok(Value::Text(text.to_string())),
        data_type if data_type.is_binary() => {
            decode_bytes(text, mode).map(Value::Bytes).map_err(fail)
        }
        DataType::Temporal => Ok(parse_timestamp(text)
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Text(text.to_string()))),
        DataType::Guid => Uuid::parse_str(text.trim())
            .map(|_| Value::Text(text.trim().to_string()))
            .map_err(|e| fail(format!("not a GUID: {}", e))),
        _ => Ok(Value::Text(text.to_string())),
    }
}

/// Value substituted for an empty field in a non-nullable column.
pub fn default_value(data_type: DataType) -> Value {
    match data_type {
        DataType::Integer | DataType::Decimal => Value::Int(0),
        DataType::Float => Value::Float(0.0),
        DataType::Bit => Value::Bool(false),
        t if t.is_binary() => Value::Bytes(Vec::new()),
        _ => Value::Text(String::new()),
    }
}

/// Recognises the accepted bit tokens, case-insensitively.
pub fn parse_bit(text: &str) -> Option<bool> {
    let token = text.trim().to_ascii_lowercase();
    if TRUE_TOKENS.contains(&token.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&token.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Whether `text` looks like a well-known-text geometry literal.
pub fn is_wkt(text: &str) -> bool {
    WKT_PATTERN
        .captures(text)
        .map(|caps| caps.get(4).is_some() || caps[1].eq_ignore_ascii_case("FULLGLOBE"))
        .unwrap_or(false)
}

/// Encodes bytes for a CSV field.
pub fn encode_bytes(bytes: &[u8], mode: BinaryMode) -> String {
    match mode {
        BinaryMode::Hex => {
            let mut encoded = hex::encode(bytes);
            if encoded.len() % 2 == 1 {
                encoded.insert(0, '0');
            }
            encoded
        }
        BinaryMode::Base64 => STANDARD.encode(bytes),
        BinaryMode::Raw => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decodes a CSV field into bytes.
pub fn decode_bytes(text: &str, mode: BinaryMode) -> Result<Vec<u8>, String> {
    match mode {
        BinaryMode::Hex => {
            let trimmed = text.trim();
            let digits = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .unwrap_or(trimmed);
            if digits.len() % 2 != 0 {
                return Err("odd-length hex string".to_string());
            }
            hex::decode(digits).map_err(|e| format!("invalid hex: {}", e))
        }
        BinaryMode::Base64 => {
            let trimmed = text.trim();
            STANDARD
                .decode(trimmed)
                .or_else(|_| URL_SAFE.decode(trimmed))
                .map_err(|e| format!("invalid base64: {}", e))
        }
        BinaryMode::Raw => Ok(text.as_bytes().to_vec()),
    }
}
