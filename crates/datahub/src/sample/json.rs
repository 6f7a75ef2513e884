// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON text handling for samples: the wire escape table, the lossy
//! display unescape, and path-based extraction.
//!
//! The escape emitter is hand-rolled because the byte format is part of the
//! snapshot wire contract (RFC 7159 escaping with lowercase `\u00xx` for
//! bare control characters); extraction rides on `serde_json` for parsing
//! and navigation.

use crate::config::MAX_STRING_BYTES;
use crate::sample::Sample;
use crate::{Error, Result};
use std::fmt::Write as _;

/// Append `src` to `out`, escaping for inclusion in a JSON string literal.
///
/// Characters above U+001F other than `"` and `\` pass through unchanged
/// (multi-byte UTF-8 included). The short escapes `\b \f \n \r \t \" \\`
/// are used where defined; any other control character is emitted as a
/// `\u00xx` codepoint escape.
pub(crate) fn escape_into(out: &mut String, src: &str) {
    for ch in src.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) <= 0x1F => {
                // Infallible: writing to a String cannot fail.
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}

/// Reverse transformation from a JSON string literal to printable text.
///
/// If the text is wrapped in double quotes, the quotes are stripped and
/// each `\X` pair collapses to `X`, byte for byte. `\uXXXX` sequences are
/// NOT expanded; the reversal is adequate for round-tripping this module's
/// own emissions and is documented as lossy beyond that. Unquoted text is
/// returned verbatim.
pub(crate) fn unescape_display(src: &str) -> String {
    let bytes = src.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
        return src.to_owned();
    }

    let inner = &bytes[1..bytes.len() - 1];
    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] == b'\\' && i + 1 < inner.len() {
            out.push(inner[i + 1]);
            i += 2;
        } else {
            out.push(inner[i]);
            i += 1;
        }
    }

    // The input was valid UTF-8 and we only removed backslashes and the
    // outer quotes, both single-byte, so the output still is.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// One step of an extraction specifier.
enum Step<'a> {
    Member(&'a str),
    Index(usize),
}

/// Parse an extraction specifier like `x`, `x.y`, `[3]` or `x[3].y`.
fn parse_spec(spec: &str) -> Result<Vec<Step<'_>>> {
    let mut steps = Vec::new();
    let mut rest = spec;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or(Error::FormatError)?;
            let index = after[..close].parse().map_err(|_| Error::FormatError)?;
            steps.push(Step::Index(index));
            rest = &after[close + 1..];
        } else if let Some(after) = rest.strip_prefix('.') {
            if steps.is_empty() || after.is_empty() {
                return Err(Error::FormatError);
            }
            rest = after;
        } else {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            if end == 0 {
                return Err(Error::FormatError);
            }
            steps.push(Step::Member(&rest[..end]));
            rest = &rest[end..];
        }
    }

    if steps.is_empty() {
        return Err(Error::FormatError);
    }
    Ok(steps)
}

/// Apply an extraction specifier to JSON text, producing a new sample with
/// the provided (original) timestamp.
pub(crate) fn extract(text: &str, spec: &str, timestamp: f64) -> Result<Sample> {
    let root: serde_json::Value =
        serde_json::from_str(text).map_err(|_| Error::FormatError)?;

    let mut node = &root;
    for step in parse_spec(spec)? {
        node = match step {
            Step::Member(name) => node.get(name).ok_or(Error::FormatError)?,
            Step::Index(index) => node.get(index).ok_or(Error::FormatError)?,
        };
    }

    match node {
        serde_json::Value::Null => Ok(Sample::trigger(timestamp)),
        serde_json::Value::Bool(b) => Ok(Sample::boolean(timestamp, *b)),
        serde_json::Value::Number(n) => {
            let value = n.as_f64().ok_or(Error::FormatError)?;
            Ok(Sample::numeric(timestamp, value))
        }
        serde_json::Value::String(s) => Sample::string(timestamp, s),
        composite @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
            let rendered =
                serde_json::to_string(composite).map_err(|_| Error::FormatError)?;
            if rendered.len() > MAX_STRING_BYTES {
                return Err(Error::Overflow);
            }
            Sample::json(timestamp, &rendered)
        }
    }
}
