// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Immutable timestamped data samples.
//!
//! A [`Sample`] pairs a wall-clock timestamp (seconds since the epoch as an
//! IEEE-754 double) with one of five value kinds. Samples are created by
//! push sources and shared by reference between current values, overrides,
//! defaults and observation buffers; they are never mutated after creation.

mod json;


use crate::config::MAX_STRING_BYTES;
use crate::{Error, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Data type of a sample value.
///
/// The discriminants are wire-stable: snapshots report them numerically and
/// remote consumers depend on the mapping.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// No value, only a timestamp.
    Trigger = 0,
    Boolean = 1,
    /// IEEE-754 double.
    Numeric = 2,
    /// UTF-8 text.
    String = 3,
    /// UTF-8 text assumed to be syntactically valid JSON at ingress.
    Json = 4,
}

impl DataType {
    /// Wire representation of the type tag.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Human-readable type name, as used by the admin tools.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            DataType::Trigger => "trigger",
            DataType::Boolean => "boolean",
            DataType::Numeric => "numeric",
            DataType::String => "string",
            DataType::Json => "json",
        }
    }
}

impl TryFrom<u32> for DataType {
    type Error = Error;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(DataType::Trigger),
            1 => Ok(DataType::Boolean),
            2 => Ok(DataType::Numeric),
            3 => Ok(DataType::String),
            4 => Ok(DataType::Json),
            _ => Err(Error::BadParameter),
        }
    }
}

/// Timestamp supplied at sample creation.
///
/// `Now` stamps the sample with the absolute wall clock at the moment of
/// creation; any `f64` converts into an explicit stamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timestamp {
    /// Stamp with the wall clock at creation.
    Now,
    /// Explicit stamp, seconds since the epoch.
    At(f64),
}

impl From<f64> for Timestamp {
    fn from(seconds: f64) -> Self {
        Timestamp::At(seconds)
    }
}

impl Timestamp {
    fn resolve(self) -> f64 {
        match self {
            Timestamp::Now => wall_clock(),
            Timestamp::At(seconds) => seconds,
        }
    }
}

/// Absolute wall clock in seconds since the epoch.
#[must_use]
pub fn wall_clock() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        // Clock before the epoch; clamp rather than panic.
        Err(_) => 0.0,
    }
}

/// A sample's value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Trigger,
    Boolean(bool),
    Numeric(f64),
    String(Box<str>),
    Json(Box<str>),
}

impl Value {
    /// Data type tag of this value.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Trigger => DataType::Trigger,
            Value::Boolean(_) => DataType::Boolean,
            Value::Numeric(_) => DataType::Numeric,
            Value::String(_) => DataType::String,
            Value::Json(_) => DataType::Json,
        }
    }

    /// The boolean payload, if this is a boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The numeric payload, if this is a numeric value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    /// The text payload, if this is a string or JSON value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Json(s) => Some(s),
            _ => None,
        }
    }
}

/// An immutable timestamped value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    timestamp: f64,
    value: Value,
}

impl Sample {
    /// Create a trigger sample (timestamp only).
    #[must_use]
    pub fn trigger(ts: impl Into<Timestamp>) -> Self {
        Self {
            timestamp: ts.into().resolve(),
            value: Value::Trigger,
        }
    }

    /// Create a boolean sample.
    #[must_use]
    pub fn boolean(ts: impl Into<Timestamp>, value: bool) -> Self {
        Self {
            timestamp: ts.into().resolve(),
            value: Value::Boolean(value),
        }
    }

    /// Create a numeric sample.
    #[must_use]
    pub fn numeric(ts: impl Into<Timestamp>, value: f64) -> Self {
        Self {
            timestamp: ts.into().resolve(),
            value: Value::Numeric(value),
        }
    }

    /// Create a string sample, copying `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] if `value` exceeds
    /// [`MAX_STRING_BYTES`](crate::config::MAX_STRING_BYTES).
    pub fn string(ts: impl Into<Timestamp>, value: &str) -> Result<Self> {
        Ok(Self {
            timestamp: ts.into().resolve(),
            value: Value::String(bounded_copy(value)?),
        })
    }

    /// Create a JSON sample, copying `value`.
    ///
    /// The text is assumed to be syntactically valid JSON; it is not parsed
    /// here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] if `value` exceeds
    /// [`MAX_STRING_BYTES`](crate::config::MAX_STRING_BYTES).
    pub fn json(ts: impl Into<Timestamp>, value: &str) -> Result<Self> {
        Ok(Self {
            timestamp: ts.into().resolve(),
            value: Value::Json(bounded_copy(value)?),
        })
    }

    /// Build a sample from an already-typed value.
    #[must_use]
    pub fn from_value(ts: impl Into<Timestamp>, value: Value) -> Self {
        Self {
            timestamp: ts.into().resolve(),
            value,
        }
    }

    /// The timestamp, in seconds since the epoch.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// The value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Data type tag of the value.
    #[inline]
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }

    /// Re-stamp the sample. Only for ingress normalization, before the
    /// sample has been shared.
    #[must_use]
    pub fn with_timestamp(mut self, seconds: f64) -> Self {
        self.timestamp = seconds;
        self
    }

    /// Render the value as a printable UTF-8 string.
    ///
    /// Triggers render as the empty string; JSON values are unescaped with
    /// the lossy two-byte reversal (see [`Sample::extract`] for the
    /// structured alternative).
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match &self.value {
            Value::Trigger => String::new(),
            Value::Boolean(b) => bool_str(*b).to_owned(),
            Value::Numeric(n) => format_numeric(*n),
            Value::String(s) => s.to_string(),
            Value::Json(s) => json::unescape_display(s),
        }
    }

    /// Render the value in JSON form.
    ///
    /// Strings are wrapped in quotes and escaped; JSON values are inserted
    /// verbatim (the caller is trusted to have stored valid JSON).
    #[must_use]
    pub fn to_json_text(&self) -> String {
        match &self.value {
            Value::Trigger => String::new(),
            Value::Boolean(b) => bool_str(*b).to_owned(),
            Value::Numeric(n) => format_numeric(*n),
            Value::String(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('"');
                json::escape_into(&mut out, s);
                out.push('"');
                out
            }
            Value::Json(s) => s.to_string(),
        }
    }

    /// Extract an object member or array element from a JSON sample.
    ///
    /// The extraction specifier looks like `"x"`, `"x.y"`, `"[3]"` or
    /// `"x[3].y"`. The returned sample keeps this sample's timestamp,
    /// preserving provenance.
    ///
    /// # Errors
    ///
    /// - [`Error::FormatError`] if this is not a JSON sample, the stored
    ///   text fails to parse, or the specifier does not resolve.
    /// - [`Error::Overflow`] if the extracted text exceeds the maximum
    ///   sample size.
    pub fn extract(&self, spec: &str) -> Result<Sample> {
        match &self.value {
            Value::Json(text) => json::extract(text, spec, self.timestamp),
            _ => Err(Error::FormatError),
        }
    }
}

/// Fixed six-decimal rendering used for numeric values and timestamps on
/// the snapshot wire.
#[must_use]
pub fn format_numeric(value: f64) -> String {
    format!("{value:.6}")
}

#[inline]
fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn bounded_copy(value: &str) -> Result<Box<str>> {
    if value.len() > MAX_STRING_BYTES {
        return Err(Error::Overflow);
    }
    Ok(Box::from(value))
}
