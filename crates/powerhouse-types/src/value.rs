// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Powerhouse.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Entity values as reported by Home Assistant and the total coercions used to read them.
//!
//! Home Assistant reports almost every state as a string, but numbers and booleans
//! do show up for derived entities. Every coercion here is a pure function that
//! returns a well-defined value for any input; nothing in this module fails.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric sentinel for a value explicitly reported as unavailable
pub const UNAVAILABLE: f64 = -1.0;

/// Numeric sentinel for a value that could not be parsed as a number
pub const UNPARSEABLE: f64 = -2.0;

/// Numeric sentinel for a key that has never been reported
pub const MISSING: f64 = -3.0;

/// Last known value of a Home Assistant entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HaValue {
    Number(f64),
    Bool(bool),
    Text(String),
    Unavailable,
}

impl HaValue {
    /// Decode a raw JSON state value. Total: `null` maps to `Unavailable`,
    /// arrays and objects are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Unavailable,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Unavailable, Self::Number),
            serde_json::Value::String(s) => Self::from_state(s),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Self::Text(value.to_string())
            }
        }
    }

    /// Decode a textual state, recognising the "unavailable" marker in any case
    pub fn from_state(state: &str) -> Self {
        if state.eq_ignore_ascii_case("unavailable") {
            Self::Unavailable
        } else {
            Self::Text(state.to_owned())
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }

    /// Strict numeric view: `Some` only for values that really are numbers
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Self::Bool(_) | Self::Unavailable => None,
        }
    }
}

impl From<f64> for HaValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for HaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for HaValue {
    fn from(value: &str) -> Self {
        Self::from_state(value)
    }
}

impl fmt::Display for HaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Coerce a value to `f64`, returning [`UNAVAILABLE`], [`UNPARSEABLE`] or [`MISSING`]
/// when no number can be read.
pub fn coerce_f64(value: Option<&HaValue>) -> f64 {
    match value {
        None => MISSING,
        Some(HaValue::Unavailable) => UNAVAILABLE,
        Some(v) => v.as_number().unwrap_or(UNPARSEABLE),
    }
}

/// Coerce a value to an integer with the same sentinels as [`coerce_f64`].
/// Fractional numbers are truncated towards zero.
#[expect(clippy::cast_possible_truncation)]
pub fn coerce_i64(value: Option<&HaValue>) -> i64 {
    match value {
        None => -3,
        Some(HaValue::Unavailable) => -1,
        Some(HaValue::Number(n)) => *n as i64,
        Some(HaValue::Text(s)) => s.trim().parse::<i64>().unwrap_or(-2),
        Some(HaValue::Bool(_)) => -2,
    }
}

/// Coerce a value to a boolean.
///
/// `on`/`true` and `off`/`false` are recognised in any case. Unavailable and
/// missing values yield `when_unavailable`; anything else reads as `false`.
pub fn coerce_bool(value: Option<&HaValue>, when_unavailable: bool) -> bool {
    match value {
        None | Some(HaValue::Unavailable) => when_unavailable,
        Some(HaValue::Bool(b)) => *b,
        Some(HaValue::Number(n)) => *n != 0.0,
        Some(HaValue::Text(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("on") || s.eq_ignore_ascii_case("true")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_shapes() {
        assert_eq!(HaValue::from_json(&json!("12.5")), HaValue::Text("12.5".to_owned()));
        assert_eq!(HaValue::from_json(&json!(3)), HaValue::Number(3.0));
        assert_eq!(HaValue::from_json(&json!(true)), HaValue::Bool(true));
        assert_eq!(HaValue::from_json(&json!(null)), HaValue::Unavailable);
        assert_eq!(HaValue::from_json(&json!("Unavailable")), HaValue::Unavailable);
        assert_eq!(HaValue::from_json(&json!("unavailable")), HaValue::Unavailable);
        assert_eq!(HaValue::from_json(&json!([1, 2])), HaValue::Text("[1,2]".to_owned()));
    }

    #[test]
    fn test_coerce_f64_sentinels() {
        assert_eq!(coerce_f64(Some(&HaValue::from("250.5"))), 250.5);
        assert_eq!(coerce_f64(Some(&HaValue::Number(-12.0))), -12.0);
        assert_eq!(coerce_f64(Some(&HaValue::Unavailable)), UNAVAILABLE);
        assert_eq!(coerce_f64(Some(&HaValue::from("bulk"))), UNPARSEABLE);
        assert_eq!(coerce_f64(Some(&HaValue::Bool(true))), UNPARSEABLE);
        assert_eq!(coerce_f64(None), MISSING);
    }

    #[test]
    fn test_coerce_f64_rejects_non_finite_text() {
        assert_eq!(coerce_f64(Some(&HaValue::from("NaN"))), UNPARSEABLE);
        assert_eq!(coerce_f64(Some(&HaValue::from("inf"))), UNPARSEABLE);
    }

    #[test]
    fn test_coerce_i64() {
        assert_eq!(coerce_i64(Some(&HaValue::from("42"))), 42);
        assert_eq!(coerce_i64(Some(&HaValue::Number(7.9))), 7);
        assert_eq!(coerce_i64(Some(&HaValue::from("7.9"))), -2);
        assert_eq!(coerce_i64(Some(&HaValue::Unavailable)), -1);
        assert_eq!(coerce_i64(None), -3);
    }

    #[test]
    fn test_coerce_bool() {
        assert!(coerce_bool(Some(&HaValue::from("on")), false));
        assert!(coerce_bool(Some(&HaValue::from("True")), false));
        assert!(!coerce_bool(Some(&HaValue::from("off")), true));
        assert!(!coerce_bool(Some(&HaValue::from("garbage")), true));
        assert!(coerce_bool(Some(&HaValue::Unavailable), true));
        assert!(!coerce_bool(Some(&HaValue::Unavailable), false));
        assert!(coerce_bool(None, true));
        assert!(coerce_bool(Some(&HaValue::Bool(true)), false));
    }
}
