//! Raw and decoded reply types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lines received for one command, in arrival order, terminator included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReply {
    pub lines: Vec<String>,
}

impl RawReply {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// The terminating line, if the reply was terminated.
    pub fn terminator(&self) -> Option<&str> {
        self.lines
            .last()
            .map(String::as_str)
            .filter(|line| super::is_terminator(line))
    }
}

/// How a field's value is declared to be typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A two-state token such as `TRIGGERED`/`open` or `1`/`0`.
    Flag,
    /// A decimal number.
    Number,
    /// Anything else, kept verbatim.
    Text,
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldValue {
    /// `token` is what the firmware actually printed, for diagnostics.
    Flag { value: bool, token: String },
    Number { value: f64 },
    Text { value: String },
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Flag { .. } => FieldKind::Flag,
            Self::Number { .. } => FieldKind::Number,
            Self::Text { .. } => FieldKind::Text,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number { value } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag { token, .. } => f.write_str(token),
            Self::Number { value } => write!(f, "{value}"),
            Self::Text { value } => f.write_str(value),
        }
    }
}

/// A field the grammar recognised but whose value did not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub field: String,
    pub expected: FieldKind,
    pub raw: String,
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.expected {
            FieldKind::Flag => "a flag",
            FieldKind::Number => "a number",
            FieldKind::Text => "text",
        };
        write!(f, "field '{}' should be {kind}, got '{}'", self.field, self.raw)
    }
}

/// Structured view of a reply.
///
/// Nothing the device sent is lost: lines no grammar understood end up in
/// `unrecognized`, and `raw` always holds the complete exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedReply {
    /// Terminated by `ok` with no firmware error lines.
    pub success: bool,
    pub fields: BTreeMap<String, FieldValue>,
    pub failures: Vec<FieldFailure>,
    /// `Error:` lines and kill notices.
    pub errors: Vec<String>,
    pub unrecognized: Vec<String>,
    pub raw: Vec<String>,
}

impl ParsedReply {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn failure(&self, name: &str) -> Option<&FieldFailure> {
        self.failures.iter().find(|f| f.field == name)
    }

    /// Case-insensitive substring search over every raw line.
    pub fn contains(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.raw
            .iter()
            .any(|line| line.to_ascii_lowercase().contains(&needle))
    }

    pub(crate) fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        // A later good value wins over an earlier parse failure for the same field.
        self.failures.retain(|f| f.field != name);
        self.fields.insert(name, value);
    }

    pub(crate) fn fail(&mut self, name: impl Into<String>, expected: FieldKind, raw: &str) {
        let name = name.into();
        if self.fields.contains_key(&name) {
            return;
        }
        self.failures.push(FieldFailure {
            field: name,
            expected,
            raw: raw.to_string(),
        });
    }
}
