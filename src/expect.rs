//! Declarative expectations over a [`ParsedReply`].
//!
//! An [`Expectation`] is data, not a closure, so cases defined in a
//! configuration file and built-in cases go through the same evaluator and
//! serialize into reports unchanged.

use crate::codec::{FieldKind, FieldValue, ParsedReply};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What a reply must look like for a case to pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// Terminated by `ok` with no firmware error lines.
    Acknowledged,
    /// Some raw line contains `text` (case-insensitive).
    Contains { text: String },
    /// Some raw line contains at least one of `texts`.
    ContainsAny { texts: Vec<String> },
    /// The field was decoded, whatever its value.
    FieldPresent { field: String },
    /// A flag field has the given state (`true` = triggered).
    Flag { field: String, expected: bool },
    /// A numeric field lies within the inclusive bounds.
    Number {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// A text field contains `contains` (case-insensitive).
    Text { field: String, contains: String },
    /// Every inner expectation holds.
    All { of: Vec<Expectation> },
    /// At least one inner expectation holds.
    Any { of: Vec<Expectation> },
}

/// Why an expectation did not hold.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    /// An expected field is absent or its value did not decode.
    #[error("{field}: {detail}")]
    Parse { field: String, detail: String },

    /// The reply decoded cleanly but the value is wrong.
    #[error("{field}: expected {expected}, got {actual}")]
    Predicate {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{}", join(.mismatches))]
    Several { mismatches: Vec<Mismatch> },
}

fn join(mismatches: &[Mismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Mismatch {
    /// Flattened list of the individual mismatches.
    pub fn flatten(&self) -> Vec<&Mismatch> {
        match self {
            Self::Several { mismatches } => mismatches.iter().flat_map(Mismatch::flatten).collect(),
            other => vec![other],
        }
    }

    fn from_list(mut mismatches: Vec<Mismatch>) -> Self {
        if mismatches.len() == 1 {
            mismatches.remove(0)
        } else {
            Self::Several { mismatches }
        }
    }
}

fn flag_word(value: bool) -> &'static str {
    if value {
        "TRIGGERED"
    } else {
        "open"
    }
}

/// Look a field up with the declared kind, distinguishing "absent" from
/// "present but undecodable" from "wrong kind".
fn typed<'r>(reply: &'r ParsedReply, field: &str, kind: FieldKind) -> Result<&'r FieldValue, Mismatch> {
    if let Some(value) = reply.field(field) {
        if value.kind() == kind {
            return Ok(value);
        }
        let wanted = match kind {
            FieldKind::Flag => "a flag",
            FieldKind::Number => "a number",
            FieldKind::Text => "text",
        };
        return Err(Mismatch::Parse {
            field: field.to_string(),
            detail: format!("expected {wanted}, got '{value}'"),
        });
    }
    let detail = match reply.failure(field) {
        Some(failure) => failure.to_string(),
        None => "missing from reply".to_string(),
    };
    Err(Mismatch::Parse {
        field: field.to_string(),
        detail,
    })
}

impl Expectation {
    pub fn contains(text: impl Into<String>) -> Self {
        Self::Contains { text: text.into() }
    }

    pub fn flag(field: impl Into<String>, expected: bool) -> Self {
        Self::Flag {
            field: field.into(),
            expected,
        }
    }

    pub fn field_present(field: impl Into<String>) -> Self {
        Self::FieldPresent {
            field: field.into(),
        }
    }

    pub fn number(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::Number {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn all(of: Vec<Expectation>) -> Self {
        Self::All { of }
    }

    /// Evaluate against a reply. `All` reports every failing member, so a
    /// reply that gets three of four fields right still fails.
    pub fn evaluate(&self, reply: &ParsedReply) -> Result<(), Mismatch> {
        match self {
            Self::Acknowledged => {
                if reply.success {
                    Ok(())
                } else {
                    let actual = reply
                        .errors
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "no acknowledgement".to_string());
                    Err(Mismatch::Predicate {
                        field: "reply".into(),
                        expected: "ok".into(),
                        actual,
                    })
                }
            }
            Self::Contains { text } => {
                if reply.contains(text) {
                    Ok(())
                } else {
                    Err(Mismatch::Predicate {
                        field: "reply".into(),
                        expected: format!("a line containing '{text}'"),
                        actual: summarize_raw(reply),
                    })
                }
            }
            Self::ContainsAny { texts } => {
                if texts.iter().any(|text| reply.contains(text)) {
                    Ok(())
                } else {
                    Err(Mismatch::Predicate {
                        field: "reply".into(),
                        expected: format!("a line containing one of {texts:?}"),
                        actual: summarize_raw(reply),
                    })
                }
            }
            Self::FieldPresent { field } => {
                if reply.field(field).is_some() {
                    return Ok(());
                }
                let detail = reply
                    .failure(field)
                    .map_or_else(|| "missing from reply".to_string(), ToString::to_string);
                Err(Mismatch::Parse {
                    field: field.clone(),
                    detail,
                })
            }
            Self::Flag { field, expected } => {
                let value = typed(reply, field, FieldKind::Flag)?;
                match value.as_flag() {
                    Some(actual) if actual == *expected => Ok(()),
                    _ => Err(Mismatch::Predicate {
                        field: field.clone(),
                        expected: flag_word(*expected).to_string(),
                        actual: value.to_string(),
                    }),
                }
            }
            Self::Number { field, min, max } => {
                let value = typed(reply, field, FieldKind::Number)?;
                let number = value.as_number().unwrap_or(f64::NAN);
                let above = min.map_or(true, |min| number >= min);
                let below = max.map_or(true, |max| number <= max);
                if above && below {
                    Ok(())
                } else {
                    Err(Mismatch::Predicate {
                        field: field.clone(),
                        expected: Bounds(*min, *max).to_string(),
                        actual: value.to_string(),
                    })
                }
            }
            Self::Text { field, contains } => {
                let value = typed(reply, field, FieldKind::Text)?;
                let text = value.to_string();
                if text.to_lowercase().contains(&contains.to_lowercase()) {
                    Ok(())
                } else {
                    Err(Mismatch::Predicate {
                        field: field.clone(),
                        expected: format!("text containing '{contains}'"),
                        actual: text,
                    })
                }
            }
            Self::All { of } => {
                let mismatches: Vec<Mismatch> =
                    of.iter().filter_map(|e| e.evaluate(reply).err()).collect();
                if mismatches.is_empty() {
                    Ok(())
                } else {
                    Err(Mismatch::from_list(mismatches))
                }
            }
            Self::Any { of } => {
                let mut mismatches = Vec::new();
                for expectation in of {
                    match expectation.evaluate(reply) {
                        Ok(()) => return Ok(()),
                        Err(m) => mismatches.push(m),
                    }
                }
                if mismatches.is_empty() {
                    // An empty `any` has nothing that could hold.
                    return Err(Mismatch::Predicate {
                        field: "reply".into(),
                        expected: "at least one alternative".into(),
                        actual: "none declared".into(),
                    });
                }
                Err(Mismatch::from_list(mismatches))
            }
        }
    }
}

struct Bounds(Option<f64>, Option<f64>);

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.0, self.1) {
            (Some(min), Some(max)) => write!(f, "a number in {min}..={max}"),
            (Some(min), None) => write!(f, "a number >= {min}"),
            (None, Some(max)) => write!(f, "a number <= {max}"),
            (None, None) => f.write_str("a number"),
        }
    }
}

fn summarize_raw(reply: &ParsedReply) -> String {
    let meaningful: Vec<&str> = reply
        .raw
        .iter()
        .map(String::as_str)
        .filter(|line| line.trim() != "ok")
        .collect();
    if meaningful.is_empty() {
        "an empty reply".to_string()
    } else {
        format!("'{}'", meaningful.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, Command, RawReply};
    use pretty_assertions::assert_eq;

    fn reply(command: &str, text: &str) -> ParsedReply {
        let raw = RawReply::new(text.lines().map(str::to_string).collect());
        decode(&Command::parse(command).unwrap(), &raw)
    }

    #[test]
    fn test_contains_firmware_name() {
        let r = reply("M115", "FIRMWARE_NAME:Marlin 2.1.2 PROTOCOL_VERSION:1.0\nok");
        assert!(Expectation::contains("Marlin").evaluate(&r).is_ok());
        let err = Expectation::contains("Klipper").evaluate(&r).unwrap_err();
        assert!(err.to_string().contains("Klipper"));
    }

    #[test]
    fn test_flag_mismatch_names_field() {
        let r = reply("M119", "x_min: TRIGGERED\nok");
        let err = Expectation::flag("x_min", false).evaluate(&r).unwrap_err();
        assert_eq!(
            err,
            Mismatch::Predicate {
                field: "x_min".into(),
                expected: "open".into(),
                actual: "TRIGGERED".into(),
            }
        );
        assert_eq!(err.to_string(), "x_min: expected open, got TRIGGERED");
    }

    #[test]
    fn test_absent_and_malformed_fields_are_parse_mismatches() {
        let r = reply("M105", "T:err /0.0\nok");
        let err = Expectation::number("T", Some(0.0), None).evaluate(&r).unwrap_err();
        assert!(matches!(&err, Mismatch::Parse { field, .. } if field == "T"));
        assert!(err.to_string().contains("err"));

        let missing = Expectation::field_present("B").evaluate(&r).unwrap_err();
        assert_eq!(missing.to_string(), "B: missing from reply");
    }

    #[test]
    fn test_number_bounds() {
        let r = reply("M105", "ok T:21.5 /0.0 B:20.0 /0.0");
        assert!(Expectation::number("T", Some(5.0), Some(60.0)).evaluate(&r).is_ok());
        let err = Expectation::number("B", Some(50.0), None).evaluate(&r).unwrap_err();
        assert_eq!(err.to_string(), "B: expected a number >= 50, got 20");
    }

    #[test]
    fn test_all_grants_no_partial_credit() {
        let r = reply("M119", "x_min: open\ny_min: open\nz_min: open\nz_probe: TRIGGERED\nok");
        let expectation = Expectation::all(vec![
            Expectation::flag("x_min", false),
            Expectation::flag("y_min", false),
            Expectation::flag("z_min", false),
            Expectation::flag("z_probe", false),
        ]);
        let err = expectation.evaluate(&r).unwrap_err();
        assert_eq!(err.flatten().len(), 1);
        assert!(err.to_string().starts_with("z_probe"));
    }

    #[test]
    fn test_any_and_text() {
        let r = reply("M503", "echo:  M301 P22.20 I1.08 D114.00\nok");
        let any = Expectation::Any {
            of: vec![
                Expectation::contains("THERMAL_PROTECTION"),
                Expectation::Text {
                    field: "M301".into(),
                    contains: "p22".into(),
                },
            ],
        };
        assert!(any.evaluate(&r).is_ok());
        assert!(Expectation::Any { of: vec![] }.evaluate(&r).is_err());
    }

    #[test]
    fn test_acknowledged_reports_firmware_error() {
        let r = reply("M122", "echo:Unknown command: \"M122\"\nok");
        let err = Expectation::Acknowledged.evaluate(&r).unwrap_err();
        assert!(err.to_string().contains("Unknown command"));
    }

    #[test]
    fn test_expectation_toml_shape() {
        let parsed: Expectation = toml::from_str(
            r#"
            kind = "all"
            of = [
                { kind = "acknowledged" },
                { kind = "number", field = "T", min = 5.0 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Expectation::all(vec![
                Expectation::Acknowledged,
                Expectation::number("T", Some(5.0), None),
            ])
        );
    }
}
