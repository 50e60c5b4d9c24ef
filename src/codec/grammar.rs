//! Per-family reply grammars.
//!
//! Each grammar is fed one cleaned line at a time (terminator handling,
//! `echo:` prefixes and keep-alives are dealt with by the caller) and reports
//! whether it understood the line. Field types are explicit: every extractor
//! names the [`FieldKind`] it expects and a value that does not fit becomes a
//! [`FieldFailure`](super::FieldFailure) instead of aborting the decode.

use super::command::CommandFamily;
use super::reply::{FieldKind, FieldValue, ParsedReply};
use once_cell::sync::Lazy;
use regex::Regex;

static KEY_VALUE_UPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][A-Z0-9_]*):").expect("static regex"));

static NAMED_STATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z][A-Za-z0-9_]*):\s*(\S+)").expect("static regex"));

static TEMPERATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)([TB]\d*|C|P|A|R|B@|@\d*):\s*([^\s/]+)(?:\s*/\s*([^\s]+))?")
        .expect("static regex")
});

static AXIS_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([XYZEABC]\d?):\s*(\S+)").expect("static regex"));

static DRIVER_CURRENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([XYZE]\d?)\s+driver current:\s*(\S+)").expect("static regex")
});

static DRIVER_SETTING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^M(?:906|350|913|569)\b(.*)$").expect("static regex"));

static CONNECTION_TEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^Testing\s+(\S+)\s+connection\.*\s*(\S+)").expect("static regex")
});

static SETTING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([GM]\d+(?:\.\d+)?)\b\s*(.*)$").expect("static regex"));

/// Interpret a two-state token.
pub fn parse_flag(token: &str) -> Option<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "triggered" | "1" | "true" | "on" | "yes" => Some(true),
        "open" | "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Interpret a decimal number. Non-finite values are rejected.
pub fn parse_number(token: &str) -> Option<f64> {
    token
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Store `raw` as a field of the declared kind, or record why it failed.
fn put(reply: &mut ParsedReply, name: impl Into<String>, kind: FieldKind, raw: &str) {
    let name = name.into();
    let raw = raw.trim();
    match kind {
        FieldKind::Flag => match parse_flag(raw) {
            Some(value) => reply.set(
                name,
                FieldValue::Flag {
                    value,
                    token: raw.to_string(),
                },
            ),
            None => reply.fail(name, kind, raw),
        },
        FieldKind::Number => match parse_number(raw) {
            Some(value) => reply.set(name, FieldValue::Number { value }),
            None => reply.fail(name, kind, raw),
        },
        FieldKind::Text => reply.set(
            name,
            FieldValue::Text {
                value: raw.to_string(),
            },
        ),
    }
}

/// Type a table cell by its content: number, then flag word, then text.
fn put_cell(reply: &mut ParsedReply, name: String, raw: &str) {
    let raw = raw.trim();
    if parse_number(raw).is_some() {
        put(reply, name, FieldKind::Number, raw);
    } else if matches!(
        raw.to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "on" | "off"
    ) {
        put(reply, name, FieldKind::Flag, raw);
    } else {
        put(reply, name, FieldKind::Text, raw);
    }
}

fn is_axis_name(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('X' | 'Y' | 'Z' | 'E' | 'I' | 'J' | 'K'))
        && chars.all(|c| c.is_ascii_digit())
}

/// Reply grammar for one command family. Only the stepper grammar carries
/// state (the column layout of an `M122` table).
#[derive(Debug, Clone)]
pub enum Grammar {
    Identification,
    Endstops,
    Temperature,
    Position,
    StepperDriver { columns: Vec<String> },
    Probe,
    Settings,
    Generic,
}

impl Grammar {
    pub fn for_family(family: CommandFamily) -> Self {
        match family {
            CommandFamily::Identification => Self::Identification,
            CommandFamily::Endstops => Self::Endstops,
            CommandFamily::Temperature => Self::Temperature,
            CommandFamily::Position => Self::Position,
            CommandFamily::StepperDriver => Self::StepperDriver {
                columns: Vec::new(),
            },
            CommandFamily::Probe => Self::Probe,
            CommandFamily::Settings => Self::Settings,
            CommandFamily::EmergencyStop | CommandFamily::Generic => Self::Generic,
        }
    }

    /// Feed one line. Returns false when the line was not understood.
    pub fn feed(&mut self, line: &str, reply: &mut ParsedReply) -> bool {
        match self {
            Self::Identification => identification(line, reply),
            Self::Endstops | Self::Probe => named_states(line, reply),
            Self::Temperature => temperature(line, reply),
            Self::Position => position(line, reply),
            Self::StepperDriver { columns } => stepper(columns, line, reply),
            Self::Settings => settings(line, reply),
            Self::Generic => false,
        }
    }
}

/// `M115`: `FIRMWARE_NAME:... PROTOCOL_VERSION:... EXTRUDER_COUNT:1 ...` and
/// `Cap:NAME:0|1` capability lines.
fn identification(line: &str, reply: &mut ParsedReply) -> bool {
    if let Some(cap) = line.strip_prefix("Cap:") {
        return match cap.rsplit_once(':') {
            Some((name, value)) if !name.is_empty() => {
                put(reply, format!("Cap.{name}"), FieldKind::Flag, value);
                true
            }
            _ => false,
        };
    }

    let keys: Vec<_> = KEY_VALUE_UPPER.captures_iter(line).collect();
    if keys.is_empty() {
        return false;
    }

    for (i, caps) in keys.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = keys
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(line.len(), |next| next.start());
        let value = &line[whole.end()..end];
        let kind = if name.as_str() == "EXTRUDER_COUNT" {
            FieldKind::Number
        } else {
            FieldKind::Text
        };
        put(reply, name.as_str(), kind, value);
    }
    true
}

/// `M119` / probe status: `x_min: open`, `z_probe: TRIGGERED`, possibly
/// several on one line.
fn named_states(line: &str, reply: &mut ParsedReply) -> bool {
    if line.eq_ignore_ascii_case("Reporting endstop status") {
        return true;
    }
    let mut recognized = false;
    for caps in NAMED_STATE.captures_iter(line) {
        if let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) {
            put(
                reply,
                name.as_str().to_ascii_lowercase(),
                FieldKind::Flag,
                value.as_str(),
            );
            recognized = true;
        }
    }
    recognized
}

/// `M105`: `T:20.3 /0.0 B:21.0 /0.0 @:0 B@:0`. A `/target` part becomes the
/// `<sensor>.target` field.
fn temperature(line: &str, reply: &mut ParsedReply) -> bool {
    let mut recognized = false;
    for caps in TEMPERATURE.captures_iter(line) {
        let Some(sensor) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if let Some(current) = caps.get(2) {
            put(reply, sensor, FieldKind::Number, current.as_str());
        }
        if let Some(target) = caps.get(3) {
            put(
                reply,
                format!("{sensor}.target"),
                FieldKind::Number,
                target.as_str(),
            );
        }
        recognized = true;
    }
    recognized
}

/// `M114`: `X:10.00 Y:0.00 Z:0.00 E:0.00 Count X:800 Y:0 Z:0`. Stepper counts
/// after `Count` become `count.<axis>`.
fn position(line: &str, reply: &mut ParsedReply) -> bool {
    let (logical, counts) = match line.find("Count") {
        Some(at) => (&line[..at], Some(&line[at + "Count".len()..])),
        None => (line, None),
    };

    let mut recognized = false;
    for caps in AXIS_VALUE.captures_iter(logical) {
        if let (Some(axis), Some(value)) = (caps.get(1), caps.get(2)) {
            put(reply, axis.as_str(), FieldKind::Number, value.as_str());
            recognized = true;
        }
    }
    for caps in counts.into_iter().flat_map(|c| AXIS_VALUE.captures_iter(c)) {
        if let (Some(axis), Some(value)) = (caps.get(1), caps.get(2)) {
            put(
                reply,
                format!("count.{}", axis.as_str()),
                FieldKind::Number,
                value.as_str(),
            );
            recognized = true;
        }
    }
    recognized
}

/// Stepper driver reports: `M906`/`M350` style settings, `X driver current:`
/// lines, `Testing X connection... OK`, and the `M122` table whose header row
/// lists the axes and whose body rows become `<axis>.<row label>` fields.
fn stepper(columns: &mut Vec<String>, line: &str, reply: &mut ParsedReply) -> bool {
    if let Some(caps) = CONNECTION_TEST.captures(line) {
        if let (Some(axis), Some(status)) = (caps.get(1), caps.get(2)) {
            let token = status.as_str();
            reply.set(
                format!("{}.connection", axis.as_str()),
                FieldValue::Flag {
                    value: token.eq_ignore_ascii_case("ok"),
                    token: token.to_string(),
                },
            );
            return true;
        }
    }

    if let Some(caps) = DRIVER_CURRENT.captures(line) {
        if let (Some(axis), Some(value)) = (caps.get(1), caps.get(2)) {
            put(
                reply,
                axis.as_str().to_ascii_uppercase(),
                FieldKind::Number,
                value.as_str(),
            );
            return true;
        }
    }

    if let Some(rest) = DRIVER_SETTING.captures(line).and_then(|c| c.get(1)) {
        let mut recognized = false;
        for word in rest.as_str().split_whitespace() {
            let Some(first) = word.chars().next() else {
                continue;
            };
            let (letter, value) = word.split_at(first.len_utf8());
            if is_axis_name(letter) && !value.is_empty() {
                put(reply, letter, FieldKind::Number, value);
                recognized = true;
            }
        }
        return recognized;
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if !tokens.is_empty() && tokens.iter().all(|t| is_axis_name(t)) {
        *columns = tokens.iter().map(|t| t.to_string()).collect();
        return true;
    }

    if !columns.is_empty() {
        let cells: Vec<&str> = line
            .split('\t')
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .collect();
        if let Some((label, values)) = cells.split_first() {
            if values.len() == columns.len() {
                let label = label
                    .trim_end_matches(':')
                    .to_ascii_lowercase()
                    .replace(' ', "_");
                for (axis, value) in columns.iter().zip(values) {
                    put_cell(reply, format!("{axis}.{label}"), value);
                }
                return true;
            }
        }
    }

    let mut recognized = false;
    for caps in AXIS_VALUE.captures_iter(line) {
        if let (Some(axis), Some(value)) = (caps.get(1), caps.get(2)) {
            put(reply, axis.as_str(), FieldKind::Number, value.as_str());
            recognized = true;
        }
    }
    recognized
}

/// `M503`: one field per reported setting command, e.g. `M203` →
/// `X300.00 Y300.00 Z5.00 E25.00`. Repeated commands are joined with `; `.
fn settings(line: &str, reply: &mut ParsedReply) -> bool {
    if line.starts_with(';') {
        return true;
    }
    let Some(caps) = SETTING_LINE.captures(line) else {
        return false;
    };
    let (Some(code), Some(args)) = (caps.get(1), caps.get(2)) else {
        return false;
    };
    let args = args.as_str().trim();
    let value = match reply.field(code.as_str()) {
        Some(FieldValue::Text { value }) => format!("{value}; {args}"),
        _ => args.to_string(),
    };
    reply.set(code.as_str(), FieldValue::Text { value });
    true
}
