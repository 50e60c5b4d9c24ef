//! G-code commands.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building or parsing a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command line")]
    Empty,

    #[error("invalid mnemonic '{0}': expected a G, M or T code such as G28 or M115")]
    InvalidMnemonic(String),

    #[error("invalid parameter '{0}': expected a letter optionally followed by a value")]
    InvalidParameter(String),
}

/// One command parameter: an address letter and an optional value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub letter: char,
    pub value: Option<String>,
}

/// The grammar family a command's reply belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFamily {
    Identification,
    Endstops,
    Temperature,
    Position,
    StepperDriver,
    Probe,
    Settings,
    EmergencyStop,
    Generic,
}

/// A G-code command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Command {
    mnemonic: String,
    params: Vec<Param>,
}

impl Command {
    /// Build a command from a mnemonic such as `M115`.
    pub fn new(mnemonic: &str) -> Result<Self, CommandError> {
        Ok(Self {
            mnemonic: normalize_mnemonic(mnemonic)?,
            params: Vec::new(),
        })
    }

    /// Append a parameter with a value, e.g. `.param('X', 10)`.
    pub fn param(mut self, letter: char, value: impl fmt::Display) -> Self {
        self.params.push(Param {
            letter: letter.to_ascii_uppercase(),
            value: Some(value.to_string()),
        });
        self
    }

    /// Append a bare parameter letter, e.g. the axis in `G28 X`.
    pub fn flag(mut self, letter: char) -> Self {
        self.params.push(Param {
            letter: letter.to_ascii_uppercase(),
            value: None,
        });
        self
    }

    /// Parse a raw G-code line such as `G1 X10 F1000`.
    ///
    /// Comments after `;` are dropped and whitespace is collapsed.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let code = line.split(';').next().unwrap_or_default();
        let mut words = code.split_whitespace();
        let mnemonic = words.next().ok_or(CommandError::Empty)?;
        let mut command = Self::new(mnemonic)?;

        for word in words {
            let mut chars = word.chars();
            let letter = match chars.next() {
                Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
                _ => return Err(CommandError::InvalidParameter(word.to_string())),
            };
            let value = chars.as_str();
            command.params.push(Param {
                letter,
                value: (!value.is_empty()).then(|| value.to_string()),
            });
        }

        Ok(command)
    }

    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Which reply grammar applies to this command.
    pub fn family(&self) -> CommandFamily {
        match self.mnemonic.as_str() {
            "M115" => CommandFamily::Identification,
            "M119" => CommandFamily::Endstops,
            "M105" => CommandFamily::Temperature,
            "M114" => CommandFamily::Position,
            "M122" | "M906" | "M350" | "M913" | "M569" => CommandFamily::StepperDriver,
            "M280" | "M401" | "M402" => CommandFamily::Probe,
            "M503" => CommandFamily::Settings,
            "M112" => CommandFamily::EmergencyStop,
            _ => CommandFamily::Generic,
        }
    }

    /// Wire form: mnemonic then each parameter as letter+value, single spaces.
    pub fn encode(&self) -> String {
        let mut line = self.mnemonic.clone();
        for param in &self.params {
            line.push(' ');
            line.push(param.letter);
            if let Some(value) = &param.value {
                line.push_str(value);
            }
        }
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl TryFrom<String> for Command {
    type Error = CommandError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.encode()
    }
}

fn normalize_mnemonic(raw: &str) -> Result<String, CommandError> {
    let upper = raw.trim().to_ascii_uppercase();
    let mut chars = upper.chars();
    let valid = matches!(chars.next(), Some('G' | 'M' | 'T'))
        && !chars.as_str().is_empty()
        && chars
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.');
    if !valid {
        return Err(CommandError::InvalidMnemonic(raw.to_string()));
    }

    // `G01` and `G1` are the same command.
    let (letter, number) = upper.split_at(1);
    let number = match number.split_once('.') {
        Some((major, minor)) => format!("{}.{minor}", trim_zeros(major)),
        None => trim_zeros(number).to_string(),
    };
    Ok(format!("{letter}{number}"))
}

fn trim_zeros(digits: &str) -> &str {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0"
    } else {
        trimmed
    }
}
