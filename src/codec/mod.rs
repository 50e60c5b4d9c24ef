//! G-code protocol codec.
//!
//! Encodes [`Command`]s into wire lines and decodes the lines a Marlin-class
//! firmware sends back into a [`ParsedReply`].
//!
//! Decoding is tolerant by construction: extra whitespace, `echo:` prefixes,
//! `busy:` keep-alives, reordered fields and informational chatter before the
//! terminator are all accepted. Lines that no grammar understands are kept in
//! [`ParsedReply::unrecognized`]; decoding itself never fails.

pub mod command;
pub mod grammar;
pub mod reply;

pub use command::{Command, CommandError, CommandFamily, Param};
pub use grammar::{parse_flag, parse_number, Grammar};
pub use reply::{FieldFailure, FieldKind, FieldValue, ParsedReply, RawReply};

/// Identification query used to probe a freshly opened link.
pub const IDENTIFY: &str = "M115";

/// Encode a command into its wire line (without the trailing newline).
pub fn encode(command: &Command) -> String {
    command.encode()
}

/// `ok`, optionally followed by data (`ok T:20.0 /0.0 ...`).
pub fn is_ok(line: &str) -> bool {
    let line = line.trim();
    line == "ok" || line.starts_with("ok ") || line.starts_with("ok\t")
}

/// The firmware has stopped and will not acknowledge anything any more.
pub fn is_halt(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("!!") || line.contains("Printer halted") || line.contains("kill() called")
}

/// Whether a line ends a command's reply.
pub fn is_terminator(line: &str) -> bool {
    is_ok(line) || is_halt(line)
}

fn is_error(body: &str) -> bool {
    body.starts_with("Error:") || body.starts_with("Unknown command") || is_halt(body)
}

fn is_keepalive(body: &str) -> bool {
    body.starts_with("busy:") || body == "wait"
}

fn strip_echo(line: &str) -> &str {
    line.strip_prefix("echo:").unwrap_or(line).trim()
}

/// Decode the reply to `command`.
pub fn decode(command: &Command, raw: &RawReply) -> ParsedReply {
    let mut grammar = Grammar::for_family(command.family());
    let mut reply = ParsedReply {
        raw: raw.lines.clone(),
        ..Default::default()
    };
    let mut acknowledged = false;

    for line in &raw.lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if is_ok(trimmed) {
            acknowledged = true;
            let data = trimmed[2..].trim();
            if !data.is_empty() && !grammar.feed(data, &mut reply) {
                reply.unrecognized.push(line.clone());
            }
            continue;
        }

        let body = strip_echo(trimmed);
        if is_error(body) {
            reply.errors.push(trimmed.to_string());
            continue;
        }
        if body.is_empty() || is_keepalive(body) {
            continue;
        }
        if !grammar.feed(body, &mut reply) {
            reply.unrecognized.push(line.clone());
        }
    }

    reply.success = acknowledged && reply.errors.is_empty();
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn raw(text: &str) -> RawReply {
        RawReply::new(text.lines().map(str::to_string).collect())
    }

    fn cmd(line: &str) -> Command {
        Command::parse(line).unwrap()
    }

    #[test]
    fn test_terminators() {
        assert!(is_terminator("ok"));
        assert!(is_terminator("ok T:20.0 /0.0"));
        assert!(is_terminator("Error:Printer halted. kill() called!"));
        assert!(is_terminator("!! emergency stop"));
        assert!(!is_terminator("okay"));
        assert!(!is_terminator("Error:checksum mismatch"));
        assert!(!is_terminator("echo:busy: processing"));
    }

    #[test]
    fn test_temperature_on_ok_line() {
        let reply = decode(&cmd("M105"), &raw("ok T:205.1 /205.0 B:60.2 /60.0 @:64 B@:0"));
        assert!(reply.success);
        assert_eq!(reply.field("T").and_then(|v| v.as_number()), Some(205.1));
        assert_eq!(reply.field("B.target").and_then(|v| v.as_number()), Some(60.0));
        assert!(reply.unrecognized.is_empty());
    }

    #[test]
    fn test_chatter_is_kept_but_not_fatal() {
        let reply = decode(
            &cmd("M119"),
            &raw("echo:busy: processing\nstart\nReporting endstop status\nx_min: open\n  y_min:   open\nz_min: TRIGGERED\nok"),
        );
        assert!(reply.success);
        assert_eq!(reply.unrecognized, vec!["start".to_string()]);
        assert_eq!(reply.fields.len(), 3);
        assert_eq!(reply.raw.len(), 7);
    }

    #[test]
    fn test_error_lines_clear_success() {
        let reply = decode(&cmd("M999"), &raw("echo:Unknown command: \"M999\"\nok"));
        assert!(!reply.success);
        assert_eq!(reply.errors.len(), 1);

        let halted = decode(&cmd("M112"), &raw("Error:Printer halted. kill() called!"));
        assert!(!halted.success);
        assert!(halted.contains("halted"));
    }

    #[test]
    fn test_settings_echo_prefix() {
        let reply = decode(
            &cmd("M503"),
            &raw("echo:; Hotend PID:\necho:  M301 P22.20 I1.08 D114.00\nok"),
        );
        assert_eq!(
            reply.field("M301").map(|v| v.to_string()).as_deref(),
            Some("P22.20 I1.08 D114.00")
        );
    }

    #[test]
    fn test_unterminated_reply_is_not_success() {
        let reply = decode(&cmd("M115"), &raw("FIRMWARE_NAME:Marlin"));
        assert!(!reply.success);
        assert!(reply.field("FIRMWARE_NAME").is_some());
    }

    proptest! {
        // Informational lines before the terminator never remove fields.
        #[test]
        fn prop_noise_does_not_hide_fields(noise in proptest::collection::vec("[a-z ]{0,24}", 0..6)) {
            let mut lines: Vec<String> = noise.iter().map(|n| format!("echo:{n}")).collect();
            lines.push("x_min: open".into());
            lines.push("ok".into());
            let reply = decode(&cmd("M119"), &RawReply::new(lines));
            prop_assert!(reply.success);
            prop_assert_eq!(reply.field("x_min").and_then(|v| v.as_flag()), Some(false));
        }

        // Field order and surrounding whitespace do not matter.
        #[test]
        fn prop_temperature_order_and_spacing(pad in " {0,3}", swap in any::<bool>()) {
            let hot = format!("T:{pad}200.0{pad}/{pad}210.0");
            let bed = format!("B:{pad}60.0");
            let line = if swap { format!("{bed} {hot}") } else { format!("{hot} {bed}") };
            let reply = decode(&cmd("M105"), &RawReply::new(vec![line, "ok".into()]));
            prop_assert_eq!(reply.field("T").and_then(|v| v.as_number()), Some(200.0));
            prop_assert_eq!(reply.field("T.target").and_then(|v| v.as_number()), Some(210.0));
            prop_assert_eq!(reply.field("B").and_then(|v| v.as_number()), Some(60.0));
        }
    }
}
