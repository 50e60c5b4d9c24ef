//! Built-in agents for Marlin boards with TMC drivers and a BLTouch probe.

use crate::agent::Agent;
use crate::case::TestCase;
use crate::codec::{Command, CommandError};
use crate::expect::Expectation;
use std::time::Duration;

/// Agents run when the configuration does not name any. `safety` is left out
/// because its emergency stop halts the board for everything after it.
pub const DEFAULT_SCHEDULE: &[&str] = &["hardware", "tmc", "bltouch"];

/// Every built-in agent, in catalog order.
pub const BUILTIN: &[(&str, &str)] = &[
    ("hardware", "Firmware identity, endstops, thermistors and motion on every axis"),
    ("tmc", "TMC stepper driver status, currents and microstepping"),
    ("bltouch", "BLTouch probe deploy, retract and self-test"),
    ("safety", "Thermal protection settings and emergency stop (halts the board)"),
];

const MOTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a built-in agent by name.
pub fn builtin(name: &str) -> Result<Option<Agent>, CommandError> {
    let agent = match name {
        "hardware" => hardware()?,
        "tmc" => tmc()?,
        "bltouch" => bltouch()?,
        "safety" => safety()?,
        _ => return Ok(None),
    };
    Ok(Some(agent))
}

fn describe(name: &str) -> &'static str {
    BUILTIN
        .iter()
        .find(|(n, _)| *n == name)
        .map_or("", |(_, d)| d)
}

fn hardware() -> Result<Agent, CommandError> {
    let mut agent = Agent::new("hardware", describe("hardware"))
        .case(TestCase::new(
            "Firmware Version",
            Command::new("M115")?,
            Expectation::all(vec![
                Expectation::Acknowledged,
                Expectation::field_present("FIRMWARE_NAME"),
            ]),
        ))
        .case(TestCase::new(
            "Endstops",
            Command::new("M119")?,
            Expectation::all(vec![
                Expectation::field_present("x_min"),
                Expectation::field_present("y_min"),
                Expectation::field_present("z_min"),
            ]),
        ))
        .case(TestCase::new(
            "Temperature Sensors",
            Command::new("M105")?,
            // Disconnected thermistors read far outside this band.
            Expectation::all(vec![
                Expectation::number("T", Some(0.0), Some(300.0)),
                Expectation::number("B", Some(0.0), Some(150.0)),
            ]),
        ));

    for (axis, distance) in [('X', 10), ('Y', 10), ('Z', 5)] {
        agent = agent.case(
            TestCase::new(
                format!("{axis} Motor"),
                Command::new("M114")?,
                Expectation::number(
                    axis.to_string(),
                    Some(f64::from(distance) - 0.1),
                    Some(f64::from(distance) + 0.1),
                ),
            )
            .with_timeout(MOTION_TIMEOUT)
            .with_setup(Command::new("G28")?.flag(axis))
            .with_setup(Command::new("G1")?.param(axis, distance).param('F', 1000))
            .with_teardown(Command::new("G1")?.param(axis, 0).param('F', 1000)),
        );
    }

    // The extruder cannot be homed and may refuse to move while cold, so
    // only check that a position is reported after the move request.
    Ok(agent.case(
        TestCase::new(
            "E Motor",
            Command::new("M114")?,
            Expectation::all(vec![Expectation::Acknowledged, Expectation::field_present("E")]),
        )
        .with_timeout(MOTION_TIMEOUT)
        .with_setup(Command::new("G92")?.param('E', 0))
        .with_setup(Command::new("G1")?.param('E', 5).param('F', 1000))
        .with_teardown(Command::new("G1")?.param('E', 0).param('F', 1000)),
    ))
}

fn tmc() -> Result<Agent, CommandError> {
    Ok(Agent::new("tmc", describe("tmc"))
        .case(TestCase::new(
            "TMC Status",
            Command::new("M122")?,
            Expectation::all(vec![
                Expectation::Acknowledged,
                Expectation::Any {
                    of: vec![
                        Expectation::field_present("X.enabled"),
                        Expectation::field_present("X.connection"),
                    ],
                },
            ]),
        ))
        .case(TestCase::new(
            "Current Settings",
            Command::new("M906")?,
            Expectation::all(vec![
                Expectation::number("X", Some(1.0), None),
                Expectation::number("Y", Some(1.0), None),
            ]),
        ))
        .case(TestCase::new(
            "Microstepping",
            Command::new("M350")?,
            Expectation::all(vec![
                Expectation::field_present("X"),
                Expectation::field_present("Y"),
            ]),
        )))
}

fn bltouch() -> Result<Agent, CommandError> {
    let probe = |name: &str, angle: u32, settle: u64| -> Result<TestCase, CommandError> {
        Ok(TestCase::new(
            name,
            Command::new("M280")?.param('P', 0).param('S', angle),
            Expectation::Acknowledged,
        )
        .with_settle(Duration::from_secs(settle)))
    };
    Ok(Agent::new("bltouch", describe("bltouch"))
        .case(probe("Probe Deploy", 10, 2)?)
        .case(probe("Probe Retract", 90, 2)?)
        .case(probe("Self Test", 120, 3)?))
}

fn safety() -> Result<Agent, CommandError> {
    Ok(Agent::new("safety", describe("safety"))
        .case(TestCase::new(
            "Thermal Protection",
            Command::new("M503")?,
            Expectation::ContainsAny {
                texts: vec!["THERMAL_PROTECTION".into(), "THERMAL_RUNAWAY".into()],
            },
        ))
        // Last on purpose: the board is halted afterwards.
        .case(
            TestCase::new(
                "Emergency Stop",
                Command::new("M112")?,
                Expectation::ContainsAny {
                    texts: vec!["halted".into(), "kill".into(), "!!".into()],
                },
            )
            .with_retries(0)
            .with_teardown(Command::new("M999")?)
            .with_settle(Duration::from_secs(1)),
        ))
}
