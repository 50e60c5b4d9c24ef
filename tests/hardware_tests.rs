//! Tests requiring a real Marlin board.
//!
//! These tests are ignored by default.
//!
//! ```bash
//! export MARLIN_HARNESS_SERIAL_PORT=/dev/ttyACM0   # or COM3
//! export MARLIN_HARNESS_SERIAL_BAUD=250000         # optional, default: 115200
//! cargo test --features hardware-tests -- --ignored
//! ```
//!
//! Only read-only commands are sent: nothing here moves an axis or halts the
//! board.

#![cfg(feature = "hardware-tests")]

use marlin_harness::{
    codec, report, Agent, Command, ConnectionParams, Expectation, ExecutionPolicy, Orchestrator,
    PortConfiguration, TestCase, TestStatus, Transport,
};
use std::env;
use std::time::Duration;

fn board() -> Option<ConnectionParams> {
    let port = env::var("MARLIN_HARNESS_SERIAL_PORT").ok();
    if port.is_none() {
        println!("Skipping hardware test: MARLIN_HARNESS_SERIAL_PORT not set");
    }
    let baud_rate = env::var("MARLIN_HARNESS_SERIAL_BAUD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(115_200);
    Some(ConnectionParams {
        port: port?,
        framing: PortConfiguration {
            baud_rate,
            ..PortConfiguration::default()
        },
        connect_timeout: Duration::from_secs(10),
    })
}

#[test]
#[ignore] // Run with --ignored flag
fn test_board_identifies_as_marlin() {
    let Some(params) = board() else { return };

    let mut transport = Transport::connect(&params).expect("board should answer M115");
    let firmware = transport.identification().join("\n");
    assert!(firmware.contains("FIRMWARE_NAME"), "unexpected banner: {firmware}");

    let reply = transport
        .exchange("M105", Duration::from_secs(5))
        .expect("temperature report");
    let parsed = codec::decode(&Command::new("M105").unwrap(), &reply);
    assert!(parsed.success);
    assert!(parsed.field("T").is_some(), "{:?}", parsed.raw);

    let stats = transport.close();
    assert!(stats.commands_sent >= 2);
}

#[test]
#[ignore] // Run with --ignored flag
fn test_read_only_session_on_board() {
    let Some(params) = board() else { return };

    let agent = Agent::new("read-only", "Queries that leave the board untouched")
        .case(TestCase::new(
            "Firmware",
            Command::new("M115").unwrap(),
            Expectation::contains("Marlin"),
        ))
        .case(TestCase::new(
            "Endstops",
            Command::new("M119").unwrap(),
            Expectation::field_present("x_min"),
        ))
        .case(TestCase::new(
            "Position",
            Command::new("M114").unwrap(),
            Expectation::field_present("X"),
        ));

    let session = Orchestrator::new(params, ExecutionPolicy::default(), vec![agent]).run();
    let summary = report::summarize(&session);
    println!("{}", report::render_text(&summary));

    assert!(session.abort.is_none());
    assert_eq!(session.reports[0].count(TestStatus::Passed), 3);
}
