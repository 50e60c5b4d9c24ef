//! Shared test utilities for the harness integration tests.
//!
//! This module provides:
//! - A simulated Marlin board built on `MockSerialPort`
//! - Fast execution policies and connection parameters
//! - Small builders for agents and sessions

#![allow(dead_code)]

use marlin_harness::{
    Agent, Command, ConnectionParams, ExecutionPolicy, Expectation, MockResponse, MockSerialPort,
    Orchestrator, PortConfiguration, Session, TestCase, Transport,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const FIRMWARE: &str = "FIRMWARE_NAME:Marlin 2.1.2.1 (Github) SOURCE_CODE_URL:github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:ERESUS F429 EXTRUDER_COUNT:1";

/// A mock port that only answers the identification probe.
pub fn marlin_mock(port_name: &str) -> MockSerialPort {
    let mock = MockSerialPort::new(port_name);
    mock.set_default_reply(
        "M115",
        MockResponse::Lines(vec![
            FIRMWARE.to_string(),
            "Cap:EEPROM:1".to_string(),
            "Cap:AUTOREPORT_TEMP:1".to_string(),
            "ok".to_string(),
        ]),
    );
    mock
}

/// A mock board that answers every built-in command plausibly and tracks
/// axis positions so motion checks see the effect of their setup moves.
pub fn simulated_printer(port_name: &str) -> MockSerialPort {
    let mock = marlin_mock(port_name);
    let position: Arc<Mutex<BTreeMap<char, f64>>> = Arc::new(Mutex::new(
        ['X', 'Y', 'Z', 'E'].into_iter().map(|axis| (axis, 0.0)).collect(),
    ));

    mock.set_responder(move |line| {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(_) => return MockResponse::lines("echo:Unknown command\nok"),
        };
        let mut position = position.lock();
        match command.mnemonic() {
            "G28" => {
                for param in command.params() {
                    position.insert(param.letter, 0.0);
                }
                MockResponse::ok()
            }
            "G1" | "G0" | "G92" => {
                for param in command.params() {
                    if let Some(value) = param.value.as_deref().and_then(|v| v.parse().ok()) {
                        if param.letter != 'F' {
                            position.insert(param.letter, value);
                        }
                    }
                }
                MockResponse::ok()
            }
            "M114" => {
                let at = |axis: char| position.get(&axis).copied().unwrap_or(0.0);
                MockResponse::Lines(vec![
                    format!(
                        "X:{:.2} Y:{:.2} Z:{:.2} E:{:.2} Count X:{} Y:{} Z:{}",
                        at('X'),
                        at('Y'),
                        at('Z'),
                        at('E'),
                        (at('X') * 80.0) as i64,
                        (at('Y') * 80.0) as i64,
                        (at('Z') * 400.0) as i64
                    ),
                    "ok".to_string(),
                ])
            }
            "M119" => MockResponse::lines(
                "Reporting endstop status\nx_min: open\ny_min: open\nz_min: open\nz_probe: open\nok",
            ),
            "M105" => MockResponse::lines("ok T:21.30 /0.00 B:20.90 /0.00 @:0 B@:0"),
            "M122" => MockResponse::lines(
                "\tX\tY\tZ\tE\nEnabled\tfalse\tfalse\tfalse\tfalse\nmsteps\t16\t16\t16\t16\nTesting X connection... OK\nok",
            ),
            "M906" => MockResponse::lines(
                "X driver current: 800\nY driver current: 800\nZ driver current: 800\nE driver current: 650\nok",
            ),
            "M350" => MockResponse::lines("echo:X:16 Y:16 Z:16 E:16\nok"),
            "M280" => MockResponse::ok(),
            "M503" => MockResponse::lines(
                "echo:; Steps per unit:\necho:  M92 X80.00 Y80.00 Z400.00 E93.00\necho:; THERMAL_PROTECTION_HOTENDS enabled\nok",
            ),
            "M112" => MockResponse::lines("Error:Printer halted. kill() called!"),
            "M999" => MockResponse::ok(),
            _ => MockResponse::ok(),
        }
    });
    mock
}

/// Short timeouts and no backoff so failing paths finish quickly.
pub fn fast_policy() -> ExecutionPolicy {
    ExecutionPolicy {
        command_timeout: Duration::from_millis(100),
        retries: 0,
        retry_backoff: Duration::from_millis(1),
        backoff_multiplier: 1.0,
    }
}

pub fn params(port_name: &str) -> ConnectionParams {
    ConnectionParams {
        port: port_name.to_string(),
        framing: PortConfiguration::default(),
        connect_timeout: Duration::from_millis(500),
    }
}

/// Open the given mock inside the orchestrator and run the session.
pub fn run_session(mock: &MockSerialPort, policy: ExecutionPolicy, agents: Vec<Agent>) -> Session {
    let port = mock.clone();
    Orchestrator::new(params("MOCK0"), policy, agents)
        .run_with(|p| Transport::open(Box::new(port), p.connect_timeout))
}

/// Build an agent from `(case name, G-code line, expectation)` triples.
pub fn agent(name: &str, cases: Vec<(&str, &str, Expectation)>) -> Agent {
    cases
        .into_iter()
        .fold(Agent::new(name, format!("{name} checks")), |agent, (case, line, expectation)| {
            agent.case(TestCase::new(
                case,
                Command::parse(line).expect("valid G-code in test"),
                expectation,
            ))
        })
}

/// Strip settle delays so built-in agents run fast against a mock.
pub fn without_settle(mut agent: Agent) -> Agent {
    for case in &mut agent.cases {
        case.settle = None;
    }
    agent
}
