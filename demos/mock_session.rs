//! Runs a short validation session against a scripted board.
//!
//! No hardware needed: `MockSerialPort` plays the printer. One endstop is
//! reported as triggered so the summary shows a failure next to the passes.
//!
//! ```bash
//! cargo run --example mock_session
//! ```

use marlin_harness::{
    logging, report, Agent, Command, ConnectionParams, ExecutionPolicy, Expectation, MockResponse,
    MockSerialPort, Orchestrator, PortConfiguration, TestCase, Transport,
};
use marlin_harness::config::LoggingConfig;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init(&LoggingConfig::default());

    let port = MockSerialPort::new("MOCK0");
    port.set_default_reply(
        "M115",
        MockResponse::lines("FIRMWARE_NAME:Marlin 2.1.2.1 (Github) EXTRUDER_COUNT:1\nCap:EEPROM:1\nok"),
    );
    port.set_default_reply("M105", MockResponse::lines("ok T:22.10 /0.00 B:21.40 /0.00 @:0 B@:0"));
    port.set_default_reply(
        "M119",
        MockResponse::lines("Reporting endstop status\nx_min: open\ny_min: TRIGGERED\nz_min: open\nok"),
    );

    let agent = Agent::new("demo", "Identification, temperatures and endstops")
        .case(TestCase::new(
            "Firmware",
            Command::new("M115")?,
            Expectation::contains("Marlin"),
        ))
        .case(TestCase::new(
            "Temperatures",
            Command::new("M105")?,
            Expectation::all(vec![
                Expectation::number("T", Some(0.0), Some(300.0)),
                Expectation::number("B", Some(0.0), Some(150.0)),
            ]),
        ))
        .case(TestCase::new(
            "Y endstop",
            Command::new("M119")?,
            Expectation::flag("y_min", false),
        ));

    let params = ConnectionParams {
        port: "MOCK0".to_string(),
        framing: PortConfiguration::default(),
        connect_timeout: Duration::from_secs(1),
    };
    let policy = ExecutionPolicy {
        retry_backoff: Duration::from_millis(50),
        ..ExecutionPolicy::default()
    };

    let session = Orchestrator::new(params, policy, vec![agent])
        .run_with(|p| Transport::open(Box::new(port.clone()), p.connect_timeout));

    let summary = report::summarize(&session);
    print!("{}", report::render_text(&summary));
    println!("\n{}", report::to_json(&summary)?);
    Ok(())
}
