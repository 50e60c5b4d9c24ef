use clap::{Parser, ValueEnum};
use marlin_harness::config::{ConfigLoader, split_list};
use marlin_harness::{catalog, logging, report, HarnessError, HarnessResult, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "marlin-harness",
    version,
    about = "Hardware validation harness for Marlin printer boards.",
    long_about = "Connects to a Marlin board over a serial link, runs the scheduled diagnostic agents (hardware, TMC drivers, BLTouch probe, safety) one command at a time, and reports pass/fail per check. Settings come from harness.toml, MARLIN_HARNESS_* environment variables and these flags, in increasing priority."
)]
struct Args {
    /// Configuration file (default: ./harness.toml or the platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port or configured alias, e.g. /dev/ttyACM0 or COM3.
    #[arg(short, long)]
    port: Option<String>,

    /// Link speed.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Maximum wait for the board to answer the identification probe.
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Maximum wait per command.
    #[arg(long)]
    command_timeout_ms: Option<u64>,

    /// Retries per case after the first attempt.
    #[arg(long)]
    retries: Option<u32>,

    /// Agents to run, in order (comma separated). `safety` halts the board.
    #[arg(short, long, value_delimiter = ',')]
    agents: Vec<String>,

    /// Report format on stdout.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Also write the JSON summary to this file.
    #[arg(long)]
    report: Option<PathBuf>,

    /// List the available agents and exit.
    #[arg(long)]
    list_agents: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> HarnessResult<ExitCode> {
    let mut loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    apply_cli_overrides(&args, &mut loader);
    loader.config().validate()?;
    let config = loader.config().clone();

    logging::init(&config.logging);
    if let Some(path) = &loader.config_path {
        info!(path = %path.display(), "configuration loaded");
    }

    if args.print_config {
        print!("{}", loader.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }
    if args.list_agents {
        for (name, description) in catalog::BUILTIN {
            println!("{name:<12} {description}");
        }
        for agent in &config.agents {
            println!("{:<12} {} (custom, {} cases)", agent.name, agent.description, agent.cases.len());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let orchestrator = Orchestrator::new(
        config.serial.connection_params(),
        config.policy(),
        config.schedule()?,
    );
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("signal received, stopping after the current command");
        cancel.cancel();
    });

    let session = tokio::task::spawn_blocking(move || orchestrator.run())
        .await
        .map_err(|e| HarnessError::Engine(e.to_string()))?;

    let summary = report::summarize(&session);
    let json = report::to_json(&summary)?;
    match args.format {
        OutputFormat::Text => print!("{}", report::render_text(&summary)),
        OutputFormat::Json => println!("{json}"),
    }
    if let Some(path) = &args.report {
        std::fs::write(path, &json).map_err(|source| HarnessError::Report {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "report written");
    }

    Ok(if summary.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_cli_overrides(args: &Args, loader: &mut ConfigLoader) {
    let config = loader.config_mut();
    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud = baud;
    }
    if let Some(ms) = args.connect_timeout_ms {
        config.serial.connect_timeout_ms = ms;
    }
    if let Some(ms) = args.command_timeout_ms {
        config.serial.command_timeout_ms = ms;
    }
    if let Some(retries) = args.retries {
        config.run.retries = retries;
    }
    if !args.agents.is_empty() {
        config.run.agents = split_list(&args.agents.join(","));
    }
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
