#![forbid(unsafe_code)]

//! `harness-run` — remote test runner CLI.
//!
//! Finds or launches a host process, sends one run command over the
//! test channel, and prints each result as it streams in.  Ctrl-C does
//! not abort the read loop: it forwards a cooperative cancellation
//! token over the side-channel and keeps reading until the host
//! terminates the stream.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use host_harness::channel::cancel_channel_name;
use host_harness::config::GlobalConfig;
use host_harness::protocol::{Command as RunCommand, Outcome, ResultMessage};
use host_harness::runner::{connect_or_launch, execute};
use host_harness::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "harness-run", about = "Remote test runner for host applications", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run tests from an artifact inside a host process.
    Run {
        /// Artifact identifying the test module on the host side.
        #[arg(long)]
        assembly: String,

        /// Test method to run; repeat for several.  Omit to run all.
        #[arg(long = "method")]
        methods: Vec<String>,

        /// Fail instead of launching a host when none is reachable.
        #[arg(long)]
        no_launch: bool,
    },
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(2);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to build tokio runtime: {err}");
            std::process::exit(2);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(2);
        }
    }
}

async fn run(args: Cli) -> Result<i32> {
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    let CliCommand::Run {
        assembly,
        methods,
        no_launch,
    } = args.command;

    if no_launch {
        config.runner.allow_launch = false;
    }

    let connected = connect_or_launch(&config.runner).await?;
    info!(
        pid = connected.pid,
        launched = connected.launched,
        "host connection established"
    );

    let command = RunCommand::run_tests(
        assembly,
        methods,
        cancel_channel_name(&config.runner.channel_prefix),
    );

    // Ctrl-C becomes a cooperative cancellation, not an abort: the read
    // loop keeps going until the host terminates the stream.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancellation requested, waiting for the host to wind down…");
            signal_cancel.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ResultMessage>();
    let printer = tokio::spawn(async move {
        while let Some(result) = progress_rx.recv().await {
            print_result(&result);
        }
    });

    let summary = execute(connected.stream, &command, cancel, Some(progress_tx)).await?;
    let _ = printer.await;

    println!(
        "{} test(s): {} passed, {} failed, {} skipped",
        summary.results.len(),
        count(&summary, Outcome::Passed),
        count(&summary, Outcome::Failed),
        count(&summary, Outcome::Skipped),
    );

    if !summary.clean_end {
        eprintln!("warning: connection closed before the terminal line; results are partial");
        return Ok(1);
    }
    if summary.any_failed() {
        return Ok(1);
    }
    Ok(0)
}

fn print_result(result: &ResultMessage) {
    println!(
        "{:7} {} ({:.3}s)",
        result.outcome.to_string(),
        result.name,
        result.duration
    );
    if let Some(ref message) = result.error_message {
        println!("        {message}");
    }
    if let Some(ref stack) = result.error_stack_trace {
        for line in stack.lines() {
            println!("        {line}");
        }
    }
}

fn count(summary: &host_harness::runner::RunSummary, outcome: Outcome) -> usize {
    summary
        .results
        .iter()
        .filter(|result| result.outcome == outcome)
        .count()
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
