//! Launch path against the real `harness-host` binary.

use std::time::Duration;

use serial_test::serial;
use tokio_util::sync::CancellationToken;

use host_harness::channel::cancel_channel_name;
use host_harness::config::RunnerConfig;
use host_harness::host::diagnostics::DIAGNOSTICS_ARTIFACT;
use host_harness::protocol::{Command, Outcome};
use host_harness::runner::{connect_or_launch, execute};

/// No candidate is running, so the runner launches the bundled host
/// binary, waits for its channel, runs the built-in diagnostics module,
/// and streams three passing results.
#[tokio::test]
#[serial]
#[cfg(unix)]
async fn launches_the_bundled_host_and_runs_diagnostics() {
    let config = RunnerConfig {
        host_executable: Some(env!("CARGO_BIN_EXE_harness-host").into()),
        startup_timeout_secs: 30,
        listener_timeout_secs: 60,
        probe_timeout_ms: 100,
        poll_interval_ms: 200,
        ..RunnerConfig::default()
    };

    let connected = tokio::time::timeout(Duration::from_secs(90), connect_or_launch(&config))
        .await
        .expect("discovery must terminate")
        .expect("a host must be launched and reachable");
    let pid = connected.pid;

    let command = Command::run_tests(
        DIAGNOSTICS_ARTIFACT,
        vec![],
        cancel_channel_name(&config.channel_prefix),
    );
    let run_outcome = tokio::time::timeout(
        Duration::from_secs(30),
        execute(connected.stream, &command, CancellationToken::new(), None),
    )
    .await;

    // Tear the launched host down before asserting, so a failed
    // assertion does not leak the process.
    let _ = std::process::Command::new("kill").arg(pid.to_string()).status();

    let summary = run_outcome
        .expect("the run must not hang")
        .expect("run must complete");
    assert!(summary.clean_end, "diagnostics must stream to the sentinel");
    assert_eq!(summary.results.len(), 3, "got: {:?}", summary.results);
    assert!(
        summary.results.iter().all(|r| r.outcome == Outcome::Passed),
        "diagnostics must pass: {:?}",
        summary.results
    );
}
