//! End-to-end flows over a real local-socket channel: one in-process
//! host service, one client connection per command.

use interprocess::local_socket::tokio::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use host_harness::channel::cancel_channel_name;
use host_harness::host::module::StaticModule;
use host_harness::protocol::{Command, Outcome, END_SENTINEL};
use host_harness::runner::discovery::try_connect;
use host_harness::runner::execute;

use super::support::{
    self, mutating_case, start_service, trivial_case, SUITE_ARTIFACT,
};

fn three_case_module() -> StaticModule {
    StaticModule::new(
        "integration",
        vec![
            mutating_case("integration::first_mutation"),
            mutating_case("integration::second_mutation"),
            trivial_case("integration::no_model"),
        ],
    )
}

fn run_command(methods: Vec<String>) -> Command {
    Command::run_tests(SUITE_ARTIFACT, methods, cancel_channel_name("HarnessIt"))
}

/// Three tests yield exactly three results, then the terminal line.
/// Two of them mutate the same document and assert pre-state, so a
/// missing rollback would surface as a failure here.
#[tokio::test]
async fn three_tests_stream_three_results_then_end() {
    let service = start_service(three_case_module).await;

    let stream = try_connect(&service.channel, std::time::Duration::from_secs(2))
        .await
        .expect("client must connect");
    let summary = execute(stream, &run_command(vec![]), CancellationToken::new(), None)
        .await
        .expect("run must complete");

    assert!(summary.clean_end, "the sentinel must arrive");
    assert_eq!(summary.results.len(), 3);
    assert!(
        summary.results.iter().all(|r| r.outcome == Outcome::Passed),
        "all three must pass: {:?}",
        summary.results
    );
    assert!(!summary.any_failed());

    // The document cache outlives the run: both mutating cases shared
    // one cached document, kept open for the host's lifetime.
    assert_eq!(service.host.open_documents(), 1);

    service.stop().await;
}

/// A single-method filter yields exactly one result for that method.
#[tokio::test]
async fn method_filter_selects_exactly_one() {
    let service = start_service(three_case_module).await;

    let stream = try_connect(&service.channel, std::time::Duration::from_secs(2))
        .await
        .expect("client must connect");
    let summary = execute(
        stream,
        &run_command(vec!["integration::no_model".into()]),
        CancellationToken::new(),
        None,
    )
    .await
    .expect("run must complete");

    assert!(summary.clean_end);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].name, "integration::no_model");

    service.stop().await;
}

/// A failing case is reported with its message and the rest of the run
/// still happens.
#[tokio::test]
async fn failing_case_is_reported_and_the_run_continues() {
    let service = start_service(|| {
        StaticModule::new(
            "integration",
            vec![
                support::trivial_case("integration::passes"),
                host_harness::host::module::TestCase::new("integration::fails", |_input| {
                    Err(host_harness::host::module::TestFailure::new(
                        "expected 4 walls, found 3",
                    ))
                }),
                support::trivial_case("integration::also_passes"),
            ],
        )
    })
    .await;

    let stream = try_connect(&service.channel, std::time::Duration::from_secs(2))
        .await
        .expect("client must connect");
    let summary = execute(stream, &run_command(vec![]), CancellationToken::new(), None)
        .await
        .expect("run must complete");

    assert!(summary.clean_end);
    assert_eq!(summary.results.len(), 3);
    assert!(summary.any_failed());
    let failed = &summary.results[1];
    assert_eq!(failed.outcome, Outcome::Failed);
    assert!(
        failed
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("expected 4 walls")),
        "got: {:?}",
        failed.error_message
    );
    assert_eq!(summary.results[2].outcome, Outcome::Passed);

    service.stop().await;
}

/// A connection that sends garbage instead of a command still gets a
/// well-formed failure result plus the terminal line — the reader never
/// hangs on a silently dead connection.
#[tokio::test]
async fn malformed_command_yields_failure_result_and_end() {
    let service = start_service(three_case_module).await;

    let stream = try_connect(&service.channel, std::time::Duration::from_secs(2))
        .await
        .expect("client must connect");
    let (recv, mut send) = stream.split();

    send.write_all(b"this is not a command\n")
        .await
        .expect("write must succeed");
    send.flush().await.expect("flush must succeed");

    let mut reader = BufReader::new(recv);
    let mut lines = Vec::new();
    let read_all = async {
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.expect("read must succeed");
            if n == 0 {
                break;
            }
            let trimmed = line.trim().to_owned();
            let done = trimmed == END_SENTINEL;
            lines.push(trimmed);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), read_all)
        .await
        .expect("the host must terminate the stream");

    assert_eq!(lines.last().map(String::as_str), Some(END_SENTINEL));
    assert_eq!(lines.len(), 2, "one failure result, then the sentinel: {lines:?}");
    assert!(lines[0].contains("\"Outcome\":\"Failed\""), "got: {}", lines[0]);

    service.stop().await;
}

/// One connection at a time: a second command is serviced after the
/// first response completes, on a fresh connection.
#[tokio::test]
async fn sequential_connections_are_both_serviced() {
    let service = start_service(three_case_module).await;

    for round in 0..2 {
        let stream = try_connect(&service.channel, std::time::Duration::from_secs(2))
            .await
            .expect("client must connect");
        let summary = execute(stream, &run_command(vec![]), CancellationToken::new(), None)
            .await
            .expect("run must complete");
        assert!(summary.clean_end, "round {round} must terminate cleanly");
        assert_eq!(summary.results.len(), 3, "round {round} must see all results");
        assert!(
            summary.results.iter().all(|r| r.outcome == Outcome::Passed),
            "round {round}: isolation must reset state between runs: {:?}",
            summary.results
        );
    }

    service.stop().await;
}

/// An unknown artifact is a failure result, not a dead connection, and
/// the host stays available for the next command.
#[tokio::test]
async fn unknown_artifact_fails_gracefully() {
    let service = start_service(three_case_module).await;

    let stream = try_connect(&service.channel, std::time::Duration::from_secs(2))
        .await
        .expect("client must connect");
    let command = Command::run_tests(
        "suite:nonexistent",
        vec![],
        cancel_channel_name("HarnessIt"),
    );
    let summary = execute(stream, &command, CancellationToken::new(), None)
        .await
        .expect("run must complete");

    assert!(summary.clean_end, "the sentinel must still arrive");
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].outcome, Outcome::Failed);

    // The listener must accept the next connection afterwards.
    let stream = try_connect(&service.channel, std::time::Duration::from_secs(2))
        .await
        .expect("the host must stay available");
    let summary = execute(stream, &run_command(vec![]), CancellationToken::new(), None)
        .await
        .expect("run must complete");
    assert!(summary.clean_end);
    assert_eq!(summary.results.len(), 3);

    service.stop().await;
}
