//! Cooperative cancellation over the side-channel.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use host_harness::channel::cancel_channel_name;
use host_harness::host::module::{StaticModule, TestCase, TestFailure, TestParam};
use host_harness::protocol::{Command, Outcome};
use host_harness::runner::discovery::try_connect;
use host_harness::runner::execute;

use super::support::{start_service, trivial_case, SUITE_ARTIFACT};

/// First case blocks until the cancellation token fires (or times out
/// and fails loudly); the remaining cases never start.
fn cancellable_module() -> StaticModule {
    let waiting_case = TestCase::new("integration::waits_for_cancel", |input| {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !input.cancel.is_cancelled() {
            if std::time::Instant::now() > deadline {
                return Err(TestFailure::new("cancellation never arrived"));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    })
    .with_params(vec![TestParam::Cancel]);

    StaticModule::new(
        "integration",
        vec![
            waiting_case,
            trivial_case("integration::never_starts_a"),
            trivial_case("integration::never_starts_b"),
        ],
    )
}

/// A token on the side-channel stops not-yet-started cases, already
/// completed results stand, and the terminal line still arrives.
#[tokio::test]
async fn side_channel_cancel_skips_remaining_cases() {
    let service = start_service(cancellable_module).await;

    let stream = try_connect(&service.channel, Duration::from_secs(2))
        .await
        .expect("client must connect");
    let command = Command::run_tests(SUITE_ARTIFACT, vec![], cancel_channel_name("HarnessIt"));

    // Request cancellation shortly after the run starts; the first case
    // is by then blocking on the token.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        execute(stream, &command, cancel, None),
    )
    .await
    .expect("the run must not hang")
    .expect("run must complete");

    assert!(summary.clean_end, "END must still arrive after a cancel");
    assert_eq!(summary.results.len(), 3, "every case must be accounted for");

    // The waiting case either saw the token (Passed) or was itself
    // skipped when the cancel won the race to the first check.
    assert_ne!(
        summary.results[0].outcome,
        Outcome::Failed,
        "the waiting case must observe the cancellation: {:?}",
        summary.results[0]
    );
    for skipped in &summary.results[1..] {
        assert_eq!(
            skipped.outcome,
            Outcome::Skipped,
            "cases after the cancel must be skipped: {skipped:?}"
        );
        assert!(
            skipped.error_message.is_none(),
            "cancellation is not an error"
        );
    }

    service.stop().await;
}
