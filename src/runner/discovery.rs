//! Host process discovery and launch.
//!
//! Searching first avoids the cost of booting a new host when one is
//! already available and idle; only when every candidate refuses the
//! probe is a fresh instance launched.  The two-tier timeout — fast
//! probe per candidate, slow confirm against the launched process —
//! balances responsiveness against the cost of a full host boot.

use std::ffi::OsStr;
use std::time::{Duration, Instant};

use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::GenericNamespaced;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::channel::channel_name;
use crate::config::RunnerConfig;
use crate::{AppError, Result};

/// A connected host process.
pub struct ConnectedHost {
    /// The open main channel.
    pub stream: Stream,
    /// The host's process id.
    pub pid: u32,
    /// Whether the host was launched by this runner (as opposed to
    /// found already running).
    pub launched: bool,
}

impl std::fmt::Debug for ConnectedHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedHost")
            .field("pid", &self.pid)
            .field("launched", &self.launched)
            .finish_non_exhaustive()
    }
}

/// Resolve a reachable host: probe every running candidate, then launch
/// a new instance if allowed.
///
/// # Errors
///
/// Returns a single aggregate [`AppError::Connect`] enumerating every
/// attempted candidate and the launch attempt when no host could be
/// reached.  Never hangs: every step is bounded by a configured
/// timeout.
pub async fn connect_or_launch(config: &RunnerConfig) -> Result<ConnectedHost> {
    let mut attempts: Vec<String> = Vec::new();

    for pid in enumerate_candidates(&config.host_process_name) {
        let name = channel_name(&config.channel_prefix, crate_version(), pid);
        match try_connect(&name, config.probe_timeout()).await {
            Ok(stream) => {
                info!(pid, channel = %name, "connected to running host");
                return Ok(ConnectedHost {
                    stream,
                    pid,
                    launched: false,
                });
            }
            Err(err) => {
                debug!(pid, channel = %name, %err, "candidate probe failed");
                attempts.push(format!("pid {pid} ({name}): {err}"));
            }
        }
    }

    if !config.allow_launch {
        attempts.push("launch: disabled by configuration".into());
        return Err(aggregate_error(&attempts));
    }
    let Some(ref executable) = config.host_executable else {
        attempts.push("launch: no host executable configured".into());
        return Err(aggregate_error(&attempts));
    };

    match launch_and_connect(config, executable).await {
        Ok(connected) => Ok(connected),
        Err(err) => {
            attempts.push(format!("launch ({}): {err}", executable.display()));
            Err(aggregate_error(&attempts))
        }
    }
}

/// Pids of running processes matching the well-known host process name.
///
/// No version filter at this level — disambiguation happens entirely
/// through the derived channel name.
#[must_use]
pub fn enumerate_candidates(process_name: &str) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let wanted = OsStr::new(process_name);
    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(_, process)| process.name() == wanted)
        .map(|(pid, _)| pid.as_u32())
        .collect();
    pids.sort_unstable();
    pids
}

/// Launch a fresh host instance and wait for its channel to accept.
async fn launch_and_connect(
    config: &RunnerConfig,
    executable: &std::path::Path,
) -> Result<ConnectedHost> {
    info!(executable = %executable.display(), "launching new host instance");

    let mut child = tokio::process::Command::new(executable)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|err| AppError::Connect(format!("failed to start host process: {err}")))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Connect("host process exited immediately".into()))?;
    let name = channel_name(&config.channel_prefix, crate_version(), pid);

    // Phase one: the process itself must come up and stay up.  Process
    // readiness does not imply listener readiness, which is confirmed
    // separately below.
    wait_for_liveness(&mut child, pid, config).await?;

    // Phase two: poll the test channel until it accepts, with the
    // longer per-attempt timeout — the process is known to exist, so
    // the wait is worth it.
    let deadline = Instant::now() + config.listener_timeout();
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| AppError::Connect(format!("cannot observe host process: {err}")))?
        {
            return Err(AppError::Connect(format!(
                "host process exited during startup ({status})"
            )));
        }

        match try_connect(&name, config.connect_timeout()).await {
            Ok(stream) => {
                info!(pid, channel = %name, "connected to launched host");
                return Ok(ConnectedHost {
                    stream,
                    pid,
                    launched: true,
                });
            }
            Err(err) if Instant::now() >= deadline => {
                return Err(AppError::Connect(format!(
                    "test channel {name} not ready within {}s: {err}",
                    config.listener_timeout_secs
                )));
            }
            Err(err) => {
                debug!(pid, channel = %name, %err, "channel not ready yet");
                tokio::time::sleep(config.poll_interval()).await;
            }
        }
    }
}

/// Poll until the launched process is observably running, bounded by the
/// startup ceiling.
async fn wait_for_liveness(
    child: &mut tokio::process::Child,
    pid: u32,
    config: &RunnerConfig,
) -> Result<()> {
    let deadline = Instant::now() + config.startup_timeout();
    let mut system = System::new();
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| AppError::Connect(format!("cannot observe host process: {err}")))?
        {
            return Err(AppError::Connect(format!(
                "host process exited during startup ({status})"
            )));
        }

        let target = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        if system.process(target).is_some() {
            debug!(pid, "host process is alive");
            return Ok(());
        }

        if Instant::now() >= deadline {
            warn!(pid, "host process not observable; proceeding to channel polling");
            return Ok(());
        }
        tokio::time::sleep(config.poll_interval()).await;
    }
}

/// Attempt one bounded-latency connection to a channel name.
///
/// # Errors
///
/// Returns [`AppError::Connect`] on refusal or when `timeout` elapses.
pub async fn try_connect(name: &str, timeout: Duration) -> Result<Stream> {
    let ns_name = name
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Connect(format!("invalid channel name '{name}': {err}")))?;

    match tokio::time::timeout(timeout, Stream::connect(ns_name)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(AppError::Connect(format!("connection refused: {err}"))),
        Err(_) => Err(AppError::Connect(format!(
            "no answer within {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Build the single aggregate error enumerating every attempt.
fn aggregate_error(attempts: &[String]) -> AppError {
    if attempts.is_empty() {
        return AppError::Connect("no candidate host process found".into());
    }
    AppError::Connect(format!(
        "no test channel reachable after {} attempt(s): {}",
        attempts.len(),
        attempts.join("; ")
    ))
}

/// The build version both ends derive channel names from.
#[must_use]
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
