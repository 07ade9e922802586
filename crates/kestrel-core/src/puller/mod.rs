// ── Periodic puller runtime ──
//
// A `PeriodicPuller` owns one background task that runs a `PullTask` at
// the interval stored in the inventory settings. The interval is re-read
// before every tick; a value of zero or less pauses the puller. Ticks run
// inline in the loop, so a puller never overlaps itself.

pub mod bind9_stats;
pub mod ha_status;
pub mod hosts;
pub mod pager;
pub mod rps;
pub mod stats;
pub mod utilization;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream;
use kestrel_agent::{AccessPoint, ConnectedAgents, KeaCommand, KeaResponse, ResultCode};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PullerConfig;
use crate::error::{CoreError, Result};
use crate::model::DaemonId;
use crate::store::Inventory;

pub use bind9_stats::Bind9StatsPuller;
pub use ha_status::HaStatusPuller;
pub use hosts::HostPuller;
pub use stats::StatsPuller;

// ── Pass accounting ─────────────────────────────────────────────────

/// Result of one daemon's cycle within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Skip,
}

/// Per-pass daemon counters, logged when the pass ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassCounters {
    pub success: usize,
    pub skip: usize,
    pub erred: usize,
}

impl PassCounters {
    pub fn record(&mut self, result: &Result<Outcome>) {
        match result {
            Ok(Outcome::Success) => self.success += 1,
            Ok(Outcome::Skip) => self.skip += 1,
            Err(_) => self.erred += 1,
        }
    }
}

impl fmt::Display for PassCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success={} skip={} erred={}",
            self.success, self.skip, self.erred
        )
    }
}

/// Run `work` for every daemon, at most `fan_out` at once.
///
/// Errors are logged per daemon and counted; they never abort the pass.
pub async fn for_each_daemon<F, Fut>(
    puller: &'static str,
    daemons: Vec<DaemonId>,
    fan_out: usize,
    work: F,
) -> PassCounters
where
    F: Fn(DaemonId) -> Fut,
    Fut: Future<Output = Result<Outcome>>,
{
    let mut counters = PassCounters::default();
    let mut results = stream::iter(daemons)
        .map(|id| {
            let fut = work(id);
            async move { (id, fut.await) }
        })
        .buffer_unordered(fan_out.max(1));

    while let Some((daemon_id, result)) = results.next().await {
        if let Err(e) = &result {
            warn!(puller, daemon_id = %daemon_id, error = %e, "daemon pull failed");
        }
        counters.record(&result);
    }
    info!(puller, success = counters.success, skip = counters.skip, erred = counters.erred, "pass finished");
    counters
}

// ── Per-daemon serialisation ────────────────────────────────────────

/// One lock per daemon, shared by every puller that writes daemon state.
#[derive(Debug, Clone, Default)]
pub struct DaemonLocks {
    locks: Arc<DashMap<DaemonId, Arc<Mutex<()>>>>,
}

impl DaemonLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, daemon_id: DaemonId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(daemon_id).or_default().value());
        lock.lock_owned().await
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Await an agent call bounded by `timeout` and abandoned on cancellation.
pub async fn bounded<T>(
    call: impl Future<Output = Result<T, kestrel_agent::Error>>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CoreError::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(value) => Ok(value?),
            Err(_) => Err(CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            }),
        },
    }
}

/// Send one command and return the first response.
pub async fn send_command(
    agents: &dyn ConnectedAgents,
    access_point: &AccessPoint,
    command: &KeaCommand,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<KeaResponse> {
    let responses = bounded(agents.forward_to_kea(access_point, command), timeout, cancel).await?;
    responses.into_iter().next().ok_or_else(|| {
        CoreError::malformed(format!("empty response to {}", command.command))
    })
}

/// Map error result codes to errors, passing success and empty through.
pub fn check_response(response: KeaResponse, command: &str, daemon: &str) -> Result<KeaResponse> {
    match response.code() {
        ResultCode::Success | ResultCode::Empty => Ok(response),
        ResultCode::Unsupported => Err(CoreError::UnsupportedCommand {
            command: command.to_owned(),
            daemon: daemon.to_owned(),
        }),
        ResultCode::Error | ResultCode::Other(_) => Err(CoreError::CommandFailed {
            daemon: daemon.to_owned(),
            command: command.to_owned(),
            text: response.text().to_owned(),
        }),
    }
}

// ── Periodic puller ─────────────────────────────────────────────────

#[async_trait]
pub trait PullTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Settings key holding the interval in seconds.
    fn interval_setting(&self) -> &'static str;

    /// One pass over all targets.
    async fn pull(&self, cancel: &CancellationToken) -> Result<PassCounters>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullerStatus {
    pub name: String,
    pub interval_secs: i64,
    pub paused: bool,
    pub last_invoked_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_counters: PassCounters,
}

pub struct PeriodicPuller {
    name: &'static str,
    status: Arc<ArcSwap<PullerStatus>>,
    handle: JoinHandle<()>,
}

impl PeriodicPuller {
    /// Spawn the puller loop on the current runtime.
    pub fn spawn(
        task: Arc<dyn PullTask>,
        inventory: Arc<Inventory>,
        config: &PullerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let name = task.name();
        let status = Arc::new(ArcSwap::from_pointee(PullerStatus {
            name: name.to_owned(),
            ..PullerStatus::default()
        }));
        let handle = tokio::spawn(run_loop(
            task,
            inventory,
            config.paused_recheck,
            Arc::clone(&status),
            cancel,
        ));
        Self {
            name,
            status,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn status(&self) -> PullerStatus {
        PullerStatus::clone(&self.status.load())
    }

    /// Wait for the loop to exit after cancellation.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(puller = self.name, error = %e, "puller task panicked");
        }
    }
}

fn update_status(status: &ArcSwap<PullerStatus>, f: impl Fn(&mut PullerStatus)) {
    status.rcu(|current| {
        let mut next = PullerStatus::clone(current);
        f(&mut next);
        next
    });
}

async fn run_loop(
    task: Arc<dyn PullTask>,
    inventory: Arc<Inventory>,
    paused_recheck: Duration,
    status: Arc<ArcSwap<PullerStatus>>,
    cancel: CancellationToken,
) {
    let name = task.name();
    debug!(puller = name, "puller started");

    loop {
        let secs = inventory.snapshot().interval_setting(task.interval_setting());
        let paused = secs <= 0;
        update_status(&status, |s| {
            s.interval_secs = secs;
            s.paused = paused;
        });

        let wait = if paused {
            paused_recheck
        } else {
            Duration::from_secs(secs.unsigned_abs())
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
        if paused {
            continue;
        }

        update_status(&status, |s| s.last_invoked_at = Some(Utc::now()));
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = task.pull(&cancel) => result,
        };

        let finished = Utc::now();
        match result {
            Ok(counters) => update_status(&status, |s| {
                s.last_finished_at = Some(finished);
                s.last_error = None;
                s.last_counters = counters;
            }),
            Err(CoreError::Cancelled) => break,
            Err(e) => {
                warn!(puller = name, error = %e, "pull failed, retrying next tick");
                let message = e.to_string();
                update_status(&status, |s| {
                    s.last_finished_at = Some(finished);
                    s.last_error = Some(message.clone());
                });
            }
        }
    }

    debug!(puller = name, "puller stopped");
}
