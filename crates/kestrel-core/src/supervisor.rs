// ── Puller supervisor ──
//
// Owns the periodic pullers. Every puller shares one set of daemon locks,
// so host and stats cycles of the same daemon never interleave.

use std::sync::Arc;

use kestrel_agent::ConnectedAgents;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PullerConfig;
use crate::puller::{
    Bind9StatsPuller, DaemonLocks, HaStatusPuller, HostPuller, PeriodicPuller, PullTask,
    PullerStatus, StatsPuller,
};
use crate::review::ReviewDispatcher;
use crate::store::Inventory;

pub struct Supervisor {
    inventory: Arc<Inventory>,
    reviews: Arc<dyn ReviewDispatcher>,
    cancel: CancellationToken,
    pullers: Vec<PeriodicPuller>,
}

impl Supervisor {
    /// Spawn every periodic puller on the current runtime.
    pub fn start(
        inventory: Arc<Inventory>,
        agents: Arc<dyn ConnectedAgents>,
        reviews: Arc<dyn ReviewDispatcher>,
        config: PullerConfig,
    ) -> Self {
        let locks = DaemonLocks::new();
        let tasks: Vec<Arc<dyn PullTask>> = vec![
            Arc::new(HostPuller::new(
                Arc::clone(&inventory),
                Arc::clone(&agents),
                Arc::clone(&reviews),
                locks.clone(),
                config.clone(),
            )),
            Arc::new(StatsPuller::new(
                Arc::clone(&inventory),
                Arc::clone(&agents),
                locks.clone(),
                config.clone(),
            )),
            Arc::new(HaStatusPuller::new(
                Arc::clone(&inventory),
                Arc::clone(&agents),
                config.clone(),
            )),
            Arc::new(Bind9StatsPuller::new(
                Arc::clone(&inventory),
                agents,
                locks,
                config.clone(),
            )),
        ];
        Self::with_tasks(inventory, reviews, tasks, &config)
    }

    /// Spawn the given tasks instead of the built-in pullers.
    pub fn with_tasks(
        inventory: Arc<Inventory>,
        reviews: Arc<dyn ReviewDispatcher>,
        tasks: Vec<Arc<dyn PullTask>>,
        config: &PullerConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let pullers = tasks
            .into_iter()
            .map(|task| {
                PeriodicPuller::spawn(task, Arc::clone(&inventory), config, cancel.child_token())
            })
            .collect::<Vec<_>>();
        info!(pullers = pullers.len(), "pullers started");
        Self {
            inventory,
            reviews,
            cancel,
            pullers,
        }
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    /// Review dispatcher shared with the pullers.
    pub fn reviews(&self) -> Arc<dyn ReviewDispatcher> {
        Arc::clone(&self.reviews)
    }

    pub fn statuses(&self) -> Vec<PullerStatus> {
        self.pullers.iter().map(PeriodicPuller::status).collect()
    }

    pub fn status(&self, name: &str) -> Option<PullerStatus> {
        self.pullers
            .iter()
            .find(|p| p.name() == name)
            .map(PeriodicPuller::status)
    }

    /// Cancel every puller and wait for in-flight ticks to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for puller in self.pullers {
            puller.join().await;
        }
        info!("pullers stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::puller::PassCounters;
    use crate::review::NoopReviews;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Slow;

    #[async_trait]
    impl PullTask for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn interval_setting(&self) -> &'static str {
            crate::model::setting::KEA_HOSTS_PULLER_INTERVAL
        }

        async fn pull(&self, cancel: &CancellationToken) -> Result<PassCounters> {
            cancel.cancelled().await;
            Err(crate::error::CoreError::Cancelled)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_running_ticks() {
        let supervisor = Supervisor::with_tasks(
            Arc::new(Inventory::new()),
            Arc::new(NoopReviews),
            vec![Arc::new(Slow)],
            &PullerConfig::default(),
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        let status = supervisor.status("slow").unwrap();
        assert!(status.last_invoked_at.is_some());
        assert!(status.last_finished_at.is_none());
        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn built_in_pullers_report_status() {
        struct NoAgents;

        #[async_trait]
        impl ConnectedAgents for NoAgents {
            async fn forward_to_kea(
                &self,
                _access_point: &kestrel_agent::AccessPoint,
                _command: &kestrel_agent::KeaCommand,
            ) -> std::result::Result<Vec<kestrel_agent::KeaResponse>, kestrel_agent::Error> {
                Ok(Vec::new())
            }

            async fn forward_to_named_stats(
                &self,
                _access_point: &kestrel_agent::AccessPoint,
            ) -> std::result::Result<serde_json::Value, kestrel_agent::Error> {
                Ok(serde_json::Value::Null)
            }
        }

        let supervisor = Supervisor::start(
            Arc::new(Inventory::new()),
            Arc::new(NoAgents),
            Arc::new(NoopReviews),
            PullerConfig::default(),
        );
        let names: Vec<String> = supervisor.statuses().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["kea_hosts", "kea_stats", "kea_status", "bind9_stats"]);
        supervisor.shutdown().await;
    }
}
