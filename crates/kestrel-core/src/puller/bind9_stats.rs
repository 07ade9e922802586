// ── BIND 9 statistics puller ──
//
// Fetches the JSON statistics channel of every active named daemon and
// keeps the per-view resolver cache counters on the daemon row.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kestrel_agent::{AccessPoint, AccessPointKind, ConnectedAgents};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DaemonLocks, Outcome, PassCounters, PullTask, bounded, for_each_daemon};
use crate::config::PullerConfig;
use crate::error::{CoreError, Result};
use crate::model::setting::BIND9_STATS_PULLER_INTERVAL;
use crate::model::{AppType, Bind9Stats, DaemonId, DaemonName, ViewStats};
use crate::store::Inventory;

fn counter(stats: &Value, name: &str) -> u64 {
    stats.get(name).and_then(Value::as_u64).unwrap_or(0)
}

/// Per-view cache statistics of a `json/v1` document.
pub fn parse_view_stats(document: &Value) -> Result<BTreeMap<String, ViewStats>> {
    let views = document
        .get("views")
        .and_then(Value::as_object)
        .ok_or_else(|| CoreError::malformed("statistics document without views"))?;
    Ok(views
        .iter()
        .map(|(name, view)| {
            let cache = view
                .pointer("/resolver/cachestats")
                .unwrap_or(&Value::Null);
            let stats = ViewStats {
                cache_hits: counter(cache, "CacheHits"),
                cache_misses: counter(cache, "CacheMisses"),
                query_hits: counter(cache, "QueryHits"),
                query_misses: counter(cache, "QueryMisses"),
            };
            (name.clone(), stats)
        })
        .collect())
}

pub struct Bind9StatsPuller {
    inventory: Arc<Inventory>,
    agents: Arc<dyn ConnectedAgents>,
    locks: DaemonLocks,
    config: PullerConfig,
}

impl Bind9StatsPuller {
    pub fn new(
        inventory: Arc<Inventory>,
        agents: Arc<dyn ConnectedAgents>,
        locks: DaemonLocks,
        config: PullerConfig,
    ) -> Self {
        Self {
            inventory,
            agents,
            locks,
            config,
        }
    }

    pub async fn pull_daemon(
        &self,
        daemon_id: DaemonId,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let _lock = self.locks.lock(daemon_id).await;
        let snapshot = self.inventory.snapshot();
        let daemon = snapshot.daemon(daemon_id)?;
        if !daemon.active || daemon.name != DaemonName::Named {
            return Ok(Outcome::Skip);
        }
        let app = snapshot.app_of(daemon_id)?;

        let registered = app
            .access_points
            .iter()
            .find(|ap| ap.kind == AccessPointKind::Statistics)
            .cloned();
        let configured = daemon
            .bind9_config()
            .and_then(|cfg| cfg.statistics_channel())
            .map(|channel| AccessPoint::statistics(channel.host, channel.port));
        let Some(access_point) = registered.or(configured) else {
            debug!(app = %app.name, "no statistics channel");
            return Ok(Outcome::Skip);
        };

        let document = bounded(
            self.agents.forward_to_named_stats(&access_point),
            self.config.command_timeout,
            cancel,
        )
        .await?;
        let stats = Bind9Stats {
            views: parse_view_stats(&document)?,
            collected_at: Utc::now(),
        };

        let mut tx = self.inventory.begin().await;
        if let Some(daemon) = tx.daemons.get_mut(&daemon_id) {
            daemon.bind9_stats = Some(stats);
        }
        tx.commit();
        Ok(Outcome::Success)
    }
}

#[async_trait]
impl PullTask for Bind9StatsPuller {
    fn name(&self) -> &'static str {
        "bind9_stats"
    }

    fn interval_setting(&self) -> &'static str {
        BIND9_STATS_PULLER_INTERVAL
    }

    async fn pull(&self, cancel: &CancellationToken) -> Result<PassCounters> {
        let daemons: Vec<DaemonId> = self
            .inventory
            .snapshot()
            .daemons_of_kind(AppType::Bind9)
            .map(|d| d.id)
            .collect();
        Ok(for_each_daemon(self.name(), daemons, self.config.fan_out, |id| {
            self.pull_daemon(id, cancel)
        })
        .await)
    }
}
