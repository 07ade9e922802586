// ── HA status puller ──
//
// Polls `status-get` on the primary and secondary of every HA service and
// records the advisory state each server reports. The stats puller reads
// these states to pick the authoritative daemon of a relationship.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kestrel_agent::{ConnectedAgents, KeaCommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Outcome, PassCounters, PullTask, check_response, for_each_daemon, send_command};
use crate::config::PullerConfig;
use crate::error::{CoreError, Result};
use crate::model::setting::KEA_STATUS_PULLER_INTERVAL;
use crate::model::{DaemonId, HaService, HaState, ServiceId};
use crate::store::{Inventory, Tables};

pub const STATUS_GET: &str = "status-get";

/// One relationship as reported by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    /// `server-name` of the local server, absent in older Kea versions.
    pub local_name: Option<String>,
    pub local_state: HaState,
    /// The local server's view of its partner.
    pub remote_state: HaState,
}

/// Outcome of `status-get` per daemon; `None` when the daemon was unreachable.
pub type StatusReports = HashMap<DaemonId, Option<Vec<ServerStatus>>>;

fn state_at(value: &Value, key: &str) -> HaState {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(HaState::parse_lenient)
        .unwrap_or_default()
}

fn server_status(servers: &Value) -> ServerStatus {
    let local = servers.get("local").unwrap_or(&Value::Null);
    let remote = servers.get("remote").unwrap_or(&Value::Null);
    ServerStatus {
        local_name: local
            .get("server-name")
            .and_then(Value::as_str)
            .map(str::to_owned),
        local_state: state_at(local, "state"),
        remote_state: state_at(remote, "last-state"),
    }
}

/// Parse the HA part of a `status-get` response.
///
/// Recent Kea versions report a `high-availability` list with one entry
/// per relationship; older ones a single `ha-servers` object.
pub fn parse_status(arguments: &Value) -> Vec<ServerStatus> {
    if let Some(Value::Array(entries)) = arguments.get("high-availability") {
        return entries
            .iter()
            .filter_map(|entry| entry.get("ha-servers"))
            .map(server_status)
            .collect();
    }
    arguments
        .get("ha-servers")
        .map(server_status)
        .into_iter()
        .collect()
}

fn peer_name<'a>(ha: &'a HaService, roles: &[&str]) -> Option<&'a str> {
    ha.peers
        .iter()
        .find(|p| roles.contains(&p.role.as_str()))
        .map(|p| p.name.as_str())
}

/// The report a server gave about the relationship `ha` describes.
fn relationship_status<'a>(
    ha: &HaService,
    statuses: &'a [ServerStatus],
    roles: &[&str],
) -> Option<&'a ServerStatus> {
    let name = peer_name(ha, roles);
    statuses
        .iter()
        .find(|s| s.local_name.is_some() && s.local_name.as_deref() == name)
        .or_else(|| statuses.iter().find(|s| s.local_name.is_none()))
        .or_else(|| statuses.first().filter(|_| statuses.len() == 1))
}

enum Observation {
    Reachable { local: HaState, remote: HaState },
    Unreachable,
    NotPolled,
}

fn observe(ha: &HaService, id: Option<DaemonId>, reports: &StatusReports, roles: &[&str]) -> Observation {
    let Some(report) = id.and_then(|id| reports.get(&id)) else {
        return Observation::NotPolled;
    };
    match report {
        None => Observation::Unreachable,
        Some(statuses) => match relationship_status(ha, statuses, roles) {
            Some(status) => Observation::Reachable {
                local: status.local_state,
                remote: status.remote_state,
            },
            None => Observation::Reachable {
                local: HaState::Unknown,
                remote: HaState::Unknown,
            },
        },
    }
}

/// Store the polled states in every HA service.
pub fn apply_status(tables: &mut Tables, reports: &StatusReports, now: DateTime<Utc>) {
    let ids: Vec<ServiceId> = tables
        .services
        .values()
        .filter(|s| s.ha.is_some())
        .map(|s| s.id)
        .collect();
    for id in ids {
        let Some(ha) = tables.services.get(&id).and_then(|s| s.ha.as_ref()) else {
            continue;
        };
        let primary = observe(ha, ha.primary_id, reports, &["primary"]);
        let secondary = observe(ha, ha.secondary_id, reports, &["secondary", "standby"]);
        if matches!(primary, Observation::NotPolled) && matches!(secondary, Observation::NotPolled) {
            continue;
        }

        let mut next = ha.clone();
        match (&primary, &secondary) {
            (Observation::Reachable { local, .. }, _) => {
                next.primary_last_state = *local;
                next.primary_reachable = true;
            }
            (Observation::Unreachable, Observation::Reachable { remote, .. }) => {
                next.primary_last_state = *remote;
                next.primary_reachable = false;
            }
            (Observation::Unreachable, _) => {
                next.primary_last_state = HaState::Unknown;
                next.primary_reachable = false;
            }
            (Observation::NotPolled, _) => {}
        }
        match (&secondary, &primary) {
            (Observation::Reachable { local, .. }, _) => {
                next.secondary_last_state = *local;
                next.secondary_reachable = true;
            }
            (Observation::Unreachable, Observation::Reachable { remote, .. }) => {
                next.secondary_last_state = *remote;
                next.secondary_reachable = false;
            }
            (Observation::Unreachable, _) => {
                next.secondary_last_state = HaState::Unknown;
                next.secondary_reachable = false;
            }
            (Observation::NotPolled, _) => {}
        }
        next.status_collected_at = Some(now);

        if let Some(service) = tables.services.get_mut(&id) {
            service.ha = Some(next);
        }
    }
}

pub struct HaStatusPuller {
    inventory: Arc<Inventory>,
    agents: Arc<dyn ConnectedAgents>,
    config: PullerConfig,
}

impl HaStatusPuller {
    pub fn new(
        inventory: Arc<Inventory>,
        agents: Arc<dyn ConnectedAgents>,
        config: PullerConfig,
    ) -> Self {
        Self {
            inventory,
            agents,
            config,
        }
    }

    /// Issue `status-get` to one daemon.
    pub async fn query_daemon(
        &self,
        daemon_id: DaemonId,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerStatus>> {
        let snapshot = self.inventory.snapshot();
        let daemon = snapshot.daemon(daemon_id)?;
        let app = snapshot.app_of(daemon_id)?;
        let service = daemon.name.kea_service().ok_or_else(|| CoreError::Config {
            message: format!("daemon {} is not a Kea daemon", daemon.name),
        })?;
        let access_point = app.control_access_point().ok_or_else(|| CoreError::Config {
            message: format!("app {} has no control access point", app.name),
        })?;
        let label = format!("{}@{}", daemon.name, app.name);

        let command = KeaCommand::new(STATUS_GET).for_service(service);
        let response = send_command(
            self.agents.as_ref(),
            access_point,
            &command,
            self.config.command_timeout,
            cancel,
        )
        .await?;
        let response = check_response(response, STATUS_GET, &label)?;
        Ok(response
            .arguments
            .as_ref()
            .map(parse_status)
            .unwrap_or_default())
    }
}

#[async_trait]
impl PullTask for HaStatusPuller {
    fn name(&self) -> &'static str {
        "kea_status"
    }

    fn interval_setting(&self) -> &'static str {
        KEA_STATUS_PULLER_INTERVAL
    }

    async fn pull(&self, cancel: &CancellationToken) -> Result<PassCounters> {
        let mut daemons: Vec<DaemonId> = self
            .inventory
            .snapshot()
            .services
            .values()
            .filter_map(|s| s.ha.as_ref())
            .flat_map(|ha| [ha.primary_id, ha.secondary_id])
            .flatten()
            .collect();
        daemons.sort_unstable();
        daemons.dedup();

        let reports: DashMap<DaemonId, Option<Vec<ServerStatus>>> = DashMap::new();
        let counters = for_each_daemon(self.name(), daemons, self.config.fan_out, |id| {
            let reports = &reports;
            async move {
                match self.query_daemon(id, cancel).await {
                    Ok(statuses) => {
                        reports.insert(id, Some(statuses));
                        Ok(Outcome::Success)
                    }
                    Err(CoreError::Cancelled) => Err(CoreError::Cancelled),
                    Err(e) => {
                        reports.insert(id, None);
                        Err(e)
                    }
                }
            }
        })
        .await;
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let reports: StatusReports = reports.into_iter().collect();
        let mut tx = self.inventory.begin().await;
        apply_status(&mut tx, &reports, Utc::now());
        let writes = tx.commit();
        debug!(puller = self.name(), updates = writes.updates, "HA status stored");
        Ok(counters)
    }
}
