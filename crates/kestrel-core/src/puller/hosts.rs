// ── Host reservation puller ──
//
// Mirrors reservations returned by `reservation-get-page` into the
// inventory as `api` local hosts. A cycle whose pages hash the same as
// the previous cycle's writes nothing. Otherwise, once every page is in,
// the daemon's api local hosts are dropped and the pages are replayed in
// one transaction. No transaction is open while pages are fetched.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use kestrel_agent::ConnectedAgents;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pager::{PageTarget, ReservationPager, TraceEntry};
use super::{DaemonLocks, Outcome, PassCounters, PullTask, for_each_daemon};
use crate::config::PullerConfig;
use crate::error::{CoreError, Result};
use crate::keaconfig::Reservation;
use crate::model::setting::KEA_HOSTS_PULLER_INTERVAL;
use crate::model::{AppType, DaemonId, DataSource, Host, HostId, SubnetId};
use crate::review::{ReviewDispatcher, ReviewTrigger};
use crate::store::{Inventory, Tables, Transaction};

pub const HOST_CMDS_HOOK: &str = "host_cmds";

pub struct HostPuller {
    inventory: Arc<Inventory>,
    agents: Arc<dyn ConnectedAgents>,
    reviews: Arc<dyn ReviewDispatcher>,
    locks: DaemonLocks,
    config: PullerConfig,
    traces: DashMap<DaemonId, Vec<TraceEntry>>,
    /// Daemons that rejected `reservation-get-page`, with the digest of
    /// the configuration they had at the time.
    unsupported: DashMap<DaemonId, String>,
}

impl HostPuller {
    pub fn new(
        inventory: Arc<Inventory>,
        agents: Arc<dyn ConnectedAgents>,
        reviews: Arc<dyn ReviewDispatcher>,
        locks: DaemonLocks,
        config: PullerConfig,
    ) -> Self {
        Self {
            inventory,
            agents,
            reviews,
            locks,
            config,
            traces: DashMap::new(),
            unsupported: DashMap::new(),
        }
    }

    /// Previous trace of a daemon, if one was stored.
    pub fn trace(&self, daemon_id: DaemonId) -> Option<Vec<TraceEntry>> {
        self.traces.get(&daemon_id).map(|t| t.value().clone())
    }

    pub fn is_unsupported(&self, daemon_id: DaemonId) -> bool {
        self.unsupported.contains_key(&daemon_id)
    }

    /// One host-pull cycle for a daemon.
    pub async fn pull_daemon(
        &self,
        daemon_id: DaemonId,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let _lock = self.locks.lock(daemon_id).await;
        let snapshot = self.inventory.snapshot();
        let daemon = snapshot.daemon(daemon_id)?;

        let Some(config) = daemon.kea_config().filter(|_| daemon.active) else {
            return Ok(Outcome::Skip);
        };
        if !config.has_hook_library(HOST_CMDS_HOOK) {
            return Ok(Outcome::Skip);
        }
        if let Some(digest) = self.unsupported.get(&daemon_id) {
            if digest.value() == config.digest() {
                return Ok(Outcome::Skip);
            }
        }
        let Some(service) = daemon.name.kea_service() else {
            return Ok(Outcome::Skip);
        };
        let app = snapshot.app_of(daemon_id)?;
        let access_point = app.control_access_point().ok_or_else(|| CoreError::Config {
            message: format!("app {} has no control access point", app.name),
        })?;
        let option_space = config.root().option_space();

        let mut targets = vec![PageTarget::global()];
        targets.extend(snapshot.local_subnets_of(daemon_id).map(|ls| PageTarget {
            subnet_id: Some(ls.subnet_id),
            local_id: ls.local_id,
        }));

        let daemon_label = format!("{}@{}", daemon.name, app.name);
        let mut pager = ReservationPager::new(
            self.agents.as_ref(),
            access_point,
            service,
            daemon_label.clone(),
            targets,
            self.config.page_limit,
            self.config.command_timeout,
            cancel,
        );
        loop {
            match pager.next_page().await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(CoreError::UnsupportedCommand { command, .. }) => {
                    info!(daemon = %daemon_label, %command, "daemon does not support host commands");
                    self.unsupported
                        .insert(daemon_id, config.digest().to_owned());
                    return Ok(Outcome::Skip);
                }
                Err(e) => return Err(e),
            }
        }

        let trace: Vec<TraceEntry> = pager.trace().iter().map(TraceEntry::from).collect();
        let changed_at = match self.trace(daemon_id) {
            Some(previous) => first_difference(&previous, &trace),
            None => Some(0),
        };
        if let Some(position) = changed_at {
            debug!(daemon = %daemon_label, page = position, "reservations changed, replaying pages");
            let mut tx = self.replay(daemon_id, &pager, option_space).await;
            tx.hosts.retain(|_, h| !h.is_orphan());
            let writes = tx.commit();
            debug!(
                daemon = %daemon_label,
                inserts = writes.inserts,
                updates = writes.updates,
                deletes = writes.deletes,
                "host reconciliation committed"
            );
            self.reviews
                .begin_review(daemon_id, ReviewTrigger::HostsPulled);
        } else if self.inventory.snapshot().hosts.values().any(Host::is_orphan) {
            let mut tx = self.inventory.begin().await;
            tx.hosts.retain(|_, h| !h.is_orphan());
            tx.commit();
        }

        self.traces.insert(daemon_id, trace);
        Ok(Outcome::Success)
    }

    /// Open a transaction, drop the daemon's api hosts and replay every
    /// fetched page.
    async fn replay(
        &self,
        daemon_id: DaemonId,
        pager: &ReservationPager<'_>,
        option_space: &str,
    ) -> Transaction<'_> {
        let mut tx = self.inventory.begin().await;
        remove_api_hosts(&mut tx, daemon_id);
        for page in pager.trace() {
            let subnet = subnet_of(pager.targets(), page.subnet_index);
            apply_page(&mut tx, daemon_id, subnet, &page.hosts, option_space);
        }
        tx
    }
}

/// Index of the first page whose digest differs, or the length of the
/// shorter trace when one is a prefix of the other.
fn first_difference(previous: &[TraceEntry], current: &[TraceEntry]) -> Option<usize> {
    previous
        .iter()
        .zip(current)
        .position(|(a, b)| a != b)
        .or_else(|| (previous.len() != current.len()).then_some(previous.len().min(current.len())))
}

fn subnet_of(targets: &[PageTarget], index: usize) -> Option<SubnetId> {
    targets.get(index).and_then(|t| t.subnet_id)
}

fn remove_api_hosts(tables: &mut Tables, daemon_id: DaemonId) {
    let ids: Vec<HostId> = tables
        .hosts
        .values()
        .filter(|h| h.local_host(daemon_id, DataSource::Api).is_some())
        .map(|h| h.id)
        .collect();
    for id in ids {
        if let Some(host) = tables.hosts.get_mut(&id) {
            host.remove_local_hosts(daemon_id, DataSource::Api);
        }
    }
}

/// Merge one page of reservations into the tables.
pub fn apply_page(
    tables: &mut Tables,
    daemon_id: DaemonId,
    subnet_id: Option<SubnetId>,
    hosts: &[Value],
    option_space: &str,
) {
    for value in hosts {
        match Reservation::from_value(value, option_space) {
            Ok(reservation) => {
                merge_reservation(tables, daemon_id, subnet_id, &reservation, DataSource::Api);
            }
            Err(e) => {
                warn!(daemon_id = %daemon_id, error = %e, "skipping malformed reservation");
            }
        }
    }
}

/// Attach a reservation to the host it joins, or to a new host.
pub fn merge_reservation(
    tables: &mut Tables,
    daemon_id: DaemonId,
    subnet_id: Option<SubnetId>,
    reservation: &Reservation,
    source: DataSource,
) {
    let seq = tables.next_host_seq();
    let local = reservation.local_host(daemon_id, source);
    let mut candidate = Host {
        id: HostId(0),
        subnet_id,
        identifiers: reservation.identifiers.clone(),
        reservations: reservation.ip_reservations(),
        local_hosts: Vec::new(),
    };

    let existing = tables
        .hosts_in(subnet_id)
        .find(|h| h.joins(&candidate))
        .map(|h| h.id);
    match existing {
        Some(id) => {
            let changed = tables.hosts.get(&id).is_some_and(|h| {
                h.local_host(daemon_id, source)
                    .is_none_or(|current| !current.same_content(&local))
            });
            if changed {
                if let Some(host) = tables.hosts.get_mut(&id) {
                    host.upsert_local_host(local, seq);
                }
            }
        }
        None => {
            candidate.id = HostId(tables.next_id());
            candidate.upsert_local_host(local, seq);
            tables.hosts.insert(candidate.id, candidate);
        }
    }
}

#[async_trait]
impl PullTask for HostPuller {
    fn name(&self) -> &'static str {
        "kea_hosts"
    }

    fn interval_setting(&self) -> &'static str {
        KEA_HOSTS_PULLER_INTERVAL
    }

    async fn pull(&self, cancel: &CancellationToken) -> Result<PassCounters> {
        let daemons: Vec<DaemonId> = self
            .inventory
            .snapshot()
            .daemons_of_kind(AppType::Kea)
            .filter(|d| d.name.is_dhcp())
            .map(|d| d.id)
            .collect();
        Ok(for_each_daemon(self.name(), daemons, self.config.fan_out, |id| {
            self.pull_daemon(id, cancel)
        })
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(byte: u8) -> TraceEntry {
        TraceEntry {
            hash: [byte; 32],
            subnet_index: 0,
        }
    }

    #[test]
    fn first_difference_finds_changed_and_extra_pages() {
        let a = [entry(1), entry(2)];
        assert_eq!(first_difference(&a, &a), None);
        assert_eq!(first_difference(&a, &[entry(1), entry(3)]), Some(1));
        assert_eq!(first_difference(&a, &[entry(1)]), Some(1));
        assert_eq!(first_difference(&[], &a), Some(0));
    }
}
