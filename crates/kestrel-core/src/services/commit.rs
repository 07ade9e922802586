// ── Daemon configuration commit ──
//
// Storing a new Kea configuration also refreshes everything derived from
// it: subnets, shared networks, the daemon's local subnets, configured
// host reservations and HA service membership. All of it lands in one
// transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::detector::detect_services;
use crate::error::{CoreError, Result};
use crate::keaconfig::KeaConfig;
use crate::model::{
    AppType, DaemonConfig, DaemonId, DataSource, Family, HostId, LocalSubnet, ServiceId,
    SharedNetwork, SharedNetworkId, Subnet, SubnetId,
};
use crate::puller::hosts::merge_reservation;
use crate::review::{ReviewDispatcher, ReviewTrigger};
use crate::store::{Inventory, Tables, WriteCounts};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// The stored configuration already had the same digest.
    pub unchanged: bool,
    pub local_subnets: usize,
    pub services: Vec<ServiceId>,
    pub writes: WriteCounts,
}

/// Store a Kea configuration for a daemon and derive its networks.
pub async fn commit_daemon_config(
    inventory: &Inventory,
    daemon_id: DaemonId,
    config: KeaConfig,
    reviews: &dyn ReviewDispatcher,
) -> Result<CommitSummary> {
    let mut tx = inventory.begin().await;
    let daemon = tx.daemon(daemon_id)?;
    if tx.app_of(daemon_id)?.kind != AppType::Kea {
        return Err(CoreError::Config {
            message: format!("daemon {daemon_id} does not belong to a Kea app"),
        });
    }
    if daemon.kea_config().is_some_and(|c| c.digest() == config.digest()) {
        debug!(daemon_id = %daemon_id, "configuration unchanged");
        return Ok(CommitSummary {
            unchanged: true,
            ..CommitSummary::default()
        });
    }

    let family = daemon.name.family();
    let config = Arc::new(config);
    if let Some(daemon) = tx.daemons.get_mut(&daemon_id) {
        daemon.config = Some(DaemonConfig::Kea(Arc::clone(&config)));
    }

    let local_subnets = match family {
        Some(family) => {
            let count = detect_networks(&mut tx, daemon_id, family, &config);
            store_config_hosts(&mut tx, daemon_id, &config);
            count
        }
        None => 0,
    };
    let services = detect_services(&mut tx, daemon_id, &config.ha_relationships())?;

    let writes = tx.commit();
    info!(
        daemon_id = %daemon_id,
        local_subnets,
        services = services.len(),
        "daemon configuration committed"
    );
    reviews.begin_review(daemon_id, ReviewTrigger::ConfigCommitted);
    Ok(CommitSummary {
        unchanged: false,
        local_subnets,
        services,
        writes,
    })
}

fn shared_network_id(tables: &mut Tables, name: &str, family: Family) -> SharedNetworkId {
    if let Some(network) = tables.shared_network_by_name(name, family) {
        return network.id;
    }
    let id = SharedNetworkId(tables.next_id());
    tables.shared_networks.insert(
        id,
        SharedNetwork {
            id,
            name: name.to_owned(),
            family,
            stats: Default::default(),
            address_utilization: 0.0,
            pd_utilization: 0.0,
        },
    );
    id
}

/// Upsert the subnets of a configuration and the daemon's local subnets.
///
/// Returns the number of local subnets the daemon has afterwards.
pub fn detect_networks(
    tables: &mut Tables,
    daemon_id: DaemonId,
    family: Family,
    config: &KeaConfig,
) -> usize {
    let mut seen: BTreeSet<SubnetId> = BTreeSet::new();
    for kea_subnet in config.subnets() {
        let network = kea_subnet
            .shared_network
            .as_deref()
            .map(|name| shared_network_id(tables, name, family));

        let subnet_id = match tables.subnet_by_prefix(&kea_subnet.prefix).map(|s| s.id) {
            Some(id) => id,
            None => {
                let id = SubnetId(tables.next_id());
                tables.subnets.insert(id, Subnet::new(id, kea_subnet.prefix.clone()));
                id
            }
        };
        if network.is_some()
            && tables
                .subnets
                .get(&subnet_id)
                .is_some_and(|s| s.shared_network_id != network)
        {
            if let Some(subnet) = tables.subnets.get_mut(&subnet_id) {
                subnet.shared_network_id = network;
            }
        }

        let key = (subnet_id, daemon_id);
        let mut local = tables
            .local_subnets
            .get(&key)
            .cloned()
            .unwrap_or_else(|| LocalSubnet::new(subnet_id, daemon_id, kea_subnet.id));
        let fresh = !tables.local_subnets.contains(&key);
        let before = local.clone();
        local.local_id = kea_subnet.id;
        local.pools = kea_subnet.pools;
        local.pd_pools = kea_subnet.pd_pools;
        if fresh || local != before {
            tables.local_subnets.insert(key, local);
        }
        seen.insert(subnet_id);
    }

    let dropped = tables
        .local_subnets
        .retain(|(subnet, daemon), _| *daemon != daemon_id || seen.contains(subnet));
    if dropped > 0 {
        debug!(daemon_id = %daemon_id, dropped, "removed vanished local subnets");
    }
    seen.len()
}

/// Replace the daemon's configured reservations.
fn store_config_hosts(tables: &mut Tables, daemon_id: DaemonId, config: &KeaConfig) {
    let ids: Vec<HostId> = tables
        .hosts
        .values()
        .filter(|h| h.local_host(daemon_id, DataSource::Config).is_some())
        .map(|h| h.id)
        .collect();
    for id in ids {
        if let Some(host) = tables.hosts.get_mut(&id) {
            host.remove_local_hosts(daemon_id, DataSource::Config);
        }
    }

    for reservation in config.reservations() {
        merge_reservation(tables, daemon_id, None, &reservation, DataSource::Config);
    }
    for kea_subnet in config.subnets() {
        let subnet_id = tables.subnet_by_prefix(&kea_subnet.prefix).map(|s| s.id);
        for reservation in &kea_subnet.reservations {
            merge_reservation(tables, daemon_id, subnet_id, reservation, DataSource::Config);
        }
    }
    tables.hosts.retain(|_, h| !h.is_orphan());
}
