// ── Host reservations ──
//
// A Host is the logical reservation shared across daemons; each daemon that
// reports it contributes a LocalHost carrying the daemon-specific details.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{DaemonId, HostId, SubnetId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostIdentifier {
    /// Kea identifier type (`hw-address`, `duid`, `circuit-id`, `client-id`, `flex-id`).
    pub kind: String,
    /// Lower-case hex digits separated by colons.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IpReservation {
    /// Address, or `prefix/len` for delegated prefixes.
    pub address: String,
}

impl IpReservation {
    pub fn is_prefix(&self) -> bool {
        self.address.contains('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpOption {
    pub code: Option<u16>,
    pub name: Option<String>,
    pub space: String,
    pub data: String,
    #[serde(default)]
    pub always_send: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataSource {
    /// Declared in the daemon configuration file.
    Config,
    /// Stored in a host backend, fetched with `reservation-get-page`.
    Api,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalHost {
    pub daemon_id: DaemonId,
    pub data_source: DataSource,
    pub hostname: Option<String>,
    pub client_classes: Vec<String>,
    pub options: Vec<DhcpOption>,
    pub next_server: Option<String>,
    pub server_hostname: Option<String>,
    pub boot_file_name: Option<String>,
    pub update_seq: u64,
}

impl LocalHost {
    pub fn new(daemon_id: DaemonId, data_source: DataSource) -> Self {
        Self {
            daemon_id,
            data_source,
            hostname: None,
            client_classes: Vec::new(),
            options: Vec::new(),
            next_server: None,
            server_hostname: None,
            boot_file_name: None,
            update_seq: 0,
        }
    }

    /// Equality ignoring the update sequence.
    pub fn same_content(&self, other: &Self) -> bool {
        self.daemon_id == other.daemon_id
            && self.data_source == other.data_source
            && self.hostname == other.hostname
            && self.client_classes == other.client_classes
            && self.options == other.options
            && self.next_server == other.next_server
            && self.server_hostname == other.server_hostname
            && self.boot_file_name == other.boot_file_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    /// `None` for global reservations.
    pub subnet_id: Option<SubnetId>,
    pub identifiers: Vec<HostIdentifier>,
    pub reservations: Vec<IpReservation>,
    pub local_hosts: Vec<LocalHost>,
}

impl Host {
    /// Two hosts join iff their identifier sets and reservation sets match.
    pub fn joins(&self, other: &Host) -> bool {
        let ids = |h: &Host| h.identifiers.iter().cloned().collect::<BTreeSet<_>>();
        let res = |h: &Host| h.reservations.iter().cloned().collect::<BTreeSet<_>>();
        ids(self) == ids(other) && res(self) == res(other)
    }

    pub fn local_host(&self, daemon_id: DaemonId, source: DataSource) -> Option<&LocalHost> {
        self.local_hosts
            .iter()
            .find(|lh| lh.daemon_id == daemon_id && lh.data_source == source)
    }

    /// Insert or replace the local host for `(daemon, source)`.
    ///
    /// Returns `true` when anything changed. A replaced entry gets the next
    /// update sequence.
    pub fn upsert_local_host(&mut self, mut local: LocalHost, seq: u64) -> bool {
        match self
            .local_hosts
            .iter_mut()
            .find(|lh| lh.daemon_id == local.daemon_id && lh.data_source == local.data_source)
        {
            Some(existing) if existing.same_content(&local) => false,
            Some(existing) => {
                local.update_seq = seq;
                *existing = local;
                true
            }
            None => {
                local.update_seq = seq;
                self.local_hosts.push(local);
                true
            }
        }
    }

    /// Remove local hosts of `daemon_id` from `source`. Returns how many were removed.
    pub fn remove_local_hosts(&mut self, daemon_id: DaemonId, source: DataSource) -> usize {
        let before = self.local_hosts.len();
        self.local_hosts
            .retain(|lh| !(lh.daemon_id == daemon_id && lh.data_source == source));
        before - self.local_hosts.len()
    }

    pub fn is_orphan(&self) -> bool {
        self.local_hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(ids: &[(&str, &str)], addrs: &[&str]) -> Host {
        Host {
            id: HostId(0),
            subnet_id: Some(SubnetId(1)),
            identifiers: ids
                .iter()
                .map(|(k, v)| HostIdentifier {
                    kind: (*k).into(),
                    value: (*v).into(),
                })
                .collect(),
            reservations: addrs
                .iter()
                .map(|a| IpReservation {
                    address: (*a).into(),
                })
                .collect(),
            local_hosts: Vec::new(),
        }
    }

    #[test]
    fn join_is_order_insensitive() {
        let a = host(&[("hw-address", "01:02"), ("duid", "aa")], &["192.0.2.5", "192.0.2.6"]);
        let b = host(&[("duid", "aa"), ("hw-address", "01:02")], &["192.0.2.6", "192.0.2.5"]);
        assert!(a.joins(&b));
    }

    #[test]
    fn join_requires_equal_reservations() {
        let a = host(&[("hw-address", "01:02")], &["192.0.2.5"]);
        let b = host(&[("hw-address", "01:02")], &["192.0.2.6"]);
        assert!(!a.joins(&b));
    }

    #[test]
    fn upsert_bumps_sequence_only_on_change() {
        let mut h = host(&[("hw-address", "01:02")], &[]);
        let lh = LocalHost::new(DaemonId(1), DataSource::Api);
        assert!(h.upsert_local_host(lh.clone(), 1));
        assert!(!h.upsert_local_host(lh.clone(), 2));
        assert_eq!(h.local_hosts[0].update_seq, 1);

        let mut changed = lh;
        changed.hostname = Some("foo".into());
        assert!(h.upsert_local_host(changed, 3));
        assert_eq!(h.local_hosts[0].update_seq, 3);
        assert_eq!(h.remove_local_hosts(DaemonId(1), DataSource::Api), 1);
        assert!(h.is_orphan());
    }
}
