use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::ids::{DaemonId, SharedNetworkId, SubnetId};
use crate::keaconfig::{AddressPool, PrefixPool};

/// Statistic name to value. Values can exceed 64 bits.
pub type StatsMap = BTreeMap<String, BigUint>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum Family {
    #[strum(serialize = "4")]
    V4,
    #[strum(serialize = "6")]
    V6,
}

impl Family {
    /// Family of a CIDR prefix or address literal.
    pub fn of_prefix(prefix: &str) -> Self {
        if prefix.contains(':') { Self::V6 } else { Self::V4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub prefix: String,
    pub family: Family,
    pub shared_network_id: Option<SharedNetworkId>,
    pub stats: StatsMap,
    pub address_utilization: f64,
    pub pd_utilization: f64,
    pub stats_collected_at: Option<DateTime<Utc>>,
}

impl Subnet {
    pub fn new(id: SubnetId, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            id,
            family: Family::of_prefix(&prefix),
            prefix,
            shared_network_id: None,
            stats: StatsMap::new(),
            address_utilization: 0.0,
            pd_utilization: 0.0,
            stats_collected_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedNetwork {
    pub id: SharedNetworkId,
    pub name: String,
    pub family: Family,
    pub stats: StatsMap,
    pub address_utilization: f64,
    pub pd_utilization: f64,
}

/// A subnet as seen by one daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSubnet {
    pub subnet_id: SubnetId,
    pub daemon_id: DaemonId,
    /// Kea `subnet-id` within the daemon.
    pub local_id: i64,
    pub pools: Vec<AddressPool>,
    pub pd_pools: Vec<PrefixPool>,
    pub stats: StatsMap,
    pub stats_collected_at: Option<DateTime<Utc>>,
}

impl LocalSubnet {
    pub fn new(subnet_id: SubnetId, daemon_id: DaemonId, local_id: i64) -> Self {
        Self {
            subnet_id,
            daemon_id,
            local_id,
            pools: Vec::new(),
            pd_pools: Vec::new(),
            stats: StatsMap::new(),
            stats_collected_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_derived_from_prefix() {
        assert_eq!(Subnet::new(SubnetId(1), "192.0.2.0/24").family, Family::V4);
        assert_eq!(Subnet::new(SubnetId(2), "2001:db8::/64").family, Family::V6);
        assert_eq!(Family::V6.to_string(), "6");
    }
}
