// ── Utilisation aggregation ──
//
// Sums local subnet statistics into subnets, shared networks and global
// totals. Daemons in the exclusion set do not contribute, which keeps HA
// replicas from being counted twice. Reservations outside every pool add
// to the totals because Kea does not count them.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

use crate::keaconfig::pools::parse_prefix;
use crate::model::stats::global;
use crate::model::{DaemonId, Family, SharedNetworkId, StatsMap, SubnetId};
use crate::store::Tables;

/// Extra totals contributed by out-of-pool reservations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutOfPool {
    pub addresses: BigUint,
    pub prefixes: BigUint,
}

pub type Corrections = BTreeMap<SubnetId, OutOfPool>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub stats: StatsMap,
    pub address_utilization: f64,
    pub pd_utilization: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtilizationReport {
    pub subnets: BTreeMap<SubnetId, Aggregate>,
    pub shared_networks: BTreeMap<SharedNetworkId, Aggregate>,
    pub global: StatsMap,
}

/// Names of the total, assigned and prefix counters of a family.
struct Counters {
    total: &'static str,
    assigned: &'static str,
    total_pd: Option<&'static str>,
    assigned_pd: Option<&'static str>,
}

fn counters(family: Family) -> Counters {
    match family {
        Family::V4 => Counters {
            total: global::TOTAL_ADDRESSES,
            assigned: global::ASSIGNED_ADDRESSES,
            total_pd: None,
            assigned_pd: None,
        },
        Family::V6 => Counters {
            total: global::TOTAL_NAS,
            assigned: global::ASSIGNED_NAS,
            total_pd: Some(global::TOTAL_PDS),
            assigned_pd: Some(global::ASSIGNED_PDS),
        },
    }
}

const GLOBAL_NAMES: &[&str] = &[
    global::TOTAL_ADDRESSES,
    global::ASSIGNED_ADDRESSES,
    global::DECLINED_ADDRESSES,
    global::TOTAL_NAS,
    global::ASSIGNED_NAS,
    global::DECLINED_NAS,
    global::TOTAL_PDS,
    global::ASSIGNED_PDS,
];

/// `numerator / denominator`, zero when the denominator is zero.
pub fn ratio(numerator: Option<&BigUint>, denominator: Option<&BigUint>) -> f64 {
    match (numerator, denominator) {
        (Some(n), Some(d)) if !d.is_zero() => {
            let n = n.to_f64().unwrap_or(f64::MAX);
            let d = d.to_f64().unwrap_or(f64::MAX);
            n / d
        }
        _ => 0.0,
    }
}

fn add_stats(into: &mut StatsMap, from: &StatsMap) {
    for (name, value) in from {
        *into.entry(name.clone()).or_default() += value;
    }
}

fn finish(stats: StatsMap, family: Family) -> Aggregate {
    let names = counters(family);
    let pd_utilization = match (names.assigned_pd, names.total_pd) {
        (Some(assigned), Some(total)) => ratio(stats.get(assigned), stats.get(total)),
        _ => 0.0,
    };
    Aggregate {
        address_utilization: ratio(stats.get(names.assigned), stats.get(names.total)),
        pd_utilization,
        stats,
    }
}

/// Daemons whose statistics are suppressed by HA deduplication.
pub fn ha_exclusions(tables: &Tables) -> BTreeSet<DaemonId> {
    let mut excluded = BTreeSet::new();
    for ha in tables.services.values().filter_map(|s| s.ha.as_ref()) {
        let chosen = ha.authoritative_daemon();
        excluded.extend(ha.backup_ids.iter().copied());
        for id in [ha.primary_id, ha.secondary_id].into_iter().flatten() {
            if Some(id) != chosen {
                excluded.insert(id);
            }
        }
    }
    excluded
}

/// Reservations of each subnet that fall outside all of its pools.
pub fn out_of_pool_corrections(tables: &Tables) -> Corrections {
    let mut corrections = Corrections::new();
    for host in tables.hosts.values() {
        let Some(subnet_id) = host.subnet_id else {
            continue;
        };
        let locals: Vec<_> = tables.local_subnets_in(subnet_id).collect();
        for reservation in &host.reservations {
            if reservation.is_prefix() {
                let Some((addr, len)) = parse_prefix(&reservation.address) else {
                    continue;
                };
                let inside = locals
                    .iter()
                    .flat_map(|ls| &ls.pd_pools)
                    .any(|pool| pool.contains(addr, len));
                if !inside {
                    corrections.entry(subnet_id).or_default().prefixes += 1u32;
                }
            } else {
                let Ok(addr) = reservation.address.parse::<IpAddr>() else {
                    continue;
                };
                let inside = locals
                    .iter()
                    .flat_map(|ls| &ls.pools)
                    .any(|pool| pool.contains(addr));
                if !inside {
                    corrections.entry(subnet_id).or_default().addresses += 1u32;
                }
            }
        }
    }
    corrections
}

fn correct(stats: &mut StatsMap, family: Family, correction: &OutOfPool) {
    let names = counters(family);
    if !correction.addresses.is_zero() {
        *stats.entry(names.total.to_owned()).or_default() += &correction.addresses;
    }
    if let Some(total_pd) = names.total_pd {
        if !correction.prefixes.is_zero() {
            *stats.entry(total_pd.to_owned()).or_default() += &correction.prefixes;
        }
    }
}

/// Aggregate statistics without touching the tables.
pub fn aggregate(
    tables: &Tables,
    excluded: &BTreeSet<DaemonId>,
    corrections: &Corrections,
) -> UtilizationReport {
    let mut report = UtilizationReport::default();
    let mut network_stats: BTreeMap<SharedNetworkId, StatsMap> = BTreeMap::new();

    for subnet in tables.subnets.values() {
        let mut stats = StatsMap::new();
        for local in tables.local_subnets_in(subnet.id) {
            if !excluded.contains(&local.daemon_id) {
                add_stats(&mut stats, &local.stats);
            }
        }
        if let Some(correction) = corrections.get(&subnet.id) {
            correct(&mut stats, subnet.family, correction);
        }

        if let Some(network) = subnet.shared_network_id {
            add_stats(network_stats.entry(network).or_default(), &stats);
        }
        for name in GLOBAL_NAMES {
            if let Some(value) = stats.get(*name) {
                *report.global.entry((*name).to_owned()).or_default() += value;
            }
        }
        report.subnets.insert(subnet.id, finish(stats, subnet.family));
    }

    for (id, stats) in network_stats {
        let family = tables
            .shared_networks
            .get(&id)
            .map_or(Family::V4, |n| n.family);
        report.shared_networks.insert(id, finish(stats, family));
    }
    report
}

impl Aggregate {
    fn matches(&self, stats: &StatsMap, address: f64, pd: f64) -> bool {
        self.stats == *stats
            && self.address_utilization.to_bits() == address.to_bits()
            && self.pd_utilization.to_bits() == pd.to_bits()
    }
}

/// Store a report in the tables. Rows whose values already match the
/// report are left alone.
pub fn apply(tables: &mut Tables, report: UtilizationReport, now: DateTime<Utc>) {
    for (id, aggregate) in report.subnets {
        let unchanged = tables.subnets.get(&id).is_none_or(|s| {
            aggregate.matches(&s.stats, s.address_utilization, s.pd_utilization)
        });
        if unchanged {
            continue;
        }
        if let Some(subnet) = tables.subnets.get_mut(&id) {
            subnet.stats = aggregate.stats;
            subnet.address_utilization = aggregate.address_utilization;
            subnet.pd_utilization = aggregate.pd_utilization;
            subnet.stats_collected_at = Some(now);
        }
    }
    for (id, aggregate) in report.shared_networks {
        let unchanged = tables.shared_networks.get(&id).is_none_or(|n| {
            aggregate.matches(&n.stats, n.address_utilization, n.pd_utilization)
        });
        if unchanged {
            continue;
        }
        if let Some(network) = tables.shared_networks.get_mut(&id) {
            network.stats = aggregate.stats;
            network.address_utilization = aggregate.address_utilization;
            network.pd_utilization = aggregate.pd_utilization;
        }
    }
    for (name, value) in report.global {
        if tables.statistics.get(&name) != Some(&value) {
            tables.statistics.insert(name, value);
        }
    }
}
