#![allow(clippy::unwrap_used)]
// Lease statistics, response rates and HA deduplication.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{TimeDelta, TimeZone, Utc};
use kestrel_agent::ConnectedAgents;
use num_bigint::BigUint;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use common::{FakeAgents, add_kea_daemon, commit, dhcp4_config, ha_hook, ok, unreachable};
use kestrel_core::model::DaemonId;
use kestrel_core::puller::{DaemonLocks, HaStatusPuller, PullTask, StatsPuller};
use kestrel_core::{Inventory, PullerConfig};

/// What one scripted daemon answers.
#[derive(Clone)]
struct Script {
    reachable: bool,
    rows: Vec<Value>,
    counter: Value,
    ha_local: &'static str,
    ha_remote: &'static str,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            reachable: true,
            rows: Vec::new(),
            counter: json!(0),
            ha_local: "hot-standby",
            ha_remote: "hot-standby",
        }
    }
}

type Scripts = Arc<Mutex<HashMap<String, Script>>>;

fn scripted_agents(scripts: Scripts) -> Arc<FakeAgents> {
    FakeAgents::new(move |access_point, command| {
        let script = scripts
            .lock()
            .unwrap()
            .get(&access_point.to_string())
            .cloned()
            .unwrap_or_default();
        if !script.reachable {
            return unreachable();
        }
        match command.command.as_str() {
            "stat-lease4-get" => ok(json!({
                "result-set": {
                    "columns": ["subnet-id", "total-addresses", "assigned-addresses", "declined-addresses"],
                    "rows": script.rows,
                    "timestamp": "2026-10-14 10:00:00.000000"
                }
            })),
            "statistic-get" => ok(json!({
                "pkt4-ack-sent": [[script.counter, "2026-10-14 10:00:00.000000"]]
            })),
            "status-get" => ok(json!({
                "high-availability": [{
                    "ha-mode": "hot-standby",
                    "ha-servers": {
                        "local": {"state": script.ha_local},
                        "remote": {"last-state": script.ha_remote}
                    }
                }]
            })),
            other => panic!("unexpected command {other}"),
        }
    })
}

fn big(text: &str) -> BigUint {
    text.parse().unwrap()
}

struct Pair {
    inventory: Arc<Inventory>,
    scripts: Scripts,
    stats: StatsPuller,
    status: HaStatusPuller,
    primary: DaemonId,
    secondary: DaemonId,
}

/// Two hot-standby peers serving the same subnet.
async fn ha_pair() -> Pair {
    let inventory = Arc::new(Inventory::new());
    let primary = add_kea_daemon(&inventory, "agent1", 8000).await;
    let secondary = add_kea_daemon(&inventory, "agent2", 8000).await;
    let subnets = json!([{"id": 10, "subnet": "192.0.2.0/24", "pools": [{"pool": "192.0.2.1-192.0.2.200"}]}]);
    for (daemon, name) in [(primary, "server1"), (secondary, "server2")] {
        commit(
            &inventory,
            daemon,
            dhcp4_config(
                &["lease_cmds", "stat_cmds"],
                subnets.clone(),
                Some(ha_hook(name, "hot-standby")),
            ),
        )
        .await;
    }

    let scripts: Scripts = Arc::new(Mutex::new(HashMap::new()));
    for host in ["agent1:8000", "agent2:8000"] {
        scripts.lock().unwrap().insert(
            host.to_owned(),
            Script {
                rows: vec![json!([10, 256, 64, 0])],
                ..Script::default()
            },
        );
    }
    let agents: Arc<dyn ConnectedAgents> = scripted_agents(Arc::clone(&scripts));
    Pair {
        stats: StatsPuller::new(
            Arc::clone(&inventory),
            Arc::clone(&agents),
            DaemonLocks::new(),
            PullerConfig::default(),
        ),
        status: HaStatusPuller::new(Arc::clone(&inventory), agents, PullerConfig::default()),
        inventory,
        scripts,
        primary,
        secondary,
    }
}

fn subnet_total(inventory: &Inventory) -> BigUint {
    let snapshot = inventory.snapshot();
    let subnet = snapshot.subnet_by_prefix("192.0.2.0/24").unwrap();
    subnet.stats.get("total-addresses").cloned().unwrap_or_default()
}

#[tokio::test]
async fn local_subnet_statistics_are_stored() {
    let pair = ha_pair().await;
    let cancel = CancellationToken::new();
    pair.stats.pull_daemon(pair.primary, &cancel).await.unwrap();

    let snapshot = pair.inventory.snapshot();
    let subnet = snapshot.subnet_by_prefix("192.0.2.0/24").unwrap().id;
    let local = snapshot.local_subnets.get(&(subnet, pair.primary)).unwrap();
    assert_eq!(local.stats.get("total-addresses"), Some(&BigUint::from(256u32)));
    assert_eq!(local.stats.get("assigned-addresses"), Some(&BigUint::from(64u32)));
    assert!(!local.stats.contains_key("subnet-id"));
    assert!(local.stats_collected_at.is_some());
}

#[tokio::test]
async fn identical_statistics_are_not_rewritten() {
    let pair = ha_pair().await;
    let cancel = CancellationToken::new();
    let start = Utc.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap();
    pair.stats
        .pull_daemon_at(pair.primary, start, &cancel)
        .await
        .unwrap();
    let writes = pair.inventory.write_counts();

    pair.stats
        .pull_daemon_at(pair.primary, start + TimeDelta::seconds(60), &cancel)
        .await
        .unwrap();
    let after = pair.inventory.write_counts();
    // Only the response-rate interval of the second sample is new.
    assert_eq!(after.updates, writes.updates);
    assert_eq!(after.inserts, writes.inserts + 1);
}

#[tokio::test]
async fn unchanged_pass_leaves_aggregates_alone() {
    let pair = ha_pair().await;
    let cancel = CancellationToken::new();
    pair.stats.pull(&cancel).await.unwrap();
    pair.stats.pull(&cancel).await.unwrap();
    let before = pair.inventory.write_counts();

    pair.stats.aggregate_utilization(Utc::now()).await;
    assert_eq!(pair.inventory.write_counts(), before);

    // A full pass may add a response-rate interval but rewrites no row.
    pair.stats.pull(&cancel).await.unwrap();
    let after = pair.inventory.write_counts();
    assert_eq!(after.updates, before.updates);
    assert_eq!(after.deletes, before.deletes);
}

#[tokio::test]
async fn healthy_primary_counts_once() {
    let pair = ha_pair().await;
    let cancel = CancellationToken::new();
    pair.status.pull(&cancel).await.unwrap();
    pair.stats.pull(&cancel).await.unwrap();

    assert_eq!(subnet_total(&pair.inventory), BigUint::from(256u32));
    let snapshot = pair.inventory.snapshot();
    assert_eq!(
        snapshot.statistics.get("total-addresses"),
        Some(&BigUint::from(256u32))
    );
    let ha = snapshot
        .services
        .values()
        .find_map(|s| s.ha.as_ref())
        .unwrap();
    assert_eq!(ha.authoritative_daemon(), Some(pair.primary));
}

#[tokio::test]
async fn secondary_takes_over_when_primary_is_down() {
    let pair = ha_pair().await;
    let cancel = CancellationToken::new();
    {
        let mut scripts = pair.scripts.lock().unwrap();
        scripts.get_mut("agent1:8000").unwrap().reachable = false;
        let secondary = scripts.get_mut("agent2:8000").unwrap();
        secondary.ha_local = "partner-down";
        secondary.ha_remote = "unavailable";
        secondary.rows = vec![json!([10, 256, 80, 0])];
    }
    pair.status.pull(&cancel).await.unwrap();
    // The primary's stats cycle fails; the pass carries on.
    pair.stats.pull(&cancel).await.unwrap();

    let snapshot = pair.inventory.snapshot();
    let ha = snapshot
        .services
        .values()
        .find_map(|s| s.ha.as_ref())
        .unwrap();
    assert!(!ha.primary_reachable);
    assert_eq!(ha.authoritative_daemon(), Some(pair.secondary));

    let subnet = snapshot.subnet_by_prefix("192.0.2.0/24").unwrap();
    assert_eq!(subnet.stats.get("total-addresses"), Some(&BigUint::from(256u32)));
    assert_eq!(subnet.stats.get("assigned-addresses"), Some(&BigUint::from(80u32)));
}

#[tokio::test]
async fn sums_beyond_signed_range_are_exact() {
    let inventory = Arc::new(Inventory::new());
    let subnets = json!([{"id": 1, "subnet": "10.0.0.0/8"}]);
    let mut daemons = Vec::new();
    for machine in ["agent1", "agent2", "agent3"] {
        let daemon = add_kea_daemon(&inventory, machine, 8000).await;
        commit(&inventory, daemon, dhcp4_config(&["stat_cmds"], subnets.clone(), None)).await;
        daemons.push(daemon);
    }

    let scripts: Scripts = Arc::new(Mutex::new(HashMap::new()));
    for machine in ["agent1", "agent2", "agent3"] {
        // 2^63 + 1 as Kea reports it: a negative int64.
        scripts.lock().unwrap().insert(
            format!("{machine}:8000"),
            Script {
                rows: vec![json!([1, -9_223_372_036_854_775_807_i64, 1, 0])],
                ..Script::default()
            },
        );
    }
    let agents: Arc<dyn ConnectedAgents> = scripted_agents(scripts);
    let stats = StatsPuller::new(
        Arc::clone(&inventory),
        agents,
        DaemonLocks::new(),
        PullerConfig::default(),
    );
    stats.pull(&CancellationToken::new()).await.unwrap();

    let snapshot = inventory.snapshot();
    let subnet = snapshot.subnet_by_prefix("10.0.0.0/8").unwrap();
    assert_eq!(
        subnet.stats.get("total-addresses"),
        Some(&big("27670116110564327427"))
    );
    assert_eq!(
        snapshot.statistics.get("total-addresses"),
        Some(&big("27670116110564327427"))
    );
    assert_eq!(subnet.stats.get("assigned-addresses"), Some(&BigUint::from(3u32)));
}

#[tokio::test]
async fn response_rates_follow_counter_samples() {
    let pair = ha_pair().await;
    let cancel = CancellationToken::new();
    let start = Utc.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap();
    let set_counter = |value: u64| {
        pair.scripts
            .lock()
            .unwrap()
            .get_mut("agent1:8000")
            .unwrap()
            .counter = json!(value);
    };

    set_counter(1_000);
    pair.stats
        .pull_daemon_at(pair.primary, start, &cancel)
        .await
        .unwrap();
    assert_eq!(pair.stats.sample(pair.primary).unwrap().value, 1_000);
    assert!(pair.inventory.snapshot().rps_intervals.is_empty());

    set_counter(7_000);
    let next = start + TimeDelta::seconds(60);
    pair.stats
        .pull_daemon_at(pair.primary, next, &cancel)
        .await
        .unwrap();

    let snapshot = pair.inventory.snapshot();
    let intervals: Vec<_> = snapshot.rps_intervals_of(pair.primary).collect();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].responses, 6_000);
    assert_eq!(intervals[0].start, start);
    let daemon = snapshot.daemon(pair.primary).unwrap();
    assert!((daemon.rps.short - 100.0).abs() < f64::EPSILON);
    assert!((daemon.rps.long - 100.0).abs() < f64::EPSILON);

    // A lower counter means the daemon restarted.
    set_counter(300);
    pair.stats
        .pull_daemon_at(pair.primary, next + TimeDelta::seconds(60), &cancel)
        .await
        .unwrap();
    let snapshot = pair.inventory.snapshot();
    let latest: Vec<u64> = snapshot
        .rps_intervals_of(pair.primary)
        .map(|i| i.responses)
        .collect();
    assert!(latest.contains(&300));
}

#[tokio::test]
async fn old_intervals_age_out() {
    let pair = ha_pair().await;
    let cancel = CancellationToken::new();
    let start = Utc.with_ymd_and_hms(2026, 10, 13, 0, 0, 0).unwrap();
    for (offset, counter) in [(0, 10u64), (2 * 3600, 70), (25 * 3600, 130)] {
        pair.scripts
            .lock()
            .unwrap()
            .get_mut("agent1:8000")
            .unwrap()
            .counter = json!(counter);
        pair.stats
            .pull_daemon_at(pair.primary, start + TimeDelta::seconds(offset), &cancel)
            .await
            .unwrap();
    }
    let snapshot = pair.inventory.snapshot();
    let starts: Vec<_> = snapshot
        .rps_intervals_of(pair.primary)
        .map(|i| i.start)
        .collect();
    assert_eq!(starts, vec![start + TimeDelta::hours(2)]);
}
