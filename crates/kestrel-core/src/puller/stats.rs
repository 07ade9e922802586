// ── Lease statistics puller ──
//
// Each cycle stores per-local-subnet lease statistics and one response
// counter sample per daemon. After every daemon has been visited the
// statistics are rolled up into subnets, shared networks and globals.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use kestrel_agent::{ConnectedAgents, KeaCommand, ResultCode};
use num_bigint::{BigInt, BigUint, Sign};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::rps::{RpsSample, interval_between, latest_sample, rates, response_statistic};
use super::utilization::{aggregate, apply, ha_exclusions, out_of_pool_corrections};
use super::{
    DaemonLocks, Outcome, PassCounters, PullTask, check_response, for_each_daemon, send_command,
};
use crate::config::PullerConfig;
use crate::error::{CoreError, Result};
use crate::model::setting::KEA_STATS_PULLER_INTERVAL;
use crate::model::{AppType, DaemonId, Family, StatsMap};
use crate::store::{Inventory, Tables};

pub const STAT_CMDS_HOOK: &str = "stat_cmds";

const SUBNET_ID_COLUMN: &str = "subnet-id";

fn lease_command(family: Family) -> &'static str {
    match family {
        Family::V4 => "stat-lease4-get",
        Family::V6 => "stat-lease6-get",
    }
}

// ── Decoding ────────────────────────────────────────────────────────

/// Decode a statistic as an unsigned big integer.
///
/// Kea stores counters as int64, so values above 2^63 arrive negative.
/// Those are read back as their two's-complement unsigned value.
pub fn decode_stat_value(value: &Value) -> Option<BigUint> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_owned(),
        _ => return None,
    };
    let parsed: BigInt = text.parse().ok()?;
    let unsigned = if parsed.sign() == Sign::Minus {
        parsed + (BigInt::from(1u8) << 64u32)
    } else {
        parsed
    };
    unsigned.to_biguint()
}

/// Rows of a `stat-lease*-get` result set, keyed by Kea `subnet-id`.
pub fn decode_lease_stats(arguments: &Value) -> Result<Vec<(i64, StatsMap)>> {
    let result_set = arguments
        .get("result-set")
        .ok_or_else(|| CoreError::malformed("lease statistics without result-set"))?;
    let columns: Vec<&str> = result_set
        .get("columns")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::malformed("result-set without columns"))?
        .iter()
        .map(|c| c.as_str().unwrap_or_default())
        .collect();
    let id_column = columns
        .iter()
        .position(|c| *c == SUBNET_ID_COLUMN)
        .ok_or_else(|| CoreError::malformed("result-set without subnet-id column"))?;

    let rows = match result_set.get("rows") {
        Some(Value::Array(rows)) => rows.as_slice(),
        None | Some(Value::Null) => &[],
        Some(_) => return Err(CoreError::malformed("result-set rows is not a list")),
    };

    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(cells) = row.as_array() else {
            warn!("skipping malformed lease statistics row");
            continue;
        };
        let Some(local_id) = cells.get(id_column).and_then(Value::as_i64) else {
            warn!("skipping lease statistics row without subnet-id");
            continue;
        };
        let stats: StatsMap = columns
            .iter()
            .zip(cells)
            .enumerate()
            .filter(|(index, _)| *index != id_column)
            .filter_map(|(_, (name, cell))| Some(((*name).to_owned(), decode_stat_value(cell)?)))
            .collect();
        decoded.push((local_id, stats));
    }
    Ok(decoded)
}

// ── Puller ──────────────────────────────────────────────────────────

pub struct StatsPuller {
    inventory: Arc<Inventory>,
    agents: Arc<dyn ConnectedAgents>,
    locks: DaemonLocks,
    config: PullerConfig,
    samples: DashMap<DaemonId, RpsSample>,
}

impl StatsPuller {
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
            samples: DashMap::new(),
        }
    }

    /// Last response counter sample of a daemon.
    pub fn sample(&self, daemon_id: DaemonId) -> Option<RpsSample> {
        self.samples.get(&daemon_id).map(|s| *s.value())
    }

    pub async fn pull_daemon(
        &self,
        daemon_id: DaemonId,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        self.pull_daemon_at(daemon_id, Utc::now(), cancel).await
    }

    /// One stats cycle for a daemon, sampled at `now`.
    pub async fn pull_daemon_at(
        &self,
        daemon_id: DaemonId,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let _lock = self.locks.lock(daemon_id).await;
        let snapshot = self.inventory.snapshot();
        let daemon = snapshot.daemon(daemon_id)?;

        let Some(config) = daemon.kea_config().filter(|_| daemon.active) else {
            return Ok(Outcome::Skip);
        };
        let (Some(service), Some(family)) = (daemon.name.kea_service(), daemon.name.family())
        else {
            return Ok(Outcome::Skip);
        };
        let app = snapshot.app_of(daemon_id)?;
        let access_point = app.control_access_point().ok_or_else(|| CoreError::Config {
            message: format!("app {} has no control access point", app.name),
        })?;
        let label = format!("{}@{}", daemon.name, app.name);
        let timeout = self.config.command_timeout;

        let mut lease_stats = Vec::new();
        if config.has_hook_library(STAT_CMDS_HOOK) {
            let command_name = lease_command(family);
            let command = KeaCommand::new(command_name).for_service(service);
            let response =
                send_command(self.agents.as_ref(), access_point, &command, timeout, cancel).await?;
            match check_response(response, command_name, &label) {
                Ok(response) if response.code() == ResultCode::Success => {
                    let args = response.arguments.unwrap_or(Value::Null);
                    lease_stats = decode_lease_stats(&args)?;
                }
                Ok(_) => {}
                Err(CoreError::UnsupportedCommand { .. }) => {
                    debug!(daemon = %label, command = command_name, "lease statistics unsupported");
                }
                Err(e) => return Err(e),
            }
        }

        let statistic = response_statistic(family);
        let command = KeaCommand::new("statistic-get")
            .for_service(service)
            .with_arguments(json!({ "name": statistic }));
        let response =
            send_command(self.agents.as_ref(), access_point, &command, timeout, cancel).await?;
        let response = check_response(response, "statistic-get", &label)?;
        let counter = response
            .arguments
            .as_ref()
            .and_then(|args| latest_sample(args, statistic));

        let mut tx = self.inventory.begin().await;
        for (local_id, stats) in lease_stats {
            store_local_stats(&mut tx, daemon_id, local_id, stats, now);
        }

        let sample = counter.map(|value| RpsSample {
            sampled_at: now,
            value,
        });
        if let (Some(previous), Some(current)) = (self.sample(daemon_id), sample) {
            if let Some(interval) = interval_between(daemon_id, previous, current) {
                tx.rps_intervals
                    .insert((daemon_id, interval.start), interval);
            }
        }
        let long = self.config.rps_long_window;
        let cutoff = TimeDelta::from_std(long)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        tx.rps_intervals
            .retain(|(d, start), _| *d != daemon_id || *start >= cutoff);

        let values = rates(
            tx.rps_intervals_of(daemon_id).collect::<Vec<_>>(),
            now,
            self.config.rps_short_window,
            long,
        );
        if tx.daemons.get(&daemon_id).is_some_and(|d| d.rps != values) {
            if let Some(daemon) = tx.daemons.get_mut(&daemon_id) {
                daemon.rps = values;
            }
        }
        tx.commit();

        if let Some(sample) = sample {
            self.samples.insert(daemon_id, sample);
        }
        Ok(Outcome::Success)
    }

    /// Roll local subnet statistics up into subnets, shared networks and
    /// global totals.
    pub async fn aggregate_utilization(&self, now: DateTime<Utc>) {
        let mut tx = self.inventory.begin().await;
        let excluded = ha_exclusions(&tx);
        let corrections = out_of_pool_corrections(&tx);
        let report = aggregate(&tx, &excluded, &corrections);
        apply(&mut tx, report, now);
        let writes = tx.commit();
        debug!(updates = writes.updates, inserts = writes.inserts, "utilization aggregated");
    }
}

fn store_local_stats(
    tables: &mut Tables,
    daemon_id: DaemonId,
    local_id: i64,
    stats: StatsMap,
    now: DateTime<Utc>,
) {
    let Some(key) = tables
        .local_subnet_by_local_id(daemon_id, local_id)
        .map(|ls| (ls.subnet_id, ls.daemon_id))
    else {
        warn!(daemon_id = %daemon_id, subnet_id = local_id, "statistics for unknown local subnet");
        return;
    };
    if tables.local_subnets.get(&key).is_some_and(|ls| ls.stats == stats) {
        return;
    }
    if let Some(local) = tables.local_subnets.get_mut(&key) {
        local.stats = stats;
        local.stats_collected_at = Some(now);
    }
}

#[async_trait]
impl PullTask for StatsPuller {
    fn name(&self) -> &'static str {
        "kea_stats"
    }

    fn interval_setting(&self) -> &'static str {
        KEA_STATS_PULLER_INTERVAL
    }

    async fn pull(&self, cancel: &CancellationToken) -> Result<PassCounters> {
        let daemons: Vec<DaemonId> = self
            .inventory
            .snapshot()
            .daemons_of_kind(AppType::Kea)
            .filter(|d| d.name.is_dhcp())
            .map(|d| d.id)
            .collect();
        let counters = for_each_daemon(self.name(), daemons, self.config.fan_out, |id| {
            self.pull_daemon(id, cancel)
        })
        .await;
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        self.aggregate_utilization(Utc::now()).await;
        info!(puller = self.name(), "utilization updated");
        Ok(counters)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use num_traits::One;
    use pretty_assertions::assert_eq;

    #[test]
    fn negative_values_wrap_to_unsigned() {
        let max = (BigUint::one() << 64u32) - BigUint::one();
        assert_eq!(decode_stat_value(&json!(-1)), Some(max));
        assert_eq!(decode_stat_value(&json!("-2")).unwrap().to_string(), "18446744073709551614");
        assert_eq!(decode_stat_value(&json!(256)), Some(BigUint::from(256u32)));
        assert_eq!(decode_stat_value(&json!(null)), None);
    }

    #[test]
    fn values_beyond_u64_decode() {
        let value: Value = serde_json::from_str("340282366920938463463374607431768211456").unwrap();
        assert_eq!(
            decode_stat_value(&value).unwrap().to_string(),
            "340282366920938463463374607431768211456"
        );
    }

    #[test]
    fn result_set_rows_become_stats() {
        let args = json!({
            "result-set": {
                "columns": ["subnet-id", "total-addresses", "assigned-addresses", "declined-addresses"],
                "rows": [[10, 256, 111, 0], [20, 4098, 2034, 4]],
                "timestamp": "2024-01-01 10:00:00"
            }
        });
        let rows = decode_lease_stats(&args).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 10);
        assert_eq!(rows[0].1["total-addresses"], BigUint::from(256u32));
        assert_eq!(rows[1].1["declined-addresses"], BigUint::from(4u32));
        assert!(!rows[1].1.contains_key("subnet-id"));
    }

    #[test]
    fn result_set_without_rows_is_empty() {
        let args = json!({"result-set": {"columns": ["subnet-id"], "rows": []}});
        assert!(decode_lease_stats(&args).unwrap().is_empty());
        assert!(decode_lease_stats(&json!({})).is_err());
    }
}
