// ── Configuration mutations ──
//
// User-initiated changes go through three steps: `begin` opens a context,
// `apply_*` plans the per-daemon commands into the context's recipe and
// `commit` sends them. Commands already sent stay applied when a later one
// fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kestrel_agent::{AccessPoint, ConnectedAgents, KeaCommand};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PullerConfig;
use crate::error::{CoreError, Result};
use crate::keaconfig::OptionDef;
use crate::keaconfig::reservation::option_to_value;
use crate::model::{DaemonId, DhcpOption, Family, Host, LocalHost};
use crate::puller::pager::GLOBAL_SUBNET_ID;
use crate::puller::{check_response, send_command};
use crate::store::{Inventory, Tables};

pub const RESERVATION_ADD: &str = "reservation-add";

/// One command of an update recipe.
#[derive(Debug, Clone)]
pub struct PlannedCommand {
    pub daemon_id: DaemonId,
    pub app_name: String,
    pub access_point: AccessPoint,
    pub command: KeaCommand,
}

/// State carried between the phases of one change.
#[derive(Debug, Clone)]
pub struct ConfigContext {
    id: u64,
    recipe: Vec<PlannedCommand>,
}

impl ConfigContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn recipe(&self) -> &[PlannedCommand] {
        &self.recipe
    }
}

pub struct ConfigManager {
    inventory: Arc<Inventory>,
    agents: Arc<dyn ConnectedAgents>,
    config: PullerConfig,
    next_context: AtomicU64,
}

impl ConfigManager {
    pub fn new(
        inventory: Arc<Inventory>,
        agents: Arc<dyn ConnectedAgents>,
        config: PullerConfig,
    ) -> Self {
        Self {
            inventory,
            agents,
            config,
            next_context: AtomicU64::new(1),
        }
    }

    pub fn begin(&self) -> ConfigContext {
        ConfigContext {
            id: self.next_context.fetch_add(1, Ordering::Relaxed),
            recipe: Vec::new(),
        }
    }

    /// Plan `reservation-add` for every daemon the host is attached to.
    pub fn apply_host_add(&self, mut ctx: ConfigContext, host: &Host) -> Result<ConfigContext> {
        if host.local_hosts.is_empty() {
            return Err(CoreError::Config {
                message: "host is not attached to any daemon".to_owned(),
            });
        }
        let tables = self.inventory.snapshot();
        for local in &host.local_hosts {
            ctx.recipe.push(plan_reservation_add(&tables, host, local)?);
        }
        debug!(context = ctx.id, commands = ctx.recipe.len(), "host add planned");
        Ok(ctx)
    }

    /// Send the recipe, stopping at the first failure. The whole recipe
    /// shares one `mutation_timeout`.
    ///
    /// Returns the number of commands sent.
    pub async fn commit(&self, ctx: ConfigContext, cancel: &CancellationToken) -> Result<usize> {
        let timeout = self.config.mutation_timeout;
        tokio::time::timeout(timeout, self.send_recipe(&ctx, cancel))
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            })??;
        info!(context = ctx.id, commands = ctx.recipe.len(), "configuration change committed");
        Ok(ctx.recipe.len())
    }

    async fn send_recipe(&self, ctx: &ConfigContext, cancel: &CancellationToken) -> Result<()> {
        for planned in &ctx.recipe {
            let response = send_command(
                self.agents.as_ref(),
                &planned.access_point,
                &planned.command,
                self.config.mutation_timeout,
                cancel,
            )
            .await
            .map_err(|e| match e {
                CoreError::Cancelled | CoreError::Timeout { .. } => e,
                other => CoreError::Transport {
                    target: planned.app_name.clone(),
                    reason: format!("{} failed: {other}", planned.command.command),
                },
            })?;
            check_response(response, &planned.command.command, &planned.app_name)?;
        }
        Ok(())
    }
}

fn plan_reservation_add(tables: &Tables, host: &Host, local: &LocalHost) -> Result<PlannedCommand> {
    let daemon = tables.daemon(local.daemon_id)?;
    let app = tables.app_of(local.daemon_id)?;
    let (Some(family), Some(service)) = (daemon.name.family(), daemon.name.kea_service()) else {
        return Err(CoreError::Config {
            message: format!("daemon {} of app {} does not serve DHCP", daemon.name, app.name),
        });
    };
    let access_point = app
        .control_access_point()
        .ok_or_else(|| CoreError::Config {
            message: format!("app {} has no control access point", app.name),
        })?
        .clone();

    let subnet_id = match host.subnet_id {
        Some(subnet) => tables
            .local_subnets
            .get(&(subnet, local.daemon_id))
            .map(|ls| ls.local_id)
            .ok_or_else(|| CoreError::Config {
                message: format!("subnet {subnet} is not served by app {}", app.name),
            })?,
        None => GLOBAL_SUBNET_ID,
    };
    let defs = daemon
        .kea_config()
        .map(|c| c.option_defs())
        .unwrap_or_default();

    let reservation = reservation_arguments(host, local, family, subnet_id, &defs);
    Ok(PlannedCommand {
        daemon_id: local.daemon_id,
        app_name: app.name.clone(),
        access_point,
        command: KeaCommand::new(RESERVATION_ADD)
            .for_service(service)
            .with_arguments(json!({ "reservation": reservation })),
    })
}

/// Fill the missing half of an option's code/name pair from the daemon's
/// option definitions.
fn resolve_option(option: &DhcpOption, defs: &[OptionDef]) -> DhcpOption {
    let mut resolved = option.clone();
    let def = defs.iter().filter(|d| d.space == option.space).find(|d| {
        option.code.is_some_and(|code| code == d.code)
            || option.name.as_deref().is_some_and(|name| name == d.name)
    });
    if let Some(def) = def {
        resolved.code.get_or_insert(def.code);
        resolved.name.get_or_insert_with(|| def.name.clone());
    }
    resolved
}

/// The `reservation` argument of `reservation-add`.
pub fn reservation_arguments(
    host: &Host,
    local: &LocalHost,
    family: Family,
    subnet_id: i64,
    defs: &[OptionDef],
) -> Value {
    let mut obj = Map::new();
    obj.insert("subnet-id".into(), json!(subnet_id));
    for identifier in &host.identifiers {
        obj.insert(identifier.kind.clone(), json!(identifier.value));
    }

    let (prefixes, addresses): (Vec<_>, Vec<_>) =
        host.reservations.iter().partition(|r| r.is_prefix());
    match family {
        Family::V4 => {
            if let Some(first) = addresses.first() {
                obj.insert("ip-address".into(), json!(first.address));
            }
        }
        Family::V6 => {
            if !addresses.is_empty() {
                let list: Vec<&str> = addresses.iter().map(|r| r.address.as_str()).collect();
                obj.insert("ip-addresses".into(), json!(list));
            }
            if !prefixes.is_empty() {
                let list: Vec<&str> = prefixes.iter().map(|r| r.address.as_str()).collect();
                obj.insert("prefixes".into(), json!(list));
            }
        }
    }

    if let Some(hostname) = &local.hostname {
        obj.insert("hostname".into(), json!(hostname));
    }
    if !local.client_classes.is_empty() {
        obj.insert("client-classes".into(), json!(local.client_classes));
    }
    if !local.options.is_empty() {
        let options: Vec<Value> = local
            .options
            .iter()
            .map(|o| option_to_value(&resolve_option(o, defs)))
            .collect();
        obj.insert("option-data".into(), Value::Array(options));
    }
    if family == Family::V4 {
        for (key, value) in [
            ("next-server", &local.next_server),
            ("server-hostname", &local.server_hostname),
            ("boot-file-name", &local.boot_file_name),
        ] {
            if let Some(value) = value {
                obj.insert(key.into(), json!(value));
            }
        }
    }
    Value::Object(obj)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DataSource, HostId, HostIdentifier, IpReservation};
    use pretty_assertions::assert_eq;

    fn host(addresses: &[&str]) -> Host {
        Host {
            id: HostId(1),
            subnet_id: None,
            identifiers: vec![HostIdentifier {
                kind: "hw-address".into(),
                value: "01:02:03:04:05:06".into(),
            }],
            reservations: addresses
                .iter()
                .map(|a| IpReservation {
                    address: (*a).into(),
                })
                .collect(),
            local_hosts: vec![],
        }
    }

    #[test]
    fn v4_reservation_arguments() {
        let mut local = LocalHost::new(DaemonId(1), DataSource::Api);
        local.hostname = Some("printer".into());
        local.next_server = Some("192.0.2.1".into());
        local.options = vec![DhcpOption {
            code: Some(224),
            name: None,
            space: "dhcp4".into(),
            data: "abc".into(),
            always_send: false,
        }];
        let defs = vec![OptionDef {
            name: "vendor-blob".into(),
            code: 224,
            space: "dhcp4".into(),
            record_type: "string".into(),
        }];
        let args = reservation_arguments(&host(&["192.0.2.50"]), &local, Family::V4, 10, &defs);
        assert_eq!(
            args,
            json!({
                "subnet-id": 10,
                "hw-address": "01:02:03:04:05:06",
                "ip-address": "192.0.2.50",
                "hostname": "printer",
                "option-data": [{"code": 224, "name": "vendor-blob", "space": "dhcp4", "data": "abc"}],
                "next-server": "192.0.2.1"
            })
        );
    }

    #[test]
    fn v6_reservation_splits_prefixes() {
        let local = LocalHost::new(DaemonId(1), DataSource::Api);
        let args = reservation_arguments(
            &host(&["2001:db8::10", "2001:db8:1::/64"]),
            &local,
            Family::V6,
            0,
            &[],
        );
        assert_eq!(args["ip-addresses"], json!(["2001:db8::10"]));
        assert_eq!(args["prefixes"], json!(["2001:db8:1::/64"]));
        assert!(args.get("ip-address").is_none());
    }
}
