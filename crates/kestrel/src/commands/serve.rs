//! `kestrel serve`: seed the inventory, fetch Kea configurations and run
//! the pullers until interrupted.

use std::sync::Arc;

use kestrel_agent::{AccessPoint, ConnectedAgents, HttpAgents, KeaCommand};
use kestrel_config::{AppSeed, ServerConfig};
use kestrel_core::bind9::{Bind9Config, RndcAccess};
use kestrel_core::model::{AppType, DaemonConfig, DaemonName, MachineId, SettingValue};
use kestrel_core::puller::{check_response, send_command};
use kestrel_core::{
    ChannelReviews, CommitSummary, CoreError, Inventory, KeaConfig, PullerConfig,
    ReviewDispatcher, Supervisor, Transaction, commit_daemon_config,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CliError;

const CONFIG_GET: &str = "config-get";

pub async fn handle(cfg: &ServerConfig, config_source: &str) -> Result<(), CliError> {
    let inventory = Arc::new(Inventory::new());
    let config_err = |e: kestrel_config::ConfigError| CliError::config(&e, config_source);

    seed(&inventory, cfg).await?;
    let transport = cfg.transport_config().map_err(config_err)?;
    let agents: Arc<dyn ConnectedAgents> = Arc::new(HttpAgents::new(transport)?);
    let puller_config = cfg.puller_config();

    let (reviews, mut requests) = ChannelReviews::new();
    let reviews: Arc<dyn ReviewDispatcher> = Arc::new(reviews);
    let review_log = tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            info!(
                daemon_id = %request.daemon_id,
                trigger = %request.trigger,
                "configuration review requested"
            );
        }
    });

    let cancel = CancellationToken::new();
    fetch_kea_configs(
        &inventory,
        agents.as_ref(),
        reviews.as_ref(),
        &puller_config,
        &cancel,
    )
    .await;

    let supervisor = Supervisor::start(
        Arc::clone(&inventory),
        agents,
        Arc::clone(&reviews),
        puller_config,
    );
    info!("kestrel running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    supervisor.shutdown().await;
    review_log.abort();
    Ok(())
}

// ── Seeding ──────────────────────────────────────────────────────────

/// Write the configured apps and interval settings in one transaction.
async fn seed(inventory: &Inventory, cfg: &ServerConfig) -> Result<(), CliError> {
    let mut tx = inventory.begin().await;

    let intervals = cfg
        .interval_seeds()
        .map_err(|e| CliError::config(&e, "pullers.intervals"))?;
    for (key, secs) in intervals {
        if tx.setting(key).is_none() {
            tx.set_setting(key, SettingValue::Int(secs));
        }
    }

    for app in &cfg.apps {
        seed_app(&mut tx, app)?;
    }

    let writes = tx.commit();
    info!(
        apps = cfg.apps.len(),
        inserts = writes.inserts,
        "inventory seeded"
    );
    Ok(())
}

fn seed_app(tx: &mut Transaction<'_>, app: &AppSeed) -> Result<(), CliError> {
    let config_err = |e: kestrel_config::ConfigError| CliError::config(&e, "apps");
    let kind = app.app_type().map_err(config_err)?;
    let mut daemons = app.daemon_names().map_err(config_err)?;
    if daemons.is_empty() {
        daemons = match kind {
            AppType::Kea => vec![DaemonName::Dhcp4],
            AppType::Bind9 => vec![DaemonName::Named],
        };
    }
    let seed_control = AccessPoint::control(
        app.control_address.clone(),
        app.control_port().map_err(config_err)?,
    );

    let (access_points, bind9) = match kind {
        AppType::Kea => (vec![seed_control], None),
        AppType::Bind9 => match &app.config_path {
            Some(path) => {
                let mut config = Bind9Config::parse_file(path)?;
                for skipped in config.expand_includes(app.chroot.as_deref())? {
                    warn!(path = %skipped.display(), "include cycle, statement left in place");
                }
                let points = bind9_access_points(&config, seed_control);
                (points, Some(Arc::new(config)))
            }
            None => (vec![seed_control], None),
        },
    };

    let machine = machine_for(tx, &app.machine, app.agent_port)?;
    let app_id = tx.add_app(machine, kind, &app.name(), access_points)?;
    for name in daemons {
        let daemon_id = tx.add_daemon(app_id, name)?;
        if let Some(config) = &bind9 {
            if let Some(daemon) = tx.daemons.get_mut(&daemon_id) {
                daemon.config = Some(DaemonConfig::Bind9(Arc::clone(config)));
            }
        }
    }
    debug!(app = %app.name(), %kind, "app seeded");
    Ok(())
}

/// Several apps may share one agent.
fn machine_for(
    tx: &mut Transaction<'_>,
    address: &str,
    agent_port: u16,
) -> Result<MachineId, CoreError> {
    let existing = tx
        .machines
        .values()
        .find(|m| m.address == address && m.agent_port == agent_port)
        .map(|m| m.id);
    match existing {
        Some(id) => Ok(id),
        None => tx.add_machine(address, agent_port),
    }
}

/// Control point from `controls`, falling back to the seed when rndc is
/// disabled, plus the statistics channel when one is configured.
fn bind9_access_points(config: &Bind9Config, fallback: AccessPoint) -> Vec<AccessPoint> {
    let control = match config.rndc_access() {
        RndcAccess::Default { host, port } => AccessPoint::control(host, port),
        RndcAccess::Enabled { host, port, key } => {
            let mut point = AccessPoint::control(host, port);
            point.key = key.map(|k| k.name);
            point
        }
        RndcAccess::Disabled => fallback,
    };
    let mut points = vec![control];
    if let Some(channel) = config.statistics_channel() {
        points.push(AccessPoint::statistics(channel.host, channel.port));
    }
    points
}

// ── Kea configurations ───────────────────────────────────────────────

/// Fetch and commit the configuration of every Kea daemon. Failures are
/// logged; the pullers skip daemons without a configuration.
async fn fetch_kea_configs(
    inventory: &Inventory,
    agents: &dyn ConnectedAgents,
    reviews: &dyn ReviewDispatcher,
    config: &PullerConfig,
    cancel: &CancellationToken,
) {
    let snapshot = inventory.snapshot();
    for daemon in snapshot.daemons_of_kind(AppType::Kea) {
        let Some(service) = daemon.name.kea_service() else {
            continue;
        };
        let Ok(app) = snapshot.app_of(daemon.id) else {
            continue;
        };
        let Some(access_point) = app.control_access_point() else {
            continue;
        };
        let label = format!("{}@{}", daemon.name, app.name);
        let command = KeaCommand::new(CONFIG_GET).for_service(service);

        let result: Result<CommitSummary, CoreError> = async {
            let response =
                send_command(agents, access_point, &command, config.command_timeout, cancel)
                    .await?;
            let response = check_response(response, CONFIG_GET, &label)?;
            let document = response.arguments.ok_or_else(|| {
                CoreError::malformed(format!("{CONFIG_GET} returned no configuration"))
            })?;
            commit_daemon_config(inventory, daemon.id, KeaConfig::from_value(document)?, reviews)
                .await
        }
        .await;

        match result {
            Ok(summary) if summary.unchanged => {
                debug!(daemon = %label, "configuration unchanged");
            }
            Ok(summary) => info!(
                daemon = %label,
                subnets = summary.local_subnets,
                services = summary.services.len(),
                "configuration committed"
            ),
            Err(e) => warn!(daemon = %label, error = %e, "configuration fetch failed"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn seed(kind: &str) -> AppSeed {
        AppSeed {
            machine: "agent1".into(),
            agent_port: 8080,
            kind: kind.into(),
            name: None,
            control_address: "127.0.0.1".into(),
            control_port: None,
            daemons: Vec::new(),
            config_path: None,
            chroot: None,
        }
    }

    #[test]
    fn rndc_key_lands_on_control_point() {
        let config = Bind9Config::parse_str(
            r#"key "rndc-key" { algorithm hmac-sha256; secret "abc"; };
controls { inet 10.0.0.1 port 9953 allow { any; } keys { "rndc-key"; }; };
statistics-channels { inet 10.0.0.1 port 8053 allow { any; }; };"#,
        )
        .unwrap();
        let points = bind9_access_points(&config, AccessPoint::control("127.0.0.1", 953));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].to_string(), "10.0.0.1:9953");
        assert_eq!(points[0].key.as_deref(), Some("rndc-key"));
        assert_eq!(points[1].to_string(), "10.0.0.1:8053");
    }

    #[test]
    fn disabled_rndc_uses_seed() {
        let config = Bind9Config::parse_str("controls { };").unwrap();
        let points = bind9_access_points(&config, AccessPoint::control("192.0.2.1", 953));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].to_string(), "192.0.2.1:953");
    }

    #[tokio::test]
    async fn apps_share_machines() {
        let inventory = Inventory::new();
        let mut kea = seed("kea");
        kea.daemons = vec!["dhcp4".into(), "dhcp6".into()];
        let mut bind = seed("bind9");
        bind.control_port = Some(953);
        let cfg = ServerConfig {
            apps: vec![kea, bind],
            ..ServerConfig::default()
        };

        super::seed(&inventory, &cfg).await.unwrap();
        let tables = inventory.snapshot();
        assert_eq!(tables.machines.len(), 1);
        assert_eq!(tables.apps.len(), 2);
        assert_eq!(tables.daemons_of_kind(AppType::Kea).count(), 2);
        assert_eq!(tables.daemons_of_kind(AppType::Bind9).count(), 1);
    }

    #[tokio::test]
    async fn interval_seeds_keep_existing_settings() {
        let inventory = Inventory::new();
        let key = kestrel_core::model::setting::INTERVAL_DEFAULTS[0].0;
        {
            let mut tx = inventory.begin().await;
            tx.set_setting(key, SettingValue::Int(5));
            tx.commit();
        }
        let mut cfg = ServerConfig::default();
        cfg.pullers.intervals.insert(key.to_owned(), 99);

        super::seed(&inventory, &cfg).await.unwrap();
        assert_eq!(inventory.snapshot().interval_setting(key), 5);
    }
}
