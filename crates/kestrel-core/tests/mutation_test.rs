#![allow(clippy::unwrap_used)]
// Host reservation changes pushed through the config manager.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kestrel_agent::{AccessPoint, ConnectedAgents, Error, KeaCommand, KeaResponse};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use common::{FakeAgents, add_kea_daemon, commit, dhcp4_config, ok};
use kestrel_core::model::{
    DaemonId, DataSource, Host, HostId, HostIdentifier, IpReservation, LocalHost,
};
use kestrel_core::{ConfigManager, CoreError, Inventory, PullerConfig};

async fn inventory_with(machines: &[&str]) -> (Arc<Inventory>, Vec<DaemonId>) {
    let inventory = Arc::new(Inventory::new());
    let mut daemons = Vec::new();
    for machine in machines {
        let daemon = add_kea_daemon(&inventory, machine, 8000).await;
        commit(
            &inventory,
            daemon,
            dhcp4_config(
                &["host_cmds"],
                json!([{"id": 10, "subnet": "192.0.2.0/24"}]),
                None,
            ),
        )
        .await;
        daemons.push(daemon);
    }
    (inventory, daemons)
}

fn printer(inventory: &Inventory, daemons: &[DaemonId]) -> Host {
    let subnet = inventory
        .snapshot()
        .subnet_by_prefix("192.0.2.0/24")
        .unwrap()
        .id;
    Host {
        id: HostId(100),
        subnet_id: Some(subnet),
        identifiers: vec![HostIdentifier {
            kind: "hw-address".into(),
            value: "aa:bb:cc:dd:ee:ff".into(),
        }],
        reservations: vec![IpReservation {
            address: "192.0.2.20".into(),
        }],
        local_hosts: daemons
            .iter()
            .map(|d| {
                let mut local = LocalHost::new(*d, DataSource::Api);
                local.hostname = Some("printer".into());
                local
            })
            .collect(),
    }
}

fn manager(inventory: Arc<Inventory>, agents: Arc<FakeAgents>) -> ConfigManager {
    let agents: Arc<dyn ConnectedAgents> = agents;
    ConfigManager::new(inventory, agents, PullerConfig::default())
}

#[tokio::test]
async fn host_add_sends_reservation_add() {
    let (inventory, daemons) = inventory_with(&["agent1"]).await;
    let agents = FakeAgents::new(|_, _| ok(json!({})));
    let manager = manager(Arc::clone(&inventory), Arc::clone(&agents));

    let ctx = manager.begin();
    let ctx = manager
        .apply_host_add(ctx, &printer(&inventory, &daemons))
        .unwrap();
    assert_eq!(ctx.recipe().len(), 1);
    let sent = manager
        .commit(ctx, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sent, 1);

    let calls = agents.calls();
    assert_eq!(calls.len(), 1);
    let (target, command) = &calls[0];
    assert_eq!(target, "agent1:8000");
    assert_eq!(command.command, "reservation-add");
    assert_eq!(
        command.arguments,
        Some(json!({
            "reservation": {
                "subnet-id": 10,
                "hw-address": "aa:bb:cc:dd:ee:ff",
                "ip-address": "192.0.2.20",
                "hostname": "printer"
            }
        }))
    );
}

#[tokio::test]
async fn contexts_are_numbered() {
    let (inventory, _) = inventory_with(&["agent1"]).await;
    let manager = manager(inventory, FakeAgents::new(|_, _| ok(json!({}))));
    let first = manager.begin();
    let second = manager.begin();
    assert_ne!(first.id(), second.id());
    assert!(first.recipe().is_empty());
}

#[tokio::test]
async fn detached_host_is_rejected() {
    let (inventory, _) = inventory_with(&["agent1"]).await;
    let manager = manager(
        Arc::clone(&inventory),
        FakeAgents::new(|_, _| ok(json!({}))),
    );
    let host = printer(&inventory, &[]);
    let err = manager.apply_host_add(manager.begin(), &host).unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }));
}

#[tokio::test]
async fn failure_names_the_app_and_stops() {
    let (inventory, daemons) = inventory_with(&["agent1", "agent2"]).await;
    let agents = FakeAgents::new(|_, _| {
        Ok(vec![KeaResponse {
            result: 1,
            text: Some("host already exists".into()),
            arguments: None,
        }])
    });
    let manager = manager(Arc::clone(&inventory), Arc::clone(&agents));

    let ctx = manager
        .apply_host_add(manager.begin(), &printer(&inventory, &daemons))
        .unwrap();
    assert_eq!(ctx.recipe().len(), 2);
    let err = manager
        .commit(ctx, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        CoreError::CommandFailed {
            daemon,
            command,
            text,
        } => {
            assert_eq!(daemon, "kea@agent1");
            assert_eq!(command, "reservation-add");
            assert_eq!(text, "host already exists");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(agents.count("reservation-add"), 1);
}

#[tokio::test]
async fn cancelled_commit_sends_nothing() {
    let (inventory, daemons) = inventory_with(&["agent1"]).await;
    let agents = FakeAgents::new(|_, _| ok(json!({})));
    let manager = manager(Arc::clone(&inventory), Arc::clone(&agents));
    let ctx = manager
        .apply_host_add(manager.begin(), &printer(&inventory, &daemons))
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = manager.commit(ctx, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert!(agents.calls().is_empty());
}

/// Answers every command with success after `delay`.
struct SlowAgents {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl ConnectedAgents for SlowAgents {
    async fn forward_to_kea(
        &self,
        _access_point: &AccessPoint,
        _command: &KeaCommand,
    ) -> Result<Vec<KeaResponse>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        ok(json!({}))
    }

    async fn forward_to_named_stats(&self, _access_point: &AccessPoint) -> Result<Value, Error> {
        Ok(Value::Null)
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_bounds_the_whole_commit() {
    let (inventory, daemons) = inventory_with(&["agent1", "agent2"]).await;
    let agents = Arc::new(SlowAgents {
        delay: Duration::from_secs(6),
        calls: AtomicUsize::new(0),
    });
    let dyn_agents: Arc<dyn ConnectedAgents> = agents.clone();
    let manager = ConfigManager::new(
        Arc::clone(&inventory),
        dyn_agents,
        PullerConfig {
            mutation_timeout: Duration::from_secs(10),
            ..PullerConfig::default()
        },
    );
    let ctx = manager
        .apply_host_add(manager.begin(), &printer(&inventory, &daemons))
        .unwrap();
    assert_eq!(ctx.recipe().len(), 2);

    // Each command fits the timeout on its own; the pair does not.
    let started = tokio::time::Instant::now();
    let err = manager
        .commit(ctx, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Timeout { timeout_secs: 10 }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(12));
    assert_eq!(agents.calls.load(Ordering::SeqCst), 2);
}
