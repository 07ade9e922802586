#![allow(dead_code, clippy::unwrap_used)]
// Shared fixtures for the puller integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kestrel_agent::{AccessPoint, ConnectedAgents, Error, KeaCommand, KeaResponse};
use serde_json::{Value, json};

use kestrel_core::model::{AppType, DaemonId, DaemonName};
use kestrel_core::{Inventory, KeaConfig, NoopReviews, commit_daemon_config};

// ── Scripted agents ─────────────────────────────────────────────────

type KeaHandler =
    dyn Fn(&AccessPoint, &KeaCommand) -> Result<Vec<KeaResponse>, Error> + Send + Sync;

/// `ConnectedAgents` answering from a test-supplied handler and
/// recording every command it receives.
pub struct FakeAgents {
    kea: Box<KeaHandler>,
    named: Mutex<Value>,
    calls: Mutex<Vec<(String, KeaCommand)>>,
}

impl FakeAgents {
    pub fn new(
        kea: impl Fn(&AccessPoint, &KeaCommand) -> Result<Vec<KeaResponse>, Error>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            kea: Box::new(kea),
            named: Mutex::new(Value::Null),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_named_stats(&self, document: Value) {
        *self.named.lock().unwrap() = document;
    }

    /// Commands received so far, with the access point they went to.
    pub fn calls(&self) -> Vec<(String, KeaCommand)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c.command == command)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ConnectedAgents for FakeAgents {
    async fn forward_to_kea(
        &self,
        access_point: &AccessPoint,
        command: &KeaCommand,
    ) -> Result<Vec<KeaResponse>, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((access_point.to_string(), command.clone()));
        (self.kea)(access_point, command)
    }

    async fn forward_to_named_stats(&self, access_point: &AccessPoint) -> Result<Value, Error> {
        self.calls.lock().unwrap().push((
            access_point.to_string(),
            KeaCommand::new("named-stats"),
        ));
        Ok(self.named.lock().unwrap().clone())
    }
}

// ── Responses ───────────────────────────────────────────────────────

pub fn ok(arguments: Value) -> Result<Vec<KeaResponse>, Error> {
    Ok(vec![KeaResponse {
        result: 0,
        text: None,
        arguments: Some(arguments),
    }])
}

pub fn empty() -> Result<Vec<KeaResponse>, Error> {
    Ok(vec![KeaResponse {
        result: 3,
        text: Some("0 IPv4 host(s) found.".into()),
        arguments: None,
    }])
}

pub fn unsupported() -> Result<Vec<KeaResponse>, Error> {
    Ok(vec![KeaResponse {
        result: 2,
        text: Some("'reservation-get-page' command not supported.".into()),
        arguments: None,
    }])
}

pub fn unreachable() -> Result<Vec<KeaResponse>, Error> {
    Err(Error::Http {
        status: 503,
        url: "http://agent/".into(),
        body: "unavailable".into(),
    })
}

pub fn arg_i64(command: &KeaCommand, key: &str) -> i64 {
    command
        .arguments
        .as_ref()
        .and_then(|a| a.get(key))
        .and_then(Value::as_i64)
        .unwrap_or_default()
}

// ── Inventory fixtures ──────────────────────────────────────────────

/// Register a Kea app with a dhcp4 daemon on its own machine.
pub async fn add_kea_daemon(inventory: &Inventory, machine: &str, control_port: u16) -> DaemonId {
    let mut tx = inventory.begin().await;
    let m = tx.add_machine(machine, 8080).unwrap();
    let app = tx
        .add_app(
            m,
            AppType::Kea,
            &format!("kea@{machine}"),
            vec![AccessPoint::control(machine, control_port)],
        )
        .unwrap();
    let d = tx.add_daemon(app, DaemonName::Dhcp4).unwrap();
    tx.commit();
    d
}

/// A dhcp4 configuration with the given hook libraries and subnets.
pub fn dhcp4_config(hooks: &[&str], subnets: Value, extra_hook: Option<Value>) -> KeaConfig {
    let mut libraries: Vec<Value> = hooks
        .iter()
        .map(|h| json!({"library": format!("/usr/lib/kea/hooks/libdhcp_{h}.so")}))
        .collect();
    if let Some(extra) = extra_hook {
        libraries.push(extra);
    }
    KeaConfig::from_value(json!({
        "Dhcp4": {
            "hooks-libraries": libraries,
            "subnet4": subnets,
        }
    }))
    .unwrap()
}

pub async fn commit(inventory: &Inventory, daemon_id: DaemonId, config: KeaConfig) {
    commit_daemon_config(inventory, daemon_id, config, &NoopReviews)
        .await
        .unwrap();
}

pub fn ha_hook(this: &str, mode: &str) -> Value {
    json!({
        "library": "/usr/lib/kea/hooks/libdhcp_ha.so",
        "parameters": {
            "high-availability": [{
                "this-server-name": this,
                "mode": mode,
                "peers": [
                    {"name": "server1", "url": "http://192.0.2.1:8001/", "role": "primary"},
                    {"name": "server2", "url": "http://192.0.2.2:8001/", "role": "secondary"}
                ]
            }]
        }
    })
}
