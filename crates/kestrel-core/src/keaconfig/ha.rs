// ── HA hook library parameters ──
//
// `libdhcp_ha.so` takes a `high-availability` list. Older configurations
// hold a single relationship; hub-and-spoke servers list one entry per
// relationship, each with its own `this-server-name`.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::warn;

use crate::model::{HaMode, HaPeerSignature};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaPeer {
    pub name: String,
    pub url: String,
    pub role: String,
    pub auto_failover: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaRelationship {
    pub this_server_name: String,
    pub mode: HaMode,
    pub peers: Vec<HaPeer>,
}

impl HaRelationship {
    pub fn this_peer(&self) -> Option<&HaPeer> {
        self.peers.iter().find(|p| p.name == self.this_server_name)
    }

    /// Role of this server in the relationship.
    pub fn this_role(&self) -> Option<&str> {
        self.this_peer().map(|p| p.role.as_str())
    }

    /// Peer descriptors compared when matching daemons into a service.
    pub fn signature(&self) -> BTreeSet<HaPeerSignature> {
        self.peers
            .iter()
            .map(|p| HaPeerSignature {
                name: p.name.clone(),
                url: p.url.clone(),
                role: p.role.clone(),
            })
            .collect()
    }

    /// Relationship name: the primary's name, else the first peer's.
    pub fn name(&self) -> String {
        self.peers
            .iter()
            .find(|p| p.role == "primary")
            .or_else(|| self.peers.first())
            .map(|p| p.name.clone())
            .unwrap_or_else(|| self.this_server_name.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let this_server_name = obj.get("this-server-name")?.as_str()?.to_owned();
        let mode: HaMode = obj
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("load-balancing")
            .parse()
            .ok()?;
        let peers = obj
            .get("peers")?
            .as_array()?
            .iter()
            .filter_map(|peer| {
                let p = peer.as_object()?;
                Some(HaPeer {
                    name: p.get("name")?.as_str()?.to_owned(),
                    url: p.get("url")?.as_str()?.to_owned(),
                    role: p.get("role")?.as_str()?.to_owned(),
                    auto_failover: p
                        .get("auto-failover")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                })
            })
            .collect();
        Some(Self {
            this_server_name,
            mode,
            peers,
        })
    }
}

/// Parse the HA hook parameters. Malformed entries are logged and skipped.
pub fn parse_relationships(parameters: &Value) -> Vec<HaRelationship> {
    let entries: Vec<&Value> = match parameters.get("high-availability") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => return Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let rel = HaRelationship::from_value(entry);
            if rel.is_none() {
                warn!("skipping malformed high-availability relationship");
            }
            rel
        })
        .collect()
}
