// ── Kea configuration model ──
//
// A Kea configuration is kept as its JSON document (key order preserved)
// with typed accessors for the parts the pullers and the service detector
// need. The SHA-256 digest of the compact serialisation identifies a
// configuration revision.

pub mod ha;
pub mod pools;
pub mod reservation;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use tracing::warn;

use crate::error::{CoreError, Result};

pub use ha::{HaPeer, HaRelationship};
pub use pools::{AddressPool, PrefixPool};
pub use reservation::Reservation;

/// Top-level key naming the daemon a configuration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum KeaRoot {
    Dhcp4,
    Dhcp6,
    #[strum(serialize = "Control-agent")]
    ControlAgent,
    D2,
}

impl KeaRoot {
    const ALL: [KeaRoot; 4] = [Self::Dhcp4, Self::Dhcp6, Self::ControlAgent, Self::D2];

    fn subnet_key(self) -> Option<&'static str> {
        match self {
            Self::Dhcp4 => Some("subnet4"),
            Self::Dhcp6 => Some("subnet6"),
            _ => None,
        }
    }

    pub fn option_space(self) -> &'static str {
        match self {
            Self::Dhcp6 => "dhcp6",
            _ => "dhcp4",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookLibrary {
    pub library: String,
    pub parameters: Option<Value>,
}

impl HookLibrary {
    /// Short name: `/usr/lib/kea/hooks/libdhcp_host_cmds.so` is `host_cmds`.
    pub fn short_name(&self) -> &str {
        let file = self.library.rsplit('/').next().unwrap_or(&self.library);
        let file = file.split('.').next().unwrap_or(file);
        file.strip_prefix("libdhcp_").unwrap_or(file)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeaSubnet {
    pub id: i64,
    pub prefix: String,
    pub shared_network: Option<String>,
    pub pools: Vec<AddressPool>,
    pub pd_pools: Vec<PrefixPool>,
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeaSharedNetwork {
    pub name: String,
    pub subnets: Vec<KeaSubnet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDef {
    pub name: String,
    pub code: u16,
    pub space: String,
    pub record_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeaConfig {
    root: KeaRoot,
    document: Value,
    digest: String,
}

impl KeaConfig {
    /// Parse a configuration, accepting comments Kea itself tolerates.
    pub fn from_json(text: &str) -> Result<Self> {
        let stripped = strip_comments(text);
        let document: Value = serde_json::from_str(&stripped)?;
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<Self> {
        let obj = document
            .as_object()
            .ok_or_else(|| CoreError::malformed("Kea configuration is not an object"))?;
        let root = KeaRoot::ALL
            .into_iter()
            .find(|root| obj.get(&root.to_string()).is_some_and(Value::is_object))
            .ok_or_else(|| {
                CoreError::malformed("Kea configuration has no Dhcp4, Dhcp6, Control-agent or D2 root")
            })?;
        let digest = hex::encode(Sha256::digest(document.to_string().as_bytes()));
        Ok(Self {
            root,
            document,
            digest,
        })
    }

    pub fn root(&self) -> KeaRoot {
        self.root
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn to_json_string(&self) -> String {
        self.document.to_string()
    }

    fn root_object(&self) -> Option<&Map<String, Value>> {
        self.document.get(self.root.to_string())?.as_object()
    }

    fn root_list(&self, key: &str) -> &[Value] {
        self.root_object()
            .and_then(|obj| obj.get(key))
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice)
    }

    // ── Subnets ──────────────────────────────────────────────────────

    /// All subnets, top-level first, then those inside shared networks.
    pub fn subnets(&self) -> Vec<KeaSubnet> {
        let Some(key) = self.root.subnet_key() else {
            return Vec::new();
        };
        let mut subnets: Vec<KeaSubnet> = self
            .root_list(key)
            .iter()
            .filter_map(|s| self.parse_subnet(s, None))
            .collect();
        subnets.extend(self.shared_networks().into_iter().flat_map(|sn| sn.subnets));
        subnets
    }

    pub fn shared_networks(&self) -> Vec<KeaSharedNetwork> {
        let Some(key) = self.root.subnet_key() else {
            return Vec::new();
        };
        self.root_list("shared-networks")
            .iter()
            .filter_map(|sn| {
                let name = sn.get("name")?.as_str()?.to_owned();
                let subnets = sn
                    .get(key)
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|s| self.parse_subnet(s, Some(&name)))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(KeaSharedNetwork { name, subnets })
            })
            .collect()
    }

    fn parse_subnet(&self, value: &Value, shared_network: Option<&str>) -> Option<KeaSubnet> {
        let id = value.get("id").and_then(Value::as_i64)?;
        let prefix = value.get("subnet").and_then(Value::as_str)?.to_owned();

        let pools = value
            .get("pools")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| p.get("pool").and_then(Value::as_str))
                    .filter_map(|p| match AddressPool::parse(p) {
                        Ok(pool) => Some(pool),
                        Err(e) => {
                            warn!(subnet = %prefix, error = %e, "skipping invalid pool");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let pd_pools = value
            .get("pd-pools")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| {
                        Some(PrefixPool {
                            prefix: p.get("prefix")?.as_str()?.parse().ok()?,
                            prefix_len: u8::try_from(p.get("prefix-len")?.as_u64()?).ok()?,
                            delegated_len: u8::try_from(p.get("delegated-len")?.as_u64()?)
                                .ok()?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let reservations = value
            .get("reservations")
            .and_then(Value::as_array)
            .map(|items| self.parse_reservations(items))
            .unwrap_or_default();

        Some(KeaSubnet {
            id,
            prefix,
            shared_network: shared_network.map(str::to_owned),
            pools,
            pd_pools,
            reservations,
        })
    }

    fn parse_reservations(&self, items: &[Value]) -> Vec<Reservation> {
        items
            .iter()
            .filter_map(
                |r| match Reservation::from_value(r, self.root.option_space()) {
                    Ok(res) => Some(res),
                    Err(e) => {
                        warn!(error = %e, "skipping invalid configured reservation");
                        None
                    }
                },
            )
            .collect()
    }

    /// Global reservations.
    pub fn reservations(&self) -> Vec<Reservation> {
        self.parse_reservations(self.root_list("reservations"))
    }

    // ── Hooks ────────────────────────────────────────────────────────

    pub fn hook_libraries(&self) -> Vec<HookLibrary> {
        self.root_list("hooks-libraries")
            .iter()
            .filter_map(|h| {
                Some(HookLibrary {
                    library: h.get("library")?.as_str()?.to_owned(),
                    parameters: h.get("parameters").cloned(),
                })
            })
            .collect()
    }

    pub fn hook_library(&self, name: &str) -> Option<HookLibrary> {
        self.hook_libraries()
            .into_iter()
            .find(|h| h.short_name() == name)
    }

    pub fn has_hook_library(&self, name: &str) -> bool {
        self.hook_library(name).is_some()
    }

    /// HA relationships configured through `libdhcp_ha.so`.
    pub fn ha_relationships(&self) -> Vec<HaRelationship> {
        self.hook_library("ha")
            .and_then(|h| h.parameters)
            .map(|params| ha::parse_relationships(&params))
            .unwrap_or_default()
    }

    pub fn option_defs(&self) -> Vec<OptionDef> {
        self.root_list("option-def")
            .iter()
            .filter_map(|d| {
                Some(OptionDef {
                    name: d.get("name")?.as_str()?.to_owned(),
                    code: u16::try_from(d.get("code")?.as_u64()?).ok()?,
                    space: d
                        .get("space")
                        .and_then(Value::as_str)
                        .unwrap_or(self.root.option_space())
                        .to_owned(),
                    record_type: d
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("binary")
                        .to_owned(),
                })
            })
            .collect()
    }
}

/// Remove `//`, `#` and `/* */` comments that are not inside strings.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '#' => skip_line(&mut chars, &mut out),
            '/' if chars.peek() == Some(&'/') => skip_line(&mut chars, &mut out),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) {
    for c in chars.by_ref() {
        if c == '\n' {
            out.push('\n');
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DHCP4: &str = r#"{
        // Kea accepts comments
        "Dhcp4": {
            # and shell style
            "hooks-libraries": [
                {"library": "/usr/lib/kea/hooks/libdhcp_host_cmds.so"},
                {"library": "/usr/lib/kea/hooks/libdhcp_ha.so", "parameters": {
                    "high-availability": [{
                        "this-server-name": "server1",
                        "mode": "load-balancing",
                        "peers": [
                            {"name": "server1", "url": "http://192.0.2.1:8000/", "role": "primary"},
                            {"name": "server2", "url": "http://192.0.2.2:8000/", "role": "secondary"}
                        ]
                    }]
                }}
            ],
            /* block
               comment */
            "option-def": [{"name": "foo", "code": 222, "type": "uint32"}],
            "reservations": [{"hw-address": "01:02:03:04:05:06", "hostname": "global"}],
            "subnet4": [{
                "id": 1,
                "subnet": "192.0.2.0/24",
                "pools": [{"pool": "192.0.2.10 - 192.0.2.100"}],
                "reservations": [{"hw-address": "0a:0b:0c:0d:0e:0f", "ip-address": "192.0.2.200"}]
            }],
            "shared-networks": [{
                "name": "frog",
                "subnet4": [{"id": 2, "subnet": "198.51.100.0/24", "comment": "http://x"}]
            }]
        }
    }"#;

    #[test]
    fn strips_comments_outside_strings() {
        let text = "{\"a\": \"// not a comment\", # gone\n\"b\": 1 /* x */}";
        let value: Value = serde_json::from_str(&strip_comments(text)).unwrap();
        assert_eq!(value["a"], "// not a comment");
        assert_eq!(value["b"], 1);
    }

    #[test]
    fn detects_root() {
        let cfg = KeaConfig::from_json(DHCP4).unwrap();
        assert_eq!(cfg.root(), KeaRoot::Dhcp4);
        let ca = KeaConfig::from_json(r#"{"Control-agent": {"http-port": 8000}}"#).unwrap();
        assert_eq!(ca.root(), KeaRoot::ControlAgent);
        assert!(KeaConfig::from_json(r#"{"Logging": {}}"#).is_err());
    }

    #[test]
    fn lists_subnets_with_shared_networks() {
        let cfg = KeaConfig::from_json(DHCP4).unwrap();
        let subnets = cfg.subnets();
        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets[0].prefix, "192.0.2.0/24");
        assert_eq!(subnets[0].pools.len(), 1);
        assert_eq!(subnets[0].reservations.len(), 1);
        assert_eq!(subnets[1].shared_network.as_deref(), Some("frog"));
        assert_eq!(cfg.shared_networks()[0].name, "frog");
    }

    #[test]
    fn hook_queries() {
        let cfg = KeaConfig::from_json(DHCP4).unwrap();
        assert!(cfg.has_hook_library("host_cmds"));
        assert!(!cfg.has_hook_library("lease_cmds"));
        let rels = cfg.ha_relationships();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].this_role(), Some("primary"));
    }

    #[test]
    fn global_reservations_and_option_defs() {
        let cfg = KeaConfig::from_json(DHCP4).unwrap();
        assert_eq!(cfg.reservations()[0].hostname.as_deref(), Some("global"));
        let defs = cfg.option_defs();
        assert_eq!(defs[0].code, 222);
        assert_eq!(defs[0].space, "dhcp4");
    }

    #[test]
    fn round_trip_preserves_key_order_and_digest() {
        let cfg = KeaConfig::from_json(DHCP4).unwrap();
        let again = KeaConfig::from_json(&cfg.to_json_string()).unwrap();
        assert_eq!(cfg.to_json_string(), again.to_json_string());
        assert_eq!(cfg.digest(), again.digest());
        let keys: Vec<&String> = cfg.document()["Dhcp4"].as_object().unwrap().keys().collect();
        assert_eq!(keys[0], "hooks-libraries");
    }
}
