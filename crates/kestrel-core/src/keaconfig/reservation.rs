// ── Host reservations in Kea JSON ──
//
// One shape serves both configuration reservations and the `hosts` list of
// `reservation-get-page`.

use serde_json::{Map, Value, json};

use crate::error::{CoreError, Result};
use crate::model::{DaemonId, DataSource, DhcpOption, HostIdentifier, IpReservation, LocalHost};

/// Identifier types Kea accepts in a reservation.
pub const IDENTIFIER_KINDS: &[&str] = &["hw-address", "duid", "circuit-id", "client-id", "flex-id"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reservation {
    pub subnet_id: Option<i64>,
    pub identifiers: Vec<HostIdentifier>,
    pub ip_addresses: Vec<String>,
    pub prefixes: Vec<String>,
    pub hostname: Option<String>,
    pub client_classes: Vec<String>,
    pub options: Vec<DhcpOption>,
    pub next_server: Option<String>,
    pub server_hostname: Option<String>,
    pub boot_file_name: Option<String>,
}

impl Reservation {
    /// Parse one reservation. `default_space` applies to options without a
    /// `space` member (`dhcp4` or `dhcp6`).
    pub fn from_value(value: &Value, default_space: &str) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::malformed("reservation is not an object"))?;

        let identifiers: Vec<HostIdentifier> = IDENTIFIER_KINDS
            .iter()
            .filter_map(|kind| {
                obj.get(*kind).and_then(Value::as_str).map(|v| HostIdentifier {
                    kind: (*kind).to_owned(),
                    value: v.trim().to_ascii_lowercase(),
                })
            })
            .collect();
        if identifiers.is_empty() {
            return Err(CoreError::malformed("reservation has no identifier"));
        }

        let mut ip_addresses = Vec::new();
        if let Some(addr) = obj.get("ip-address").and_then(Value::as_str) {
            ip_addresses.push(addr.to_owned());
        }
        ip_addresses.extend(string_list(obj, "ip-addresses"));

        let options = match obj.get("option-data") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| parse_option(item, default_space))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
            Some(_) => return Err(CoreError::malformed("option-data is not a list")),
        };

        Ok(Self {
            subnet_id: obj
                .get("subnet-id")
                .or_else(|| obj.get("subnet-id4"))
                .or_else(|| obj.get("subnet-id6"))
                .and_then(Value::as_i64),
            identifiers,
            ip_addresses,
            prefixes: string_list(obj, "prefixes"),
            hostname: non_empty_str(obj, "hostname"),
            client_classes: string_list(obj, "client-classes"),
            options,
            next_server: non_empty_str(obj, "next-server"),
            server_hostname: non_empty_str(obj, "server-hostname"),
            boot_file_name: non_empty_str(obj, "boot-file-name"),
        })
    }

    pub fn ip_reservations(&self) -> Vec<IpReservation> {
        self.ip_addresses
            .iter()
            .chain(self.prefixes.iter())
            .map(|address| IpReservation {
                address: address.clone(),
            })
            .collect()
    }

    pub fn local_host(&self, daemon_id: DaemonId, source: DataSource) -> LocalHost {
        LocalHost {
            hostname: self.hostname.clone(),
            client_classes: self.client_classes.clone(),
            options: self.options.clone(),
            next_server: self.next_server.clone(),
            server_hostname: self.server_hostname.clone(),
            boot_file_name: self.boot_file_name.clone(),
            ..LocalHost::new(daemon_id, source)
        }
    }
}

fn parse_option(item: &Value, default_space: &str) -> Result<DhcpOption> {
    let obj = item
        .as_object()
        .ok_or_else(|| CoreError::malformed("option-data entry is not an object"))?;
    let code = obj
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok());
    let name = obj.get("name").and_then(Value::as_str).map(str::to_owned);
    if code.is_none() && name.is_none() {
        return Err(CoreError::malformed("option-data entry has neither code nor name"));
    }
    Ok(DhcpOption {
        code,
        name,
        space: obj
            .get("space")
            .and_then(Value::as_str)
            .unwrap_or(default_space)
            .to_owned(),
        data: obj
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        always_send: obj
            .get("always-send")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Render an option as a Kea `option-data` entry.
pub fn option_to_value(option: &DhcpOption) -> Value {
    let mut obj = Map::new();
    if let Some(code) = option.code {
        obj.insert("code".into(), json!(code));
    }
    if let Some(name) = &option.name {
        obj.insert("name".into(), json!(name));
    }
    obj.insert("space".into(), json!(option.space));
    obj.insert("data".into(), json!(option.data));
    if option.always_send {
        obj.insert("always-send".into(), json!(true));
    }
    Value::Object(obj)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_host() {
        let value = json!({
            "subnet-id": 5,
            "hw-address": "AA:BB:CC:DD:EE:FF",
            "ip-address": "192.0.2.50",
            "hostname": "printer",
            "option-data": [{"code": 3, "data": "192.0.2.1"}],
            "next-server": "0.0.0.0",
            "boot-file-name": ""
        });
        let r = Reservation::from_value(&value, "dhcp4").unwrap();
        assert_eq!(r.subnet_id, Some(5));
        assert_eq!(r.identifiers[0].value, "aa:bb:cc:dd:ee:ff");
        assert_eq!(r.ip_reservations()[0].address, "192.0.2.50");
        assert_eq!(r.options[0].space, "dhcp4");
        assert_eq!(r.boot_file_name, None);
    }

    #[test]
    fn parses_v6_addresses_and_prefixes() {
        let value = json!({
            "duid": "01:02:03",
            "ip-addresses": ["2001:db8::10"],
            "prefixes": ["2001:db8:1::/64"]
        });
        let r = Reservation::from_value(&value, "dhcp6").unwrap();
        let res = r.ip_reservations();
        assert_eq!(res.len(), 2);
        assert!(res[1].is_prefix());
    }

    #[test]
    fn rejects_reservation_without_identifier() {
        let value = json!({"ip-address": "192.0.2.1"});
        assert!(Reservation::from_value(&value, "dhcp4").is_err());
    }
}
