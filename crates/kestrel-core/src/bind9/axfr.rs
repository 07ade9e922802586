// ── Zone transfer credentials ──
//
// Resolves the address and TSIG key a client needs to AXFR a zone from
// the server described by a configuration: the effective allow-transfer
// clause decides the port, listen-on clauses decide the address, and
// match-clients (or allow-transfer) decides the key.

use super::Bind9Error;
use super::acl::{FlatElement, FlatKind};
use super::ast::{
    AllowTransfer, AmlKeyword, Bind9Config, DEFAULT_VIEW, KeyStatement, ListenOn, Options,
    Statement, View, Zone, zone_names_match,
};

const DEFAULT_TRANSFER_PORT: u16 = 53;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneKey {
    pub name: String,
    pub algorithm: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxfrCredentials {
    pub host: String,
    pub port: u16,
    pub key: Option<ZoneKey>,
}

impl AxfrCredentials {
    /// `host:port`, with IPv6 hosts bracketed.
    pub fn address(&self) -> String {
        format_address(&self.host, self.port)
    }
}

pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl Bind9Config {
    pub fn options(&self) -> Option<&Options> {
        self.statements.iter().find_map(|s| match s {
            Statement::Options(o) => Some(o),
            _ => None,
        })
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.statements.iter().filter_map(|s| match s {
            Statement::View(v) => Some(v),
            _ => None,
        })
    }

    pub fn view(&self, name: &str) -> Option<&View> {
        self.views().find(|v| v.name == name)
    }

    /// Zones declared outside any view.
    pub fn top_level_zones(&self) -> impl Iterator<Item = &Zone> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Zone(z) => Some(z),
            _ => None,
        })
    }

    /// Zone lookup; `DEFAULT_VIEW` selects top-level zones.
    pub fn zone(&self, view: &str, zone: &str) -> Option<&Zone> {
        if view == DEFAULT_VIEW {
            self.top_level_zones()
                .find(|z| zone_names_match(&z.name, zone))
        } else {
            self.view(view)?.zone(zone)
        }
    }

    pub fn key(&self, name: &str) -> Option<&KeyStatement> {
        self.statements.iter().find_map(|s| match s {
            Statement::Key(k) if k.name == name => Some(k),
            _ => None,
        })
    }

    /// Zone clause, else view clause, else the global option.
    pub fn effective_allow_transfer(&self, view: &str, zone: &str) -> Option<&AllowTransfer> {
        if let Some(at) = self.zone(view, zone).and_then(Zone::allow_transfer) {
            return Some(at);
        }
        if view != DEFAULT_VIEW {
            if let Some(at) = self.view(view).and_then(View::allow_transfer) {
                return Some(at);
            }
        }
        self.options().and_then(Options::allow_transfer)
    }

    /// TSIG key guarding transfers of the zone, if any.
    pub fn get_zone_key(&self, view: &str, zone: &str) -> Result<Option<ZoneKey>, Bind9Error> {
        let match_clients = if view == DEFAULT_VIEW {
            None
        } else {
            self.view(view).and_then(View::match_clients)
        };
        let list = match match_clients {
            Some(list) => list,
            None => match self.effective_allow_transfer(view, zone) {
                Some(at) => &at.aml,
                None => return Ok(None),
            },
        };
        let flat = self.expand_aml(list)?;
        let Some(name) = flat.iter().find_map(|e| match &e.kind {
            FlatKind::Key(name) if !e.negated => Some(name.clone()),
            _ => None,
        }) else {
            return Ok(None);
        };
        let key = self
            .key(&name)
            .ok_or_else(|| Bind9Error::KeyNotFound { name: name.clone() })?;
        match (&key.algorithm, &key.secret) {
            (Some(algorithm), Some(secret)) => Ok(Some(ZoneKey {
                name,
                algorithm: algorithm.clone(),
                secret: secret.clone(),
            })),
            _ => Err(Bind9Error::KeyNotFound { name }),
        }
    }

    /// Address and key for transferring `zone` in `view`.
    pub fn get_axfr_credentials(
        &self,
        view: &str,
        zone: &str,
    ) -> Result<AxfrCredentials, Bind9Error> {
        let disabled = || Bind9Error::AllowTransferDisabled {
            view: view.to_owned(),
            zone: zone.to_owned(),
        };
        let at = self.effective_allow_transfer(view, zone).ok_or_else(disabled)?;
        let transfer = self.expand_aml(&at.aml)?;
        if transfer_disabled(&transfer) {
            return Err(disabled());
        }

        let port = at.port.unwrap_or(DEFAULT_TRANSFER_PORT);
        let listeners: Vec<(bool, &ListenOn)> = self
            .options()
            .map(|o| o.listeners().collect())
            .unwrap_or_default();

        let host = if listeners.is_empty() {
            if port != DEFAULT_TRANSFER_PORT {
                return Err(Bind9Error::ListenerMismatch { port });
            }
            "127.0.0.1".to_owned()
        } else {
            select_listener(&listeners, port, &transfer)
                .ok_or(Bind9Error::ListenerMismatch { port })?
        };

        Ok(AxfrCredentials {
            host,
            port,
            key: self.get_zone_key(view, zone)?,
        })
    }
}

/// Lists matching nobody: a bare `none`, a negated `any`, only negated
/// keys, or nothing at all.
fn transfer_disabled(flat: &[FlatElement]) -> bool {
    if flat.is_empty() {
        return true;
    }
    let bare_none = flat
        .iter()
        .any(|e| !e.negated && e.kind == FlatKind::Keyword(AmlKeyword::None));
    let negated_any = flat
        .iter()
        .any(|e| e.negated && e.kind == FlatKind::Keyword(AmlKeyword::Any));
    let only_negated_keys = flat
        .iter()
        .all(|e| e.negated && matches!(e.kind, FlatKind::Key(_)));
    bare_none || negated_any || only_negated_keys
}

fn loopback(v6: bool) -> &'static str {
    if v6 { "::1" } else { "127.0.0.1" }
}

fn has_loopback(v6: bool, listen: &ListenOn) -> bool {
    if v6 {
        listen.aml.has_address("::1") || listen.aml.has_address("::")
    } else {
        listen.aml.has_address("127.0.0.1") || listen.aml.has_address("0.0.0.0")
    }
}

fn rank(v6: bool, listen: &ListenOn) -> u8 {
    if !v6 && has_loopback(false, listen) {
        0
    } else if v6 && has_loopback(true, listen) {
        1
    } else if listen.aml.has_keyword(AmlKeyword::Any) {
        2
    } else {
        3
    }
}

fn select_listener(
    listeners: &[(bool, &ListenOn)],
    port: u16,
    transfer: &[FlatElement],
) -> Option<String> {
    let mut candidates: Vec<&(bool, &ListenOn)> = listeners
        .iter()
        .filter(|(_, l)| l.port.unwrap_or(DEFAULT_TRANSFER_PORT) == port)
        .filter(|(_, l)| !l.aml.has_keyword(AmlKeyword::None))
        .collect();
    candidates.sort_by_key(|(v6, l)| rank(*v6, l));

    let refused = |addr: &str| {
        transfer
            .iter()
            .any(|e| e.negated && e.kind == FlatKind::Address(addr.to_owned()))
    };

    candidates.into_iter().find_map(|(v6, listen)| {
        let mut options: Vec<&str> = Vec::new();
        if has_loopback(*v6, listen)
            || listen.aml.has_keyword(AmlKeyword::Any)
            || listen.aml.has_keyword(AmlKeyword::Localhost)
        {
            options.push(loopback(*v6));
        }
        options.extend(listen.aml.addresses().filter(|a| !a.contains('/')));
        options
            .into_iter()
            .find(|a| !refused(a))
            .map(str::to_owned)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(text: &str) -> Bind9Config {
        Bind9Config::parse_str(text).unwrap()
    }

    #[test]
    fn loopback_preferred_at_matching_port() {
        let cfg = config(
            r#"options {
                 allow-transfer port 853 { key trusted-key; };
                 listen-on port 853 { 192.0.2.1; 127.0.0.1; };
                 listen-on-v6 port 54 { 2001:db8:1::1; };
               };
               key "trusted-key" { algorithm hmac-sha256; secret "VOjU="; };"#,
        );
        let creds = cfg.get_axfr_credentials(DEFAULT_VIEW, "example.com").unwrap();
        assert_eq!(creds.address(), "127.0.0.1:853");
        let key = creds.key.unwrap();
        assert_eq!(key.name, "trusted-key");
        assert_eq!(key.algorithm, "hmac-sha256");
        assert_eq!(key.secret, "VOjU=");
    }

    #[test]
    fn ipv6_loopback_when_only_v6_listener_matches() {
        let cfg = config(
            r#"options {
                 allow-transfer port 853 { key k; };
                 listen-on port 54 { 127.0.0.1; };
                 listen-on-v6 port 853 { 2001:db8:1::1; ::1; };
               };
               key k { algorithm hmac-sha256; secret "abc"; };"#,
        );
        let creds = cfg.get_axfr_credentials(DEFAULT_VIEW, "example.com").unwrap();
        assert_eq!(creds.address(), "[::1]:853");
    }

    #[test]
    fn disabled_without_allow_transfer() {
        let cfg = config("options { listen-on { 127.0.0.1; }; };");
        assert!(matches!(
            cfg.get_axfr_credentials(DEFAULT_VIEW, "example.com"),
            Err(Bind9Error::AllowTransferDisabled { .. })
        ));
    }

    #[test]
    fn disabled_forms() {
        for list in ["{ none; }", "{ !any; }", "{ !key k; }", "{ }"] {
            let cfg = config(&format!("options {{ allow-transfer {list}; }};"));
            assert!(
                matches!(
                    cfg.get_axfr_credentials(DEFAULT_VIEW, "z"),
                    Err(Bind9Error::AllowTransferDisabled { .. })
                ),
                "{list}"
            );
        }
    }

    #[test]
    fn defaults_to_loopback_port_53() {
        let cfg = config("options { allow-transfer { any; }; };");
        let creds = cfg.get_axfr_credentials(DEFAULT_VIEW, "z").unwrap();
        assert_eq!(creds.address(), "127.0.0.1:53");
        assert_eq!(creds.key, None);
    }

    #[test]
    fn port_without_listener_is_mismatch() {
        let cfg = config(
            "options { allow-transfer port 853 { any; }; listen-on port 53 { 127.0.0.1; }; };",
        );
        let err = cfg.get_axfr_credentials(DEFAULT_VIEW, "z").unwrap_err();
        assert_eq!(
            err.to_string(),
            "allow-transfer port 853 does not match any listen-on setting"
        );
    }

    #[test]
    fn negated_address_is_skipped() {
        let cfg = config(
            "options { allow-transfer { !192.0.2.1; any; }; listen-on { 192.0.2.1; 192.0.2.2; }; };",
        );
        let creds = cfg.get_axfr_credentials(DEFAULT_VIEW, "z").unwrap();
        assert_eq!(creds.address(), "192.0.2.2:53");
    }

    #[test]
    fn zone_clause_overrides_view_and_options() {
        let cfg = config(
            r#"options { allow-transfer { none; }; };
               key k { algorithm hmac-sha256; secret "s"; };
               view v { allow-transfer { none; };
                        zone "example.org" { allow-transfer { key k; }; }; };"#,
        );
        let creds = cfg.get_axfr_credentials("v", "example.org").unwrap();
        assert_eq!(creds.key.unwrap().name, "k");
        assert!(cfg.get_axfr_credentials("v", "other.org").is_err());
    }

    #[test]
    fn acl_cycle_in_match_clients() {
        let cfg = config(
            "acl acl1 { acl2; }; acl acl2 { acl3; }; acl acl3 { acl1; };
             view trusted { match-clients { acl1; }; };",
        );
        let err = cfg.get_zone_key("trusted", "example.com").unwrap_err();
        assert!(matches!(err, Bind9Error::RecursionLimit { .. }));
    }

    #[test]
    fn missing_key_definition() {
        let cfg = config("options { allow-transfer { key nokey; }; };");
        assert!(matches!(
            cfg.get_axfr_credentials(DEFAULT_VIEW, "z"),
            Err(Bind9Error::KeyNotFound { .. })
        ));
    }

    #[test]
    fn resolution_is_idempotent() {
        let cfg = config(
            r#"options { allow-transfer port 853 { key k; };
                         listen-on port 853 { any; }; };
               key k { algorithm hmac-sha256; secret "s"; };"#,
        );
        let first = cfg.get_axfr_credentials(DEFAULT_VIEW, "z").unwrap();
        let second = cfg.get_axfr_credentials(DEFAULT_VIEW, "z").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.address(), "127.0.0.1:853");
    }
}
