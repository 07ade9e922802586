// ── rndc and statistics channel access ──

use super::ast::{Bind9Config, ControlClause, Controls, Statement, StatisticsChannels};
use super::axfr::format_address;

pub const DEFAULT_RNDC_PORT: u16 = 953;
pub const DEFAULT_STATS_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RndcKey {
    pub name: String,
    pub algorithm: Option<String>,
    pub secret: Option<String>,
}

/// How the agent reaches named's control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RndcAccess {
    /// No `controls` statement: named listens on the loopback default.
    Default { host: String, port: u16 },
    /// `controls { };` or unix-only sockets.
    Disabled,
    Enabled {
        host: String,
        port: u16,
        key: Option<RndcKey>,
    },
}

impl RndcAccess {
    pub fn address(&self) -> Option<String> {
        match self {
            Self::Default { host, port } | Self::Enabled { host, port, .. } => {
                Some(format_address(host, *port))
            }
            Self::Disabled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsChannel {
    pub host: String,
    pub port: u16,
}

impl StatisticsChannel {
    pub fn address(&self) -> String {
        format_address(&self.host, self.port)
    }
}

/// Wildcards are reached through the loopback of their family.
fn connect_host(address: &str) -> String {
    match address {
        "*" | "0.0.0.0" => "127.0.0.1".to_owned(),
        "::" => "::1".to_owned(),
        other => other.to_owned(),
    }
}

impl Bind9Config {
    pub fn controls(&self) -> Option<&Controls> {
        self.statements.iter().find_map(|s| match s {
            Statement::Controls(c) => Some(c),
            _ => None,
        })
    }

    pub fn statistics_channels(&self) -> Option<&StatisticsChannels> {
        self.statements.iter().find_map(|s| match s {
            Statement::StatisticsChannels(c) => Some(c),
            _ => None,
        })
    }

    pub fn rndc_access(&self) -> RndcAccess {
        let Some(controls) = self.controls() else {
            return RndcAccess::Default {
                host: "127.0.0.1".to_owned(),
                port: DEFAULT_RNDC_PORT,
            };
        };
        let inet = controls.clauses.iter().find_map(|c| match c {
            ControlClause::Inet(inet) => Some(inet),
            ControlClause::Unix(_) => None,
        });
        let Some(inet) = inet else {
            return RndcAccess::Disabled;
        };
        let key = inet.keys.first().map(|name| {
            let def = self.key(name);
            RndcKey {
                name: name.clone(),
                algorithm: def.and_then(|k| k.algorithm.clone()),
                secret: def.and_then(|k| k.secret.clone()),
            }
        });
        RndcAccess::Enabled {
            host: connect_host(&inet.address),
            port: inet.port_number().unwrap_or(DEFAULT_RNDC_PORT),
            key,
        }
    }

    /// First inet statistics channel, if one is configured.
    pub fn statistics_channel(&self) -> Option<StatisticsChannel> {
        let inet = self.statistics_channels()?.clauses.first()?;
        Some(StatisticsChannel {
            host: connect_host(&inet.address),
            port: inet.port_number().unwrap_or(DEFAULT_STATS_PORT),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(text: &str) -> Bind9Config {
        Bind9Config::parse_str(text).unwrap()
    }

    #[test]
    fn missing_controls_uses_default() {
        let cfg = config("options { directory \"/var/cache/bind\"; };");
        assert_eq!(cfg.rndc_access().address().as_deref(), Some("127.0.0.1:953"));
    }

    #[test]
    fn empty_controls_disables_rndc() {
        let cfg = config("controls { };");
        assert_eq!(cfg.rndc_access(), RndcAccess::Disabled);
    }

    #[test]
    fn unix_only_controls_disables_rndc() {
        let cfg = config(r#"controls { unix "/run/named.ctl" perm 0600 owner 0 group 0; };"#);
        assert_eq!(cfg.rndc_access(), RndcAccess::Disabled);
    }

    #[test]
    fn inet_control_with_key() {
        let cfg = config(
            r#"key "rndc-key" { algorithm hmac-sha256; secret "c2VjcmV0"; };
               controls { inet * port 5953 allow { localhost; } keys { "rndc-key"; }; };"#,
        );
        match cfg.rndc_access() {
            RndcAccess::Enabled { host, port, key } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 5953);
                let key = key.unwrap();
                assert_eq!(key.name, "rndc-key");
                assert_eq!(key.algorithm.as_deref(), Some("hmac-sha256"));
                assert_eq!(key.secret.as_deref(), Some("c2VjcmV0"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn statistics_channel_defaults_port() {
        let cfg = config("statistics-channels { inet :: allow { any; }; };");
        let channel = cfg.statistics_channel().unwrap();
        assert_eq!(channel.address(), "[::1]:80");
        assert!(config("options { };").statistics_channel().is_none());
    }
}
