// ── Settings ──
//
// Process-wide typed settings. Puller intervals are read from here at
// every tick so operators can retune a running server.

use serde::{Deserialize, Serialize};

pub const KEA_HOSTS_PULLER_INTERVAL: &str = "kea_hosts_puller_interval";
pub const KEA_STATS_PULLER_INTERVAL: &str = "kea_stats_puller_interval";
pub const KEA_STATUS_PULLER_INTERVAL: &str = "kea_status_puller_interval";
pub const BIND9_STATS_PULLER_INTERVAL: &str = "bind9_stats_puller_interval";
pub const METRICS_COLLECTOR_INTERVAL: &str = "metrics_collector_interval";

/// Interval settings and their default values in seconds.
pub const INTERVAL_DEFAULTS: &[(&str, i64)] = &[
    (KEA_HOSTS_PULLER_INTERVAL, 60),
    (KEA_STATS_PULLER_INTERVAL, 60),
    (KEA_STATUS_PULLER_INTERVAL, 30),
    (BIND9_STATS_PULLER_INTERVAL, 60),
    (METRICS_COLLECTOR_INTERVAL, 10),
];

pub fn default_interval(key: &str) -> Option<i64> {
    INTERVAL_DEFAULTS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, secs)| *secs)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SettingValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl SettingValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_defaults_cover_recognised_settings() {
        assert_eq!(default_interval(KEA_HOSTS_PULLER_INTERVAL), Some(60));
        assert_eq!(default_interval("unknown"), None);
    }

    #[test]
    fn string_setting_coerces_to_int() {
        assert_eq!(SettingValue::Str(" 30 ".into()).as_int(), Some(30));
        assert_eq!(SettingValue::Bool(true).as_int(), None);
    }
}
