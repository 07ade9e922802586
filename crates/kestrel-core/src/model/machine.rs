// ── Machines, apps and daemons ──
//
// Registration creates these rows; pullers only read them, except for the
// per-daemon runtime fields (RPS values, BIND 9 cache statistics).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kestrel_agent::{AccessPoint, AccessPointKind, KeaService};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{AppId, DaemonId, MachineId};
use super::subnet::Family;
use crate::bind9::Bind9Config;
use crate::keaconfig::KeaConfig;

/// Host running an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub address: String,
    pub agent_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AppType {
    Kea,
    Bind9,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub machine_id: MachineId,
    pub kind: AppType,
    pub name: String,
    pub access_points: Vec<AccessPoint>,
}

impl App {
    /// The single control access point of the app.
    pub fn control_access_point(&self) -> Option<&AccessPoint> {
        self.access_points
            .iter()
            .find(|ap| ap.kind == AccessPointKind::Control)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DaemonName {
    Dhcp4,
    Dhcp6,
    Ca,
    D2,
    Named,
}

impl DaemonName {
    pub fn kea_service(self) -> Option<KeaService> {
        match self {
            Self::Dhcp4 => Some(KeaService::Dhcp4),
            Self::Dhcp6 => Some(KeaService::Dhcp6),
            Self::Ca => Some(KeaService::Ca),
            Self::D2 => Some(KeaService::D2),
            Self::Named => None,
        }
    }

    /// Address family served by a DHCP daemon.
    pub fn family(self) -> Option<Family> {
        match self {
            Self::Dhcp4 => Some(Family::V4),
            Self::Dhcp6 => Some(Family::V6),
            _ => None,
        }
    }

    pub fn is_dhcp(self) -> bool {
        self.family().is_some()
    }
}

/// Parsed configuration of a daemon.
#[derive(Debug, Clone)]
pub enum DaemonConfig {
    Kea(Arc<KeaConfig>),
    Bind9(Arc<Bind9Config>),
}

/// Last computed response rates of a Kea DHCP daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RpsValues {
    pub short: f64,
    pub long: f64,
}

/// Per-view cache counters reported by a BIND 9 statistics channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub query_hits: u64,
    pub query_misses: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bind9Stats {
    pub views: BTreeMap<String, ViewStats>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Daemon {
    pub id: DaemonId,
    pub app_id: AppId,
    pub name: DaemonName,
    pub active: bool,
    pub config: Option<DaemonConfig>,
    pub rps: RpsValues,
    pub bind9_stats: Option<Bind9Stats>,
}

impl Daemon {
    pub fn new(id: DaemonId, app_id: AppId, name: DaemonName) -> Self {
        Self {
            id,
            app_id,
            name,
            active: true,
            config: None,
            rps: RpsValues::default(),
            bind9_stats: None,
        }
    }

    pub fn kea_config(&self) -> Option<&Arc<KeaConfig>> {
        match &self.config {
            Some(DaemonConfig::Kea(cfg)) => Some(cfg),
            _ => None,
        }
    }

    pub fn bind9_config(&self) -> Option<&Arc<Bind9Config>> {
        match &self.config {
            Some(DaemonConfig::Bind9(cfg)) => Some(cfg),
            _ => None,
        }
    }

    /// Digest of the stored configuration, if any.
    pub fn config_digest(&self) -> Option<String> {
        match &self.config {
            Some(DaemonConfig::Kea(cfg)) => Some(cfg.digest().to_owned()),
            Some(DaemonConfig::Bind9(cfg)) => Some(cfg.digest()),
            None => None,
        }
    }
}
