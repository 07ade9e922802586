// ── Services ──
//
// Logical groupings of daemons. The only detected kind is a Kea High
// Availability relationship.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{DaemonId, ServiceId};
use super::machine::DaemonName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HaMode {
    LoadBalancing,
    HotStandby,
    PassiveBackup,
}

/// Advisory HA state reported by `status-get`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HaState {
    #[default]
    Unknown,
    Waiting,
    Syncing,
    Ready,
    LoadBalancing,
    HotStandby,
    PartnerDown,
    Terminated,
    InMaintenance,
}

impl HaState {
    /// Parse a state name; unrecognised names are `Unknown`.
    pub fn parse_lenient(name: &str) -> Self {
        name.trim().to_ascii_lowercase().parse().unwrap_or_default()
    }

    /// States in which a daemon's statistics are authoritative.
    pub fn is_healthy(self) -> bool {
        matches!(
            self,
            Self::LoadBalancing
                | Self::HotStandby
                | Self::Ready
                | Self::Syncing
                | Self::Waiting
                | Self::PartnerDown
        )
    }
}

/// Peer descriptor as configured in an HA relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HaPeerSignature {
    pub name: String,
    pub url: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaService {
    pub ha_type: DaemonName,
    pub mode: HaMode,
    pub relationship: String,
    pub peers: BTreeSet<HaPeerSignature>,
    pub primary_id: Option<DaemonId>,
    pub secondary_id: Option<DaemonId>,
    pub backup_ids: Vec<DaemonId>,
    pub primary_last_state: HaState,
    pub secondary_last_state: HaState,
    pub primary_reachable: bool,
    pub secondary_reachable: bool,
    pub status_collected_at: Option<DateTime<Utc>>,
}

impl HaService {
    pub fn new(
        ha_type: DaemonName,
        mode: HaMode,
        relationship: impl Into<String>,
        peers: BTreeSet<HaPeerSignature>,
    ) -> Self {
        Self {
            ha_type,
            mode,
            relationship: relationship.into(),
            peers,
            primary_id: None,
            secondary_id: None,
            backup_ids: Vec::new(),
            primary_last_state: HaState::Unknown,
            secondary_last_state: HaState::Unknown,
            primary_reachable: false,
            secondary_reachable: false,
            status_collected_at: None,
        }
    }

    /// Remove `daemon_id` from every role.
    pub fn clear_role(&mut self, daemon_id: DaemonId) {
        if self.primary_id == Some(daemon_id) {
            self.primary_id = None;
        }
        if self.secondary_id == Some(daemon_id) {
            self.secondary_id = None;
        }
        self.backup_ids.retain(|id| *id != daemon_id);
    }

    pub fn is_backup(&self, daemon_id: DaemonId) -> bool {
        self.backup_ids.contains(&daemon_id)
    }

    /// Daemon whose statistics count for this relationship.
    pub fn authoritative_daemon(&self) -> Option<DaemonId> {
        let unknown = self.primary_last_state == HaState::Unknown
            && self.secondary_last_state == HaState::Unknown;
        if unknown {
            return self.primary_id.or(self.secondary_id);
        }
        if self.primary_reachable && self.primary_last_state.is_healthy() {
            if let Some(id) = self.primary_id {
                return Some(id);
            }
        }
        if self.secondary_reachable && self.secondary_last_state.is_healthy() {
            if let Some(id) = self.secondary_id {
                return Some(id);
            }
        }
        self.primary_id.or(self.secondary_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub daemons: Vec<DaemonId>,
    pub ha: Option<HaService>,
}

impl Service {
    pub fn has_daemon(&self, daemon_id: DaemonId) -> bool {
        self.daemons.contains(&daemon_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb() -> HaService {
        let mut ha = HaService::new(
            DaemonName::Dhcp4,
            HaMode::LoadBalancing,
            "server1",
            BTreeSet::new(),
        );
        ha.primary_id = Some(DaemonId(1));
        ha.secondary_id = Some(DaemonId(2));
        ha
    }

    #[test]
    fn state_parsing_defaults_to_unknown() {
        assert_eq!(HaState::parse_lenient("partner-down"), HaState::PartnerDown);
        assert_eq!(HaState::parse_lenient("HOT-STANDBY"), HaState::HotStandby);
        assert_eq!(HaState::parse_lenient("communication-recovery"), HaState::Unknown);
    }

    #[test]
    fn unknown_states_pick_primary() {
        assert_eq!(lb().authoritative_daemon(), Some(DaemonId(1)));
    }

    #[test]
    fn unreachable_primary_falls_back_to_healthy_secondary() {
        let mut ha = lb();
        ha.primary_reachable = false;
        ha.primary_last_state = HaState::Unknown;
        ha.secondary_reachable = true;
        ha.secondary_last_state = HaState::PartnerDown;
        assert_eq!(ha.authoritative_daemon(), Some(DaemonId(2)));
    }

    #[test]
    fn nothing_healthy_picks_primary() {
        let mut ha = lb();
        ha.primary_last_state = HaState::Terminated;
        ha.secondary_last_state = HaState::Terminated;
        ha.secondary_reachable = true;
        assert_eq!(ha.authoritative_daemon(), Some(DaemonId(1)));
    }
}
