// ── Inventory tables ──
//
// The full relational state. Committed state is immutable; a transaction
// works on its own copy and swaps it in on commit.

use chrono::{DateTime, Utc};
use kestrel_agent::{AccessPoint, AccessPointKind};
use num_bigint::BigUint;

use super::table::{Table, WriteCounts};
use crate::error::{CoreError, Result};
use crate::model::setting::default_interval;
use crate::model::{
    App, AppId, AppType, Daemon, DaemonId, DaemonName, Family, Host, HostId, LocalSubnet, Machine,
    MachineId, RpsInterval, Service, ServiceId, SettingValue, SharedNetwork, SharedNetworkId,
    Subnet, SubnetId,
};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub machines: Table<MachineId, Machine>,
    pub apps: Table<AppId, App>,
    pub daemons: Table<DaemonId, Daemon>,
    pub shared_networks: Table<SharedNetworkId, SharedNetwork>,
    pub subnets: Table<SubnetId, Subnet>,
    pub local_subnets: Table<(SubnetId, DaemonId), LocalSubnet>,
    pub hosts: Table<HostId, Host>,
    pub services: Table<ServiceId, Service>,
    pub rps_intervals: Table<(DaemonId, DateTime<Utc>), RpsInterval>,
    pub settings: Table<String, SettingValue>,
    pub secrets: Table<String, Vec<u8>>,
    /// Global statistics by name.
    pub statistics: Table<String, BigUint>,
    next_id: u64,
    host_update_seq: u64,
}

impl Tables {
    /// Allocate a fresh row id, unique across all tables.
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Next value of the host update sequence.
    pub fn next_host_seq(&mut self) -> u64 {
        self.host_update_seq += 1;
        self.host_update_seq
    }

    pub(crate) fn take_writes(&mut self) -> WriteCounts {
        let mut total = WriteCounts::default();
        total.merge(self.machines.take_writes());
        total.merge(self.apps.take_writes());
        total.merge(self.daemons.take_writes());
        total.merge(self.shared_networks.take_writes());
        total.merge(self.subnets.take_writes());
        total.merge(self.local_subnets.take_writes());
        total.merge(self.hosts.take_writes());
        total.merge(self.services.take_writes());
        total.merge(self.rps_intervals.take_writes());
        total.merge(self.settings.take_writes());
        total.merge(self.secrets.take_writes());
        total.merge(self.statistics.take_writes());
        total
    }

    // ── Registration ────────────────────────────────────────────────

    pub fn add_machine(&mut self, address: &str, agent_port: u16) -> Result<MachineId> {
        if self
            .machines
            .values()
            .any(|m| m.address == address && m.agent_port == agent_port)
        {
            return Err(CoreError::conflict(format!(
                "machine {address}:{agent_port} already registered"
            )));
        }
        let id = MachineId(self.next_id());
        self.machines.insert(
            id,
            Machine {
                id,
                address: address.to_owned(),
                agent_port,
            },
        );
        Ok(id)
    }

    pub fn add_app(
        &mut self,
        machine_id: MachineId,
        kind: AppType,
        name: &str,
        access_points: Vec<AccessPoint>,
    ) -> Result<AppId> {
        if !self.machines.contains(&machine_id) {
            return Err(CoreError::not_found("machine", machine_id));
        }
        let controls = access_points
            .iter()
            .filter(|ap| ap.kind == AccessPointKind::Control)
            .count();
        if controls != 1 {
            return Err(CoreError::conflict(format!(
                "app {name} must have exactly one control access point, got {controls}"
            )));
        }
        let id = AppId(self.next_id());
        self.apps.insert(
            id,
            App {
                id,
                machine_id,
                kind,
                name: name.to_owned(),
                access_points,
            },
        );
        Ok(id)
    }

    pub fn add_daemon(&mut self, app_id: AppId, name: DaemonName) -> Result<DaemonId> {
        if !self.apps.contains(&app_id) {
            return Err(CoreError::not_found("app", app_id));
        }
        if self
            .daemons
            .values()
            .any(|d| d.app_id == app_id && d.name == name)
        {
            return Err(CoreError::conflict(format!(
                "daemon {name} already exists in app {app_id}"
            )));
        }
        let id = DaemonId(self.next_id());
        self.daemons.insert(id, Daemon::new(id, app_id, name));
        Ok(id)
    }

    /// Delete an app together with its daemons and everything they own.
    pub fn delete_app(&mut self, app_id: AppId) -> Result<()> {
        if self.apps.remove(&app_id).is_none() {
            return Err(CoreError::not_found("app", app_id));
        }
        let daemons: Vec<DaemonId> = self
            .daemons
            .values()
            .filter(|d| d.app_id == app_id)
            .map(|d| d.id)
            .collect();
        for id in daemons {
            self.delete_daemon(id);
        }
        Ok(())
    }

    fn delete_daemon(&mut self, daemon_id: DaemonId) {
        self.daemons.remove(&daemon_id);
        self.local_subnets.retain(|(_, d), _| *d != daemon_id);
        self.rps_intervals.retain(|(d, _), _| *d != daemon_id);

        let hosts: Vec<HostId> = self
            .hosts
            .values()
            .filter(|h| h.local_hosts.iter().any(|lh| lh.daemon_id == daemon_id))
            .map(|h| h.id)
            .collect();
        for id in hosts {
            if let Some(host) = self.hosts.get_mut(&id) {
                host.local_hosts.retain(|lh| lh.daemon_id != daemon_id);
            }
        }
        self.hosts.retain(|_, h| !h.is_orphan());

        let services: Vec<ServiceId> = self
            .services
            .values()
            .filter(|s| s.has_daemon(daemon_id))
            .map(|s| s.id)
            .collect();
        for id in services {
            if let Some(service) = self.services.get_mut(&id) {
                service.daemons.retain(|d| *d != daemon_id);
                if let Some(ha) = service.ha.as_mut() {
                    ha.clear_role(daemon_id);
                }
            }
        }
        self.services.retain(|_, s| !s.daemons.is_empty());
    }

    // ── Lookups ─────────────────────────────────────────────────────

    pub fn daemon(&self, id: DaemonId) -> Result<&Daemon> {
        self.daemons
            .get(&id)
            .ok_or_else(|| CoreError::not_found("daemon", id))
    }

    pub fn app_of(&self, daemon_id: DaemonId) -> Result<&App> {
        let daemon = self.daemon(daemon_id)?;
        self.apps
            .get(&daemon.app_id)
            .ok_or_else(|| CoreError::not_found("app", daemon.app_id))
    }

    pub fn daemons_of_kind(&self, kind: AppType) -> impl Iterator<Item = &Daemon> {
        self.daemons.values().filter(move |d| {
            self.apps
                .get(&d.app_id)
                .is_some_and(|app| app.kind == kind)
        })
    }

    pub fn subnet_by_prefix(&self, prefix: &str) -> Option<&Subnet> {
        self.subnets.values().find(|s| s.prefix == prefix)
    }

    pub fn shared_network_by_name(&self, name: &str, family: Family) -> Option<&SharedNetwork> {
        self.shared_networks
            .values()
            .find(|n| n.name == name && n.family == family)
    }

    /// Local subnets of a daemon ordered by subnet id.
    pub fn local_subnets_of(&self, daemon_id: DaemonId) -> impl Iterator<Item = &LocalSubnet> {
        self.local_subnets
            .values()
            .filter(move |ls| ls.daemon_id == daemon_id)
    }

    pub fn local_subnets_in(&self, subnet_id: SubnetId) -> impl Iterator<Item = &LocalSubnet> {
        self.local_subnets
            .values()
            .filter(move |ls| ls.subnet_id == subnet_id)
    }

    pub fn local_subnet_by_local_id(
        &self,
        daemon_id: DaemonId,
        local_id: i64,
    ) -> Option<&LocalSubnet> {
        self.local_subnets_of(daemon_id)
            .find(|ls| ls.local_id == local_id)
    }

    /// Hosts reserved in a subnet; `None` selects global hosts.
    pub fn hosts_in(&self, subnet_id: Option<SubnetId>) -> impl Iterator<Item = &Host> {
        self.hosts
            .values()
            .filter(move |h| h.subnet_id == subnet_id)
    }

    pub fn services_of(&self, daemon_id: DaemonId) -> impl Iterator<Item = &Service> {
        self.services
            .values()
            .filter(move |s| s.has_daemon(daemon_id))
    }

    pub fn rps_intervals_of(&self, daemon_id: DaemonId) -> impl Iterator<Item = &RpsInterval> {
        self.rps_intervals
            .values()
            .filter(move |i| i.daemon_id == daemon_id)
    }

    // ── Settings and secrets ────────────────────────────────────────

    pub fn setting(&self, key: &str) -> Option<&SettingValue> {
        self.settings.get(key)
    }

    pub fn set_setting(&mut self, key: &str, value: SettingValue) {
        self.settings.insert(key.to_owned(), value);
    }

    /// Interval in seconds, falling back to the built-in default.
    pub fn interval_setting(&self, key: &str) -> i64 {
        self.setting(key)
            .and_then(SettingValue::as_int)
            .or_else(|| default_interval(key))
            .unwrap_or(0)
    }

    pub fn secret(&self, key: &str) -> Option<&[u8]> {
        self.secrets.get(key).map(Vec::as_slice)
    }

    pub fn set_secret(&mut self, key: &str, content: Vec<u8>) {
        self.secrets.insert(key.to_owned(), content);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::setting::KEA_HOSTS_PULLER_INTERVAL;
    use crate::model::{DataSource, HostIdentifier, LocalHost};

    fn seeded() -> (Tables, AppId, DaemonId) {
        let mut t = Tables::default();
        let m = t.add_machine("agent1", 8080).unwrap();
        let app = t
            .add_app(m, AppType::Kea, "kea@agent1", vec![AccessPoint::control("127.0.0.1", 8000)])
            .unwrap();
        let d = t.add_daemon(app, DaemonName::Dhcp4).unwrap();
        (t, app, d)
    }

    #[test]
    fn machine_address_and_port_are_unique() {
        let (mut t, _, _) = seeded();
        assert!(matches!(
            t.add_machine("agent1", 8080),
            Err(CoreError::Conflict { .. })
        ));
        assert!(t.add_machine("agent1", 8081).is_ok());
    }

    #[test]
    fn app_requires_one_control_access_point() {
        let (mut t, _, _) = seeded();
        let m = *t.machines.keys().next().unwrap();
        assert!(t.add_app(m, AppType::Bind9, "bind9", vec![]).is_err());
    }

    #[test]
    fn daemon_name_unique_within_app() {
        let (mut t, app, _) = seeded();
        assert!(t.add_daemon(app, DaemonName::Dhcp4).is_err());
        assert!(t.add_daemon(app, DaemonName::Dhcp6).is_ok());
    }

    #[test]
    fn deleting_app_cascades() {
        let (mut t, app, d) = seeded();
        let sid = SubnetId(t.next_id());
        t.subnets.insert(sid, Subnet::new(sid, "192.0.2.0/24"));
        t.local_subnets.insert((sid, d), LocalSubnet::new(sid, d, 1));
        let hid = HostId(t.next_id());
        t.hosts.insert(
            hid,
            Host {
                id: hid,
                subnet_id: Some(sid),
                identifiers: vec![HostIdentifier {
                    kind: "hw-address".into(),
                    value: "01:02:03:04:05:06".into(),
                }],
                reservations: vec![],
                local_hosts: vec![LocalHost::new(d, DataSource::Api)],
            },
        );

        t.delete_app(app).unwrap();
        assert!(t.daemons.is_empty());
        assert!(t.local_subnets.is_empty());
        assert!(t.hosts.is_empty());
        assert_eq!(t.subnets.len(), 1);
    }

    #[test]
    fn interval_setting_falls_back_to_default() {
        let (mut t, _, _) = seeded();
        assert_eq!(t.interval_setting(KEA_HOSTS_PULLER_INTERVAL), 60);
        t.set_setting(KEA_HOSTS_PULLER_INTERVAL, SettingValue::Int(0));
        assert_eq!(t.interval_setting(KEA_HOSTS_PULLER_INTERVAL), 0);
        assert_eq!(t.interval_setting("nope"), 0);
    }
}
