// ── HA service detection ──
//
// A daemon joins the service whose daemon name, HA mode and peer set equal
// those of one of its configured relationships, or founds a new one. Each
// relationship of a hub-and-spoke daemon is matched on its own.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::keaconfig::HaRelationship;
use crate::model::{DaemonId, DaemonName, HaService, Service, ServiceId};
use crate::store::Tables;

/// Role a daemon takes in a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaRole {
    Primary,
    Secondary,
    Backup,
}

impl HaRole {
    pub fn from_config(role: Option<&str>) -> Self {
        match role {
            Some("primary") => Self::Primary,
            Some("secondary" | "standby") => Self::Secondary,
            _ => Self::Backup,
        }
    }
}

fn matches(ha: &HaService, daemon: DaemonName, relationship: &HaRelationship) -> bool {
    ha.ha_type == daemon && ha.mode == relationship.mode && ha.peers == relationship.signature()
}

fn assign(ha: &mut HaService, daemon_id: DaemonId, role: HaRole) {
    ha.clear_role(daemon_id);
    match role {
        HaRole::Primary => ha.primary_id = Some(daemon_id),
        HaRole::Secondary => ha.secondary_id = Some(daemon_id),
        HaRole::Backup => ha.backup_ids.push(daemon_id),
    }
}

/// Reconcile the HA services of a daemon with its relationships.
///
/// Returns the ids of the services the daemon belongs to afterwards.
/// Rows are only written when membership or roles actually change.
pub fn detect_services(
    tables: &mut Tables,
    daemon_id: DaemonId,
    relationships: &[HaRelationship],
) -> Result<Vec<ServiceId>> {
    let daemon = tables.daemon(daemon_id)?.name;
    if !daemon.is_dhcp() && !relationships.is_empty() {
        return Err(CoreError::Config {
            message: format!("daemon {daemon} cannot take part in HA relationships"),
        });
    }

    let mut matched = BTreeSet::new();
    for relationship in relationships {
        let role = HaRole::from_config(relationship.this_role());
        let existing = tables
            .services
            .values()
            .filter(|s| !matched.contains(&s.id))
            .find(|s| s.ha.as_ref().is_some_and(|ha| matches(ha, daemon, relationship)))
            .cloned();

        let service = match existing {
            Some(current) => {
                let mut next = current.clone();
                if !next.has_daemon(daemon_id) {
                    next.daemons.push(daemon_id);
                }
                if let Some(ha) = next.ha.as_mut() {
                    assign(ha, daemon_id, role);
                }
                if next != current {
                    debug!(daemon_id = %daemon_id, service_id = %next.id, ?role, "daemon joins service");
                    tables.services.insert(next.id, next.clone());
                }
                next
            }
            None => {
                let id = ServiceId(tables.next_id());
                let mut ha = HaService::new(
                    daemon,
                    relationship.mode,
                    relationship.name(),
                    relationship.signature(),
                );
                assign(&mut ha, daemon_id, role);
                let service = Service {
                    id,
                    name: relationship.name(),
                    daemons: vec![daemon_id],
                    ha: Some(ha),
                };
                info!(daemon_id = %daemon_id, service_id = %id, relationship = %service.name, "new HA service");
                tables.services.insert(id, service.clone());
                service
            }
        };
        matched.insert(service.id);
    }

    let stale: Vec<ServiceId> = tables
        .services_of(daemon_id)
        .filter(|s| s.ha.is_some() && !matched.contains(&s.id))
        .map(|s| s.id)
        .collect();
    for id in stale {
        if let Some(service) = tables.services.get_mut(&id) {
            service.daemons.retain(|d| *d != daemon_id);
            if let Some(ha) = service.ha.as_mut() {
                ha.clear_role(daemon_id);
            }
            debug!(daemon_id = %daemon_id, service_id = %id, "daemon leaves service");
        }
    }
    let removed = tables.services.retain(|_, s| !s.daemons.is_empty());
    if removed > 0 {
        debug!(removed, "removed empty services");
    }

    Ok(matched.into_iter().collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keaconfig::HaPeer;
    use crate::model::{AppType, HaMode};
    use kestrel_agent::AccessPoint;

    fn peer(name: &str, role: &str) -> HaPeer {
        HaPeer {
            name: name.into(),
            url: format!("http://{name}:8000/"),
            role: role.into(),
            auto_failover: true,
        }
    }

    fn relationship(this: &str, mode: HaMode, peers: &[(&str, &str)]) -> HaRelationship {
        HaRelationship {
            this_server_name: this.into(),
            mode,
            peers: peers.iter().map(|(n, r)| peer(n, r)).collect(),
        }
    }

    fn daemons(t: &mut Tables, n: usize) -> Vec<DaemonId> {
        (0..n)
            .map(|i| {
                let m = t.add_machine(&format!("agent{i}"), 8080).unwrap();
                let app = t
                    .add_app(m, AppType::Kea, &format!("kea{i}"), vec![AccessPoint::control("127.0.0.1", 8000)])
                    .unwrap();
                t.add_daemon(app, DaemonName::Dhcp4).unwrap()
            })
            .collect()
    }

    const PAIR: &[(&str, &str)] = &[("server1", "primary"), ("server2", "secondary"), ("server3", "backup")];

    #[test]
    fn matching_daemons_share_one_service() {
        let mut t = Tables::default();
        let d = daemons(&mut t, 3);
        let s1 = detect_services(&mut t, d[0], &[relationship("server1", HaMode::LoadBalancing, PAIR)]).unwrap();
        let s2 = detect_services(&mut t, d[1], &[relationship("server2", HaMode::LoadBalancing, PAIR)]).unwrap();
        let s3 = detect_services(&mut t, d[2], &[relationship("server3", HaMode::LoadBalancing, PAIR)]).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s2, s3);
        assert_eq!(t.services.len(), 1);

        let ha = t.services.get(&s1[0]).unwrap().ha.clone().unwrap();
        assert_eq!(ha.primary_id, Some(d[0]));
        assert_eq!(ha.secondary_id, Some(d[1]));
        assert_eq!(ha.backup_ids, vec![d[2]]);
        assert_eq!(ha.relationship, "server1");
    }

    #[test]
    fn different_mode_founds_new_service() {
        let mut t = Tables::default();
        let d = daemons(&mut t, 2);
        detect_services(&mut t, d[0], &[relationship("server1", HaMode::LoadBalancing, PAIR)]).unwrap();
        detect_services(&mut t, d[1], &[relationship("server2", HaMode::HotStandby, PAIR)]).unwrap();
        assert_eq!(t.services.len(), 2);
    }

    #[test]
    fn hub_joins_each_relationship() {
        let mut t = Tables::default();
        let d = daemons(&mut t, 3);
        let spoke1 = [("hub", "primary"), ("spoke1", "standby")];
        let spoke2 = [("hub", "primary"), ("spoke2", "standby")];
        let hub = detect_services(
            &mut t,
            d[0],
            &[
                relationship("hub", HaMode::HotStandby, &spoke1),
                relationship("hub", HaMode::HotStandby, &spoke2),
            ],
        )
        .unwrap();
        assert_eq!(hub.len(), 2);
        detect_services(&mut t, d[1], &[relationship("spoke1", HaMode::HotStandby, &spoke1)]).unwrap();
        detect_services(&mut t, d[2], &[relationship("spoke2", HaMode::HotStandby, &spoke2)]).unwrap();
        assert_eq!(t.services.len(), 2);
        for service in t.services.values() {
            assert_eq!(service.ha.as_ref().unwrap().primary_id, Some(d[0]));
            assert_eq!(service.daemons.len(), 2);
        }
    }

    #[test]
    fn unchanged_relationships_write_nothing() {
        let mut t = Tables::default();
        let d = daemons(&mut t, 1);
        let rel = [relationship("server1", HaMode::LoadBalancing, PAIR)];
        detect_services(&mut t, d[0], &rel).unwrap();
        t.take_writes();
        detect_services(&mut t, d[0], &rel).unwrap();
        assert!(t.take_writes().is_empty());
    }

    #[test]
    fn dropped_relationship_garbage_collects_service() {
        let mut t = Tables::default();
        let d = daemons(&mut t, 2);
        detect_services(&mut t, d[0], &[relationship("server1", HaMode::LoadBalancing, PAIR)]).unwrap();
        detect_services(&mut t, d[1], &[relationship("server2", HaMode::LoadBalancing, PAIR)]).unwrap();

        detect_services(&mut t, d[0], &[]).unwrap();
        let service = t.services.values().next().unwrap();
        assert_eq!(service.daemons, vec![d[1]]);
        assert_eq!(service.ha.as_ref().unwrap().primary_id, None);

        detect_services(&mut t, d[1], &[]).unwrap();
        assert!(t.services.is_empty());
    }
}
