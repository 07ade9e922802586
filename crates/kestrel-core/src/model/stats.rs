use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::DaemonId;

/// Responses sent by a daemon over one sampling interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsInterval {
    pub daemon_id: DaemonId,
    pub start: DateTime<Utc>,
    pub duration: TimeDelta,
    pub responses: u64,
}

impl RpsInterval {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }
}

/// Names of the statistics kept in the global statistics table.
pub mod global {
    pub const TOTAL_ADDRESSES: &str = "total-addresses";
    pub const ASSIGNED_ADDRESSES: &str = "assigned-addresses";
    pub const DECLINED_ADDRESSES: &str = "declined-addresses";
    pub const TOTAL_NAS: &str = "total-nas";
    pub const ASSIGNED_NAS: &str = "assigned-nas";
    pub const DECLINED_NAS: &str = "declined-nas";
    pub const TOTAL_PDS: &str = "total-pds";
    pub const ASSIGNED_PDS: &str = "assigned-pds";
}
