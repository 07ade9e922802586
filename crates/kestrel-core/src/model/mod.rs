// ── Inventory model ──
//
// Plain data types stored in the inventory. Behavior lives in the store,
// the pullers and the service detector.

pub mod host;
pub mod ids;
pub mod machine;
pub mod service;
pub mod setting;
pub mod stats;
pub mod subnet;

pub use host::{DataSource, DhcpOption, Host, HostIdentifier, IpReservation, LocalHost};
pub use ids::{AppId, DaemonId, HostId, MachineId, ServiceId, SharedNetworkId, SubnetId};
pub use machine::{
    App, AppType, Bind9Stats, Daemon, DaemonConfig, DaemonName, Machine, RpsValues, ViewStats,
};
pub use service::{HaMode, HaPeerSignature, HaService, HaState, Service};
pub use setting::SettingValue;
pub use stats::RpsInterval;
pub use subnet::{Family, LocalSubnet, SharedNetwork, StatsMap, Subnet};
