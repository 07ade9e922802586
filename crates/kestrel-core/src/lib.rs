//! State reconciliation core for a Kea DHCP and BIND 9 fleet.
//!
//! - **[`Inventory`]** holds the relational state in memory. Readers take
//!   snapshots; writers go through serialised [`Transaction`]s that are
//!   published on commit and dropped on rollback.
//!
//! - **Pullers** ([`puller`]) poll daemons through the
//!   [`ConnectedAgents`](kestrel_agent::ConnectedAgents) port: host
//!   reservations, lease statistics and response rates, HA status and
//!   BIND 9 cache statistics. The [`Supervisor`] runs them at the
//!   intervals stored in the inventory settings.
//!
//! - **Configuration model**: [`keaconfig`] wraps Kea JSON documents and
//!   [`bind9`] parses and formats `named.conf`, resolving zone transfer
//!   and rndc access.
//!
//! - **Services** ([`services`]) derive subnets, shared networks and HA
//!   services whenever a daemon configuration is committed.
//!
//! - **Mutations** ([`mutation`]) plan and send user-initiated changes.

pub mod bind9;
pub mod config;
pub mod error;
pub mod keaconfig;
pub mod model;
pub mod mutation;
pub mod puller;
pub mod review;
pub mod services;
pub mod store;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bind9::{Bind9Config, Bind9Error};
pub use config::PullerConfig;
pub use error::{CoreError, Result};
pub use keaconfig::KeaConfig;
pub use mutation::{ConfigContext, ConfigManager};
pub use puller::{PassCounters, PullerStatus};
pub use review::{ChannelReviews, NoopReviews, ReviewDispatcher, ReviewRequest, ReviewTrigger};
pub use services::{CommitSummary, commit_daemon_config};
pub use store::{Inventory, Tables, Transaction, WriteCounts};
pub use supervisor::Supervisor;
