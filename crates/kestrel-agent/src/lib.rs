//! Connected-agents port for kestrel.
//!
//! Wire types for Kea Control Agent commands, the [`ConnectedAgents`]
//! trait every puller talks through, and [`HttpAgents`], the reqwest-based
//! implementation.

pub mod agents;
pub mod error;
pub mod kea;
pub mod transport;

pub use agents::{AccessPoint, AccessPointKind, ConnectedAgents, HttpAgents};
pub use error::Error;
pub use kea::{KeaCommand, KeaResponse, KeaService, ResultCode, parse_responses};
pub use transport::{BasicAuth, TlsMode, TransportConfig};
