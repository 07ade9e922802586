// ── Inventory identity types ──
//
// Every inventory row is keyed by a typed numeric id. The newtypes keep a
// daemon id from being passed where a subnet id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! inventory_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl $name {
                pub fn get(self) -> u64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<u64> for $name {
                fn from(id: u64) -> Self {
                    Self(id)
                }
            }
        )+
    };
}

inventory_id! {
    MachineId,
    AppId,
    DaemonId,
    /// Logical subnet id. Global reservations carry no subnet id at all.
    SubnetId,
    SharedNetworkId,
    HostId,
    ServiceId,
}
