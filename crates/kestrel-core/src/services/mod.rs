// ── Services and network detection ──
//
// Everything derived from a committed daemon configuration.

pub mod commit;
pub mod detector;

pub use commit::{CommitSummary, commit_daemon_config, detect_networks};
pub use detector::{HaRole, detect_services};
