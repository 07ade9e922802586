// ── Puller runtime configuration ──
//
// Tuning knobs for the pullers and the mutation module. Built by the
// server from its configuration file; the core never reads files itself.

use std::time::Duration;

/// Runtime tuning for pullers and mutations.
#[derive(Debug, Clone)]
pub struct PullerConfig {
    /// Deadline for each outbound command issued by a puller.
    pub command_timeout: Duration,
    /// Deadline for one mutation commit, shared by all of its commands.
    pub mutation_timeout: Duration,
    /// `limit` argument of `reservation-get-page`.
    pub page_limit: u32,
    /// Maximum number of daemons processed concurrently within one pass.
    pub fan_out: usize,
    pub rps_short_window: Duration,
    pub rps_long_window: Duration,
    /// How often a paused puller re-reads its interval setting.
    pub paused_recheck: Duration,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            mutation_timeout: Duration::from_secs(30),
            page_limit: 100,
            fan_out: 8,
            rps_short_window: Duration::from_secs(15 * 60),
            rps_long_window: Duration::from_secs(24 * 60 * 60),
            paused_recheck: Duration::from_secs(5),
        }
    }
}
