// ── Configuration review dispatch ──
//
// Pullers ask for a configuration review after committing changes to a
// daemon. The review engine itself lives outside the core; this is the
// handle they talk to.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::DaemonId;

/// Why a review was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ReviewTrigger {
    ConfigCommitted,
    HostsPulled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewRequest {
    pub daemon_id: DaemonId,
    pub trigger: ReviewTrigger,
}

pub trait ReviewDispatcher: Send + Sync {
    fn begin_review(&self, daemon_id: DaemonId, trigger: ReviewTrigger);
}

/// Drops every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReviews;

impl ReviewDispatcher for NoopReviews {
    fn begin_review(&self, daemon_id: DaemonId, trigger: ReviewTrigger) {
        debug!(daemon_id = %daemon_id, %trigger, "review requested, no dispatcher attached");
    }
}

/// Forwards requests into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReviews {
    tx: mpsc::UnboundedSender<ReviewRequest>,
}

impl ChannelReviews {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReviewRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReviewDispatcher for ChannelReviews {
    fn begin_review(&self, daemon_id: DaemonId, trigger: ReviewTrigger) {
        if self.tx.send(ReviewRequest { daemon_id, trigger }).is_err() {
            warn!(daemon_id = %daemon_id, "review receiver dropped");
        }
    }
}
