//! Structural-change fan-out.
//!
//! Every successful mutation ends with a fire-and-forget broadcast so peers
//! can invalidate their caches. The wire transport is supplied by the host;
//! [`LogBroadcaster`] is the default, which only records the notification.

use crate::appid::AppId;

/// Fan-out port for structural-change notifications.
pub trait Broadcaster: Send + Sync {
    /// Notifies peers that the given workspace changed. Best-effort and
    /// unordered; failures must not propagate to the mutation path.
    fn broadcast(&self, app_id: &AppId);
}

/// Default broadcaster: logs the notification and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, app_id: &AppId) {
        tracing::debug!(app_id = %app_id, "structural change broadcast");
    }
}
