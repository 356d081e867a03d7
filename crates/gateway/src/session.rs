//! Shard status and session bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Connection state machine of one shard.
///
/// `Idle` is both the initial state and the terminal state after a
/// non-resumable close or an exhausted reconnect budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    Idle,
    Connecting,
    Identifying,
    Resuming,
    Ready,
    Disconnected,
}

impl ShardStatus {
    /// Whether a connect attempt has settled, one way or the other —
    /// used by the fleet to pace identify waves.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            ShardStatus::Ready | ShardStatus::Disconnected | ShardStatus::Idle
        )
    }
}

/// Resume credentials for one gateway session.
///
/// `session_id` and `sequence` are populated from the Ready dispatch and
/// survive recoverable disconnects (that's what makes Resume possible);
/// both are cleared together on any non-resumable termination.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub session_id: Option<String>,
    pub resume_url: Option<String>,
    pub sequence: Option<u64>,
}

impl Session {
    /// A resume needs both the session id and the last seen sequence.
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    pub fn clear(&mut self) {
        *self = Session::default();
    }
}

/// Snapshot of one shard, published on a `watch` channel.
///
/// Written only by the owning shard task (single writer); the fleet and
/// callers read it for routing decisions and metrics.
#[derive(Debug, Clone)]
pub struct ShardState {
    pub id: u32,
    pub status: ShardStatus,
    pub session: Session,
    pub last_heartbeat_sent: Option<DateTime<Utc>>,
    pub last_heartbeat_ack: Option<DateTime<Utc>>,
    /// Round-trip of the most recent acked heartbeat. `None` until the
    /// first ack arrives.
    pub latency: Option<Duration>,
}

impl ShardState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            status: ShardStatus::Idle,
            session: Session::default(),
            last_heartbeat_sent: None,
            last_heartbeat_ack: None,
            latency: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_needs_both_fields() {
        let mut s = Session::default();
        assert!(!s.can_resume());
        s.session_id = Some("sess".into());
        assert!(!s.can_resume());
        s.sequence = Some(12);
        assert!(s.can_resume());
        s.clear();
        assert!(!s.can_resume());
        assert!(s.resume_url.is_none());
    }

    #[test]
    fn settled_states() {
        assert!(ShardStatus::Ready.is_settled());
        assert!(ShardStatus::Disconnected.is_settled());
        assert!(ShardStatus::Idle.is_settled());
        assert!(!ShardStatus::Connecting.is_settled());
        assert!(!ShardStatus::Identifying.is_settled());
        assert!(!ShardStatus::Resuming.is_settled());
    }
}
