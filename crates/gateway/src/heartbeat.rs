//! Heartbeat bookkeeping for one connection.
//!
//! The timer itself lives in the shard's connection scope (so teardown
//! cancels it with the socket); this struct tracks the ack state that
//! decides whether a tick sends a beat or declares the link zombied.

use std::time::Duration;

use tokio::time::Instant;

use crate::reconnect::pseudo_random_fraction;

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    /// A beat was sent and its ack has not arrived yet.
    outstanding: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            outstanding: false,
            last_sent: None,
            latency: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Jittered delay before the first beat: `interval * U(0,1)`, so shards
    /// sharing a Hello time don't thunder in sync.
    pub fn first_delay(&self, seed: u64) -> Duration {
        self.interval.mul_f64(pseudo_random_fraction(seed))
    }

    /// The previous beat was never acked — the link is zombied and must be
    /// force-closed rather than beaten again.
    pub fn is_zombied(&self) -> bool {
        self.outstanding
    }

    pub fn on_sent(&mut self) {
        self.outstanding = true;
        self.last_sent = Some(Instant::now());
    }

    /// Record an ack; returns the measured round-trip.
    pub fn on_ack(&mut self) -> Option<Duration> {
        self.outstanding = false;
        let rtt = self.last_sent.map(|sent| sent.elapsed());
        if rtt.is_some() {
            self.latency = rtt;
        }
        rtt
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}
