//! Bucket manager: per-route rate-limit state and admission control.
//!
//! One instance is shared by every request-issuing task. Admissions for the
//! same bucket are serialized through that bucket's async gate so two
//! requests can never both spend the last unit of quota; requests against
//! unrelated buckets proceed fully in parallel. A process-wide global gate
//! takes precedence over everything.
//!
//! Bucket identity starts out as the route key; once a response reveals the
//! server-assigned bucket id for a route, the route key is aliased to it and
//! all routes sharing that id converge on one bucket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bucket::{RateBucket, RateLimitInfo};

/// Default interval between sweeps of expired buckets.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default rolling window for invalid-request warnings.
pub const DEFAULT_INVALID_WINDOW: Duration = Duration::from_secs(600);

struct BucketSlot {
    /// Serializes admission for this bucket. Held only while deciding (and,
    /// when quota is exhausted, while waiting) — never across the HTTP call.
    gate: tokio::sync::Mutex<()>,
    state: Mutex<RateBucket>,
}

impl BucketSlot {
    fn new(now: Instant) -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(RateBucket::unknown(now)),
        }
    }
}

/// Tracks every rate bucket the process has learned about and gates
/// outbound requests on them.
pub struct BucketManager {
    buckets: RwLock<HashMap<String, Arc<BucketSlot>>>,
    /// route key → server bucket id.
    aliases: RwLock<HashMap<String, String>>,
    /// While `now < global_reset`, nothing is admitted anywhere.
    global_reset: Mutex<Option<Instant>>,
    /// 401/403/429-with-ban-risk events in the current window.
    invalid_requests: AtomicU32,
    background: CancellationToken,
}

impl Default for BucketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketManager {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            global_reset: Mutex::new(None),
            invalid_requests: AtomicU32::new(0),
            background: CancellationToken::new(),
        }
    }

    /// Resolve a route key to its bucket key (identity until aliased).
    pub fn resolve(&self, route_key: &str) -> String {
        self.aliases
            .read()
            .get(route_key)
            .cloned()
            .unwrap_or_else(|| route_key.to_string())
    }

    fn slot_for(&self, bucket_key: &str) -> Arc<BucketSlot> {
        if let Some(slot) = self.buckets.read().get(bucket_key) {
            return slot.clone();
        }
        self.buckets
            .write()
            .entry(bucket_key.to_string())
            .or_insert_with(|| Arc::new(BucketSlot::new(Instant::now())))
            .clone()
    }

    /// Block until a request on `route_key` may be sent, then spend one unit
    /// of quota optimistically (the next observation corrects it).
    ///
    /// Suspends only the calling task; callers on unrelated buckets are
    /// untouched.
    pub async fn admit(&self, route_key: &str) {
        let key = self.resolve(route_key);
        let slot = self.slot_for(&key);
        let _gate = slot.gate.lock().await;

        loop {
            if let Some(until) = self.global_block() {
                tracing::debug!(bucket = %key, "blocked by global rate limit");
                tokio::time::sleep_until(until).await;
                continue;
            }

            let blocked_until = {
                let state = slot.state.lock();
                if state.is_blocked(Instant::now()) {
                    Some(state.reset_at)
                } else {
                    None
                }
            };
            match blocked_until {
                Some(until) => {
                    tracing::debug!(bucket = %key, "bucket exhausted, waiting for reset");
                    tokio::time::sleep_until(until).await;
                }
                None => break,
            }
        }

        let mut state = slot.state.lock();
        if state.is_expired(Instant::now()) {
            // Logically fresh: full quota minus the unit we're spending.
            state.remaining = state.limit.saturating_sub(1);
        } else {
            state.remaining = state.remaining.saturating_sub(1);
        }
    }

    /// Feed response headers back in. The server's view wins unconditionally
    /// over any local optimistic decrement.
    pub fn observe(&self, route_key: &str, info: &RateLimitInfo) {
        if !info.describes_bucket() {
            return;
        }
        // describes_bucket() guarantees these three.
        let (bucket_id, limit, remaining) = match (&info.bucket, info.limit, info.remaining) {
            (Some(b), Some(l), Some(r)) => (b.clone(), l, r),
            _ => return,
        };

        if route_key != bucket_id {
            let mut aliases = self.aliases.write();
            if aliases.get(route_key).map(String::as_str) != Some(bucket_id.as_str()) {
                tracing::debug!(route = %route_key, bucket = %bucket_id, "route aliased to bucket");
                aliases.insert(route_key.to_string(), bucket_id.clone());
            }
        }

        let slot = self.slot_for(&bucket_id);
        let mut state = slot.state.lock();
        state.limit = limit;
        state.remaining = remaining;
        if let Some(delay) = info.reset_delay() {
            state.reset_at = Instant::now() + delay;
        }
    }

    /// Gate every bucket until `until`. Called only on an explicit global
    /// rate-limit signal.
    pub fn set_global_reset(&self, until: Instant) {
        *self.global_reset.lock() = Some(until);
    }

    pub fn global_reset_at(&self) -> Option<Instant> {
        *self.global_reset.lock()
    }

    fn global_block(&self) -> Option<Instant> {
        let mut global = self.global_reset.lock();
        match *global {
            Some(until) if Instant::now() < until => Some(until),
            Some(_) => {
                *global = None;
                None
            }
            None => None,
        }
    }

    /// Drop buckets whose reset has passed and that no admission currently
    /// holds, then prune aliases pointing at buckets that no longer exist.
    /// Expired buckets are recreated on demand.
    pub fn sweep(&self) {
        let now = Instant::now();

        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, slot| {
            if slot.gate.try_lock().is_err() {
                return true; // admission in flight
            }
            !slot.state.lock().is_expired(now)
        });
        let swept = before - buckets.len();

        let mut aliases = self.aliases.write();
        let alias_before = aliases.len();
        aliases.retain(|_, target| buckets.contains_key(target));
        let pruned = alias_before - aliases.len();

        if swept > 0 || pruned > 0 {
            tracing::debug!(swept, pruned, remaining = buckets.len(), "swept rate buckets");
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.read().len()
    }

    // ── Invalid-request accounting ───────────────────────────────────

    /// Record one event that counts toward the remote service's ban-risk
    /// window (401, 403, or a non-shared 429).
    pub fn record_invalid_request(&self) {
        self.invalid_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_request_count(&self) -> u32 {
        self.invalid_requests.load(Ordering::Relaxed)
    }

    // ── Background hygiene ───────────────────────────────────────────

    /// Spawn the sweep loop and the invalid-request warning loop. Both stop
    /// when [`shutdown`](Self::shutdown) is called or the manager is dropped;
    /// the tasks hold only a weak reference so dropping the last `Arc` also
    /// ends them.
    pub fn start_background(
        self: &Arc<Self>,
        sweep_interval: Duration,
        invalid_window: Duration,
    ) {
        let token = self.background.clone();

        let weak = Arc::downgrade(self);
        let sweep_token = token.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = sweep_token.cancelled() => break,
                    _ = tick.tick() => {
                        let Some(mgr) = weak.upgrade() else { break };
                        mgr.sweep();
                    }
                }
            }
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(invalid_window);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Skip the interval's immediate first tick.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        let Some(mgr) = weak.upgrade() else { break };
                        let count = mgr.invalid_requests.swap(0, Ordering::Relaxed);
                        if count > 0 {
                            tracing::warn!(
                                count,
                                window_secs = invalid_window.as_secs(),
                                "invalid requests in window; sustained volume risks a network-level ban"
                            );
                        }
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.background.cancel();
    }
}

impl Drop for BucketManager {
    fn drop(&mut self) {
        self.background.cancel();
    }
}
