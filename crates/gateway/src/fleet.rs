//! Shard fleet orchestrator.
//!
//! Sizes the fleet (explicit count or discovery), brings shards online in
//! identify waves bounded by the service's concurrency budget, routes
//! guild-scoped commands to the owning shard, and aggregates metrics.
//! The fleet never touches shard internals: it only starts tasks, forwards
//! commands into command channels, and reads published state.

use std::sync::Arc;
use std::time::Duration;

use accord_rest::RestClient;
use accord_wire::{RequestGuildMembers, RequestSoundboardSounds, Snowflake, VoiceStateUpdate};
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, ShardSelection, DEFAULT_GATEWAY_URL};
use crate::error::{GatewayError, Result};
use crate::events::{DispatchEvent, EventBus};
use crate::session::{ShardState, ShardStatus};
use crate::shard::{Shard, ShardCommand, ShardEvent, ShardHandle};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const EVENT_BUS_CAPACITY: usize = 256;

struct FleetShard {
    handle: ShardHandle,
    task: JoinHandle<Result<()>>,
}

/// Multi-shard gateway connection manager.
pub struct ShardFleet {
    config: Arc<GatewayConfig>,
    rest: Option<RestClient>,
    shards: Vec<FleetShard>,
    shard_count: u32,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
}

impl ShardFleet {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            rest: None,
            shards: Vec::new(),
            shard_count: 0,
            events: Arc::new(EventBus::new(EVENT_BUS_CAPACITY)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Attach a REST client; required for `ShardSelection::Auto`.
    pub fn with_rest(mut self, rest: RestClient) -> Self {
        self.rest = Some(rest);
        self
    }

    /// The dispatch fan-out. Subscribe before `start` to not miss startup
    /// events.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Bring every shard online, wave by wave.
    ///
    /// Identify rate limiting is keyed by `id % max_concurrency`: shards in
    /// different key classes may identify concurrently, shards sharing one
    /// must not. Each wave therefore takes `max_concurrency` consecutive
    /// ids (one per class); the fleet waits for the wave's connect attempts
    /// to settle, then pauses `identify_delay` before the next — the
    /// service enforces this cadence and force-disconnects violators.
    pub async fn start(&mut self) -> Result<()> {
        if !self.shards.is_empty() {
            return Err(GatewayError::Config("fleet already started".into()));
        }

        let (count, concurrency, url) = self.resolve_topology().await?;
        self.shard_count = count;
        tracing::info!(
            shards = count,
            max_concurrency = concurrency,
            url = %url,
            "starting shard fleet"
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.spawn_event_forwarder(events_rx);

        let ids: Vec<u32> = (0..count).collect();
        let wave_count = ids.chunks(concurrency as usize).count();
        for (wave_index, wave) in ids.chunks(concurrency as usize).enumerate() {
            tracing::info!(wave = wave_index, shards = ?wave, "starting identify wave");
            let mut settling = Vec::with_capacity(wave.len());
            for &id in wave {
                let (shard, handle) =
                    Shard::new(id, count, url.clone(), self.config.clone(), events_tx.clone());
                let task = tokio::spawn(shard.run(self.shutdown.child_token()));
                settling.push(wait_settled(
                    id,
                    handle.watch(),
                    self.config.wave_timeout,
                ));
                self.shards.push(FleetShard { handle, task });
            }
            join_all(settling).await;

            if wave_index + 1 < wave_count {
                tokio::time::sleep(self.config.identify_delay).await;
            }
        }

        Ok(())
    }

    /// Shard count and identify concurrency, from config or discovery.
    async fn resolve_topology(&self) -> Result<(u32, u32, String)> {
        match self.config.shards {
            ShardSelection::Count(count) => {
                let concurrency = self.config.identify_concurrency.unwrap_or(1);
                let url = self
                    .config
                    .gateway_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
                Ok((count, concurrency, url))
            }
            ShardSelection::Auto => {
                let rest = self.rest.as_ref().ok_or_else(|| {
                    GatewayError::Config("auto sharding requires a REST client".into())
                })?;
                let info = rest.get_gateway_bot().await?;
                if info.session_start_limit.remaining < info.shards {
                    tracing::warn!(
                        remaining = info.session_start_limit.remaining,
                        needed = info.shards,
                        "session start quota below fleet size; identifies may be rejected"
                    );
                }
                let concurrency = self
                    .config
                    .identify_concurrency
                    .unwrap_or(info.session_start_limit.max_concurrency)
                    .max(1);
                let url = self.config.gateway_url.clone().unwrap_or(info.url);
                Ok((info.shards, concurrency, url))
            }
        }
    }

    fn spawn_event_forwarder(&self, mut events_rx: mpsc::Receiver<ShardEvent>) {
        let bus = self.events.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events_rx.recv() => match event {
                        Some(ShardEvent::Dispatch { shard_id, event_type, data }) => {
                            bus.publish(DispatchEvent { shard_id, event_type, data });
                        }
                        Some(ShardEvent::Terminated { shard_id, reason }) => {
                            tracing::error!(shard_id, reason = %reason, "shard terminated");
                        }
                        None => break,
                    },
                }
            }
        });
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Which shard owns a guild. Pure in `(guild_id, shard_count)`; stable
    /// for the lifetime of this fleet (a re-sharded fleet is a new fleet).
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> u32 {
        guild_id.shard_index(self.shard_count)
    }

    pub fn shard(&self, id: u32) -> Option<&ShardHandle> {
        self.shards.iter().map(|s| &s.handle).find(|h| h.id() == id)
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn statuses(&self) -> Vec<(u32, ShardStatus)> {
        self.shards
            .iter()
            .map(|s| (s.handle.id(), s.handle.state().status))
            .collect()
    }

    /// Mean heartbeat latency across shards that have acked at least once;
    /// `None` when no shard has a sample yet.
    pub fn avg_latency(&self) -> Option<Duration> {
        let samples: Vec<Duration> = self
            .shards
            .iter()
            .filter_map(|s| s.handle.state().latency)
            .collect();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<Duration>() / samples.len() as u32)
    }

    // ── Command fan-out ──────────────────────────────────────────────

    /// Push a presence update to every shard.
    pub async fn update_presence(&self, presence: Value) {
        for shard in &self.shards {
            if !shard
                .handle
                .send(ShardCommand::UpdatePresence(presence.clone()))
                .await
            {
                tracing::debug!(shard_id = shard.handle.id(), "presence update dropped");
            }
        }
    }

    /// Route a voice-state change to the shard owning its guild.
    pub async fn update_voice_state(&self, update: VoiceStateUpdate) {
        let shard_id = self.shard_for_guild(update.guild_id);
        self.send_to(shard_id, ShardCommand::UpdateVoiceState(update))
            .await;
    }

    /// Route a member-chunk request to the shard owning its guild.
    pub async fn request_guild_members(&self, request: RequestGuildMembers) {
        let shard_id = self.shard_for_guild(request.guild_id);
        self.send_to(shard_id, ShardCommand::RequestGuildMembers(request))
            .await;
    }

    /// Route a soundboard listing to the shard owning the first guild.
    pub async fn request_soundboard_sounds(&self, request: RequestSoundboardSounds) {
        let Some(&first) = request.guild_ids.first() else {
            tracing::debug!("soundboard request with no guild ids dropped");
            return;
        };
        let shard_id = self.shard_for_guild(first);
        self.send_to(shard_id, ShardCommand::RequestSoundboardSounds(request))
            .await;
    }

    async fn send_to(&self, shard_id: u32, command: ShardCommand) {
        match self.shard(shard_id) {
            // Commands to a disconnected shard are a logged no-op.
            Some(handle) => {
                if !handle.send(command).await {
                    tracing::debug!(shard_id, "command dropped, shard not running");
                }
            }
            None => tracing::debug!(shard_id, "command dropped, no such shard"),
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Cancel every shard and wait for their tasks to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for shard in self.shards {
            match shard.task.await {
                Ok(Err(GatewayError::Shutdown)) | Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "shard ended with error");
                }
                Err(e) => tracing::warn!(error = %e, "shard task panicked"),
            }
        }
    }
}

/// Wait for one shard's connect attempt to settle (Ready, or failed into
/// Disconnected/Idle), bounded so a hung shard can't stall its wave.
async fn wait_settled(shard_id: u32, mut rx: watch::Receiver<ShardState>, timeout: Duration) {
    let settled = async {
        // Leave the initial Idle first, then wait for a settled state.
        let _ = rx.wait_for(|s| s.status != ShardStatus::Idle).await;
        let _ = rx.wait_for(|s| s.status.is_settled()).await;
    };
    if tokio::time::timeout(timeout, settled).await.is_err() {
        tracing::warn!(shard_id, "connect attempt timed out; continuing wave");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_wire::Intents;

    fn fleet_with_count(count: u32) -> ShardFleet {
        let config = GatewayConfig::builder("token")
            .intents(Intents::GUILDS)
            .shards(ShardSelection::Count(count))
            .build()
            .unwrap();
        let mut fleet = ShardFleet::new(config);
        fleet.shard_count = count;
        fleet
    }

    #[test]
    fn guild_routing_is_deterministic() {
        let fleet = fleet_with_count(8);
        let guild = Snowflake(175_928_847_299_117_063);
        assert_eq!(fleet.shard_for_guild(guild), fleet.shard_for_guild(guild));
        assert!(fleet.shard_for_guild(guild) < 8);
    }

    #[test]
    fn avg_latency_is_none_without_samples() {
        let fleet = fleet_with_count(4);
        assert_eq!(fleet.avg_latency(), None);
    }

    #[test]
    fn waves_take_one_shard_per_rate_limit_class() {
        // 8 shards at concurrency 2 → 4 waves of 2, never two shards with
        // the same `id % max_concurrency` in one wave.
        let ids: Vec<u32> = (0..8).collect();
        let waves: Vec<&[u32]> = ids.chunks(2).collect();
        assert_eq!(waves.len(), 4);
        for wave in waves {
            assert_eq!(wave.len(), 2);
            assert_ne!(wave[0] % 2, wave[1] % 2);
        }
    }
}
