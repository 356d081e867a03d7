//! `accord-gateway` — Real-time gateway connection manager for the Accord
//! client core.
//!
//! A [`Shard`] owns one persistent WebSocket to the gateway and runs the
//! whole protocol lifecycle itself: Hello, Identify or Resume, jittered
//! heartbeating with zombie detection, dispatch decoding, and reconnection
//! with exponential back-off. The [`ShardFleet`] sizes the fleet (explicit
//! count or discovery via `accord-rest`), brings shards up in
//! concurrency-bounded identify waves, routes guild-scoped commands to the
//! owning shard, and fans decoded dispatches out through the [`EventBus`].
//!
//! # Connection flow (per shard)
//!
//! 1. Connect WS to the resume URL (if resuming) or the gateway URL
//! 2. Receive `Hello { heartbeat_interval }`, start the heartbeat engine
//! 3. Send `Resume { token, session_id, seq }` when a session survives,
//!    else `Identify { token, intents, shard, … }`
//! 4. Main loop: track sequence numbers, answer heartbeat demands, emit
//!    dispatches, honor Reconnect/InvalidSession
//! 5. On disconnect: classify the close code — non-resumable codes are
//!    terminal, everything else reconnects with jittered back-off

pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod heartbeat;
pub mod reconnect;
pub mod session;
pub mod shard;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use config::{GatewayConfig, GatewayConfigBuilder, ShardSelection, DEFAULT_GATEWAY_URL};
pub use error::{GatewayError, Result};
pub use events::{DispatchEvent, EventBus};
pub use fleet::ShardFleet;
pub use reconnect::ReconnectPolicy;
pub use session::{Session, ShardState, ShardStatus};
pub use shard::{Shard, ShardCommand, ShardEvent, ShardHandle};

// Re-export wire types shard consumers need, so applications rarely import
// accord-wire directly.
pub use accord_wire::{
    CloseCode, Intents, RequestGuildMembers, RequestSoundboardSounds, Snowflake, VoiceStateUpdate,
};
