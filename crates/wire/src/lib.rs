//! `accord-wire` — Wire-level vocabulary shared by the gateway and REST
//! halves of the Accord client core.
//!
//! Everything the two runtime crates agree on lives here: the gateway frame
//! envelope and its opcodes, close-code classification, the intents bitmask,
//! snowflake id math (including guild → shard routing), and the pluggable
//! frame codec.
//!
//! This crate is deliberately free of I/O — it only knows how to describe
//! and (de)serialize protocol data, so both halves can depend on it without
//! pulling in each other's runtime machinery.

pub mod close;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod intents;
pub mod snowflake;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use close::CloseCode;
pub use codec::{FrameCodec, JsonCodec};
pub use envelope::{
    Envelope, HelloPayload, Identify, IdentifyProperties, OpCode, ReadyPayload,
    RequestGuildMembers, RequestSoundboardSounds, Resume, VoiceStateUpdate,
};
pub use error::{Result, WireError};
pub use intents::Intents;
pub use snowflake::Snowflake;
