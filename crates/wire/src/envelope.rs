//! Gateway frame envelope and opcodes.
//!
//! Every frame on the gateway socket, in either direction, is one envelope:
//! `{"op": <int>, "d": <payload>, "s": <int|null>, "t": <string|null>}`.
//! `s` and `t` are only ever non-null on Dispatch frames from the server.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::Result;
use crate::intents::Intents;
use crate::snowflake::Snowflake;

/// Gateway opcodes used by the connection core.
///
/// Opcodes this client never sends or reacts to decode as [`OpCode::Unknown`]
/// and are skipped by the shard loop, so new server-side opcodes don't break
/// older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Dispatch,
    Heartbeat,
    Identify,
    PresenceUpdate,
    VoiceStateUpdate,
    Resume,
    Reconnect,
    RequestGuildMembers,
    InvalidSession,
    Hello,
    HeartbeatAck,
    RequestSoundboardSounds,
    Unknown(u8),
}

impl OpCode {
    pub const fn code(self) -> u8 {
        match self {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::PresenceUpdate => 3,
            OpCode::VoiceStateUpdate => 4,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::RequestGuildMembers => 8,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
            OpCode::RequestSoundboardSounds => 31,
            OpCode::Unknown(v) => v,
        }
    }

    pub const fn from_code(v: u8) -> Self {
        match v {
            0 => OpCode::Dispatch,
            1 => OpCode::Heartbeat,
            2 => OpCode::Identify,
            3 => OpCode::PresenceUpdate,
            4 => OpCode::VoiceStateUpdate,
            6 => OpCode::Resume,
            7 => OpCode::Reconnect,
            8 => OpCode::RequestGuildMembers,
            9 => OpCode::InvalidSession,
            10 => OpCode::Hello,
            11 => OpCode::HeartbeatAck,
            31 => OpCode::RequestSoundboardSounds,
            other => OpCode::Unknown(other),
        }
    }
}

impl Serialize for OpCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let v = u64::deserialize(deserializer)?;
        let v = u8::try_from(v).map_err(|_| D::Error::custom(format!("opcode out of range: {v}")))?;
        Ok(OpCode::from_code(v))
    }
}

/// The gateway frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: OpCode,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl Envelope {
    /// Build a command envelope (outbound frames never carry `s`/`t`).
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Heartbeat carrying the last seen dispatch sequence (or null).
    pub fn heartbeat(seq: Option<u64>) -> Self {
        let d = match seq {
            Some(s) => Value::from(s),
            None => Value::Null,
        };
        Self::new(OpCode::Heartbeat, d)
    }

    pub fn identify(payload: &Identify) -> Result<Self> {
        Ok(Self::new(OpCode::Identify, serde_json::to_value(payload)?))
    }

    pub fn resume(payload: &Resume) -> Result<Self> {
        Ok(Self::new(OpCode::Resume, serde_json::to_value(payload)?))
    }

    /// Presence payloads are caller-shaped; the core forwards them opaquely.
    pub fn presence_update(presence: Value) -> Self {
        Self::new(OpCode::PresenceUpdate, presence)
    }

    pub fn voice_state_update(payload: &VoiceStateUpdate) -> Result<Self> {
        Ok(Self::new(
            OpCode::VoiceStateUpdate,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn request_guild_members(payload: &RequestGuildMembers) -> Result<Self> {
        Ok(Self::new(
            OpCode::RequestGuildMembers,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn request_soundboard_sounds(payload: &RequestSoundboardSounds) -> Result<Self> {
        Ok(Self::new(
            OpCode::RequestSoundboardSounds,
            serde_json::to_value(payload)?,
        ))
    }

    /// The `d` field of an InvalidSession frame: whether the session is
    /// still resumable. Anything malformed counts as non-resumable.
    pub fn invalid_session_resumable(&self) -> bool {
        self.d.as_bool().unwrap_or(false)
    }
}

// ── Control payloads ─────────────────────────────────────────────────

/// `d` of a Hello frame.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// The subset of the Ready dispatch the connection core needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    pub resume_gateway_url: Option<String>,
}

/// Identify handshake payload.
#[derive(Debug, Clone, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: IdentifyProperties,
    pub intents: Intents,
    pub shard: [u32; 2],
    pub compress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<Value>,
}

/// Connection properties reported during Identify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "accord".to_string(),
            device: "accord".to_string(),
        }
    }
}

/// Resume handshake payload.
#[derive(Debug, Clone, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Voice state change, routed to the shard owning `guild_id`.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceStateUpdate {
    pub guild_id: Snowflake,
    /// `None` disconnects from voice.
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Guild member chunk request, routed to the shard owning `guild_id`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestGuildMembers {
    pub guild_id: Snowflake,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presences: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Soundboard sound listing request; all guilds must live on one shard.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSoundboardSounds {
    pub guild_ids: Vec<Snowflake>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip_preserves_nulls() {
        let env = Envelope::heartbeat(Some(42));
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"op\":1"));
        assert!(json.contains("\"d\":42"));
        assert!(json.contains("\"s\":null"));
        assert!(json.contains("\"t\":null"));

        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.op, OpCode::Heartbeat);
        assert_eq!(back.d, Value::from(42));
    }

    #[test]
    fn dispatch_envelope_decodes_sequence_and_type() {
        let raw = r#"{"op":0,"d":{"session_id":"abc","resume_gateway_url":"wss://resume.example"},"s":7,"t":"READY"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.op, OpCode::Dispatch);
        assert_eq!(env.s, Some(7));
        assert_eq!(env.t.as_deref(), Some("READY"));

        let ready: ReadyPayload = serde_json::from_value(env.d).unwrap();
        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.resume_gateway_url.as_deref(), Some("wss://resume.example"));
    }

    #[test]
    fn unknown_opcode_is_tolerated() {
        let env: Envelope = serde_json::from_str(r#"{"op":42,"d":null}"#).unwrap();
        assert_eq!(env.op, OpCode::Unknown(42));
        assert_eq!(env.s, None);
    }

    #[test]
    fn soundboard_opcode_number() {
        assert_eq!(OpCode::RequestSoundboardSounds.code(), 31);
        assert_eq!(OpCode::from_code(31), OpCode::RequestSoundboardSounds);
    }

    #[test]
    fn identify_shape() {
        let identify = Identify {
            token: "tok".into(),
            properties: IdentifyProperties::default(),
            intents: Intents::GUILDS | Intents::GUILD_MESSAGES,
            shard: [2, 8],
            compress: false,
            large_threshold: Some(150),
            presence: None,
        };
        let env = Envelope::identify(&identify).unwrap();
        assert_eq!(env.op, OpCode::Identify);
        assert_eq!(env.d["shard"], serde_json::json!([2, 8]));
        assert_eq!(env.d["large_threshold"], serde_json::json!(150));
        assert!(env.d.get("presence").is_none());
        assert!(env.d["intents"].is_u64());
    }

    #[test]
    fn invalid_session_payload() {
        let env: Envelope = serde_json::from_str(r#"{"op":9,"d":true}"#).unwrap();
        assert!(env.invalid_session_resumable());
        let env: Envelope = serde_json::from_str(r#"{"op":9,"d":false}"#).unwrap();
        assert!(!env.invalid_session_resumable());
        let env: Envelope = serde_json::from_str(r#"{"op":9,"d":null}"#).unwrap();
        assert!(!env.invalid_session_resumable());
    }
}
