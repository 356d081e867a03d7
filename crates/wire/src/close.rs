//! Close-code classification.
//!
//! The gateway signals the reason for a disconnect through the WebSocket
//! close code. A small fixed set means the session can never be salvaged
//! (bad credentials, bad shard config, bad intents) — reconnecting would
//! just fail the same way, so the shard goes terminally idle instead.
//! Every other code, including abnormal closes with no code at all, is
//! worth at least one resume/reconnect attempt.

use std::fmt;

/// A WebSocket close code as sent by the gateway (or by us).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const UNKNOWN_ERROR: CloseCode = CloseCode(4000);
    pub const UNKNOWN_OPCODE: CloseCode = CloseCode(4001);
    pub const DECODE_ERROR: CloseCode = CloseCode(4002);
    pub const NOT_AUTHENTICATED: CloseCode = CloseCode(4003);
    pub const AUTHENTICATION_FAILED: CloseCode = CloseCode(4004);
    pub const ALREADY_AUTHENTICATED: CloseCode = CloseCode(4005);
    pub const INVALID_SEQUENCE: CloseCode = CloseCode(4007);
    pub const RATE_LIMITED: CloseCode = CloseCode(4008);
    pub const SESSION_TIMED_OUT: CloseCode = CloseCode(4009);
    pub const INVALID_SHARD: CloseCode = CloseCode(4010);
    pub const SHARDING_REQUIRED: CloseCode = CloseCode(4011);
    pub const INVALID_API_VERSION: CloseCode = CloseCode(4012);
    pub const INVALID_INTENTS: CloseCode = CloseCode(4013);
    pub const DISALLOWED_INTENTS: CloseCode = CloseCode(4014);

    /// Code we send ourselves when force-closing a link (zombied heartbeat,
    /// server-requested reconnect). Chosen so the server treats the session
    /// as resumable.
    pub const RECONNECT: CloseCode = CloseCode(4900);

    /// Whether a connection closed with this code may attempt to resume or
    /// reconnect. False only for the fixed non-recoverable set.
    pub fn is_resumable(self) -> bool {
        !matches!(
            self,
            CloseCode::AUTHENTICATION_FAILED
                | CloseCode::INVALID_SHARD
                | CloseCode::SHARDING_REQUIRED
                | CloseCode::INVALID_API_VERSION
                | CloseCode::INVALID_INTENTS
                | CloseCode::DISALLOWED_INTENTS
        )
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for CloseCode {
    fn from(v: u16) -> Self {
        CloseCode(v)
    }
}
