//! Pluggable frame codec.
//!
//! The gateway speaks JSON text frames by default; with the `compress`
//! connection mode the server instead sends zlib-deflated JSON as binary
//! frames. Both are handled by [`JsonCodec`]. An alternate binary encoding
//! can be injected through the gateway builder as an `Arc<dyn FrameCodec>`;
//! when none is supplied, selection falls back to JSON.

use std::io::Read;

use tokio_tungstenite::tungstenite::Message;

use crate::envelope::Envelope;
use crate::error::{Result, WireError};

/// Encodes outbound envelopes into WebSocket messages and decodes inbound
/// messages back. `decode` returns `Ok(None)` for transport-level frames
/// (ping/pong/close) that carry no envelope.
pub trait FrameCodec: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<Message>;
    fn decode(&self, message: &Message) -> Result<Option<Envelope>>;

    /// Value for the connect URL's `encoding` parameter.
    fn transport_encoding(&self) -> &'static str {
        "json"
    }
}

/// The default codec: JSON text frames, plus zlib-inflated binary frames
/// for connections opened with the `compress` mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl FrameCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(envelope)?))
    }

    fn decode(&self, message: &Message) -> Result<Option<Envelope>> {
        match message {
            Message::Text(text) => Ok(Some(serde_json::from_str(text)?)),
            Message::Binary(bytes) => {
                let mut text = String::new();
                flate2::read::ZlibDecoder::new(bytes.as_slice())
                    .read_to_string(&mut text)
                    .map_err(|e| WireError::Inflate(e.to_string()))?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => Ok(None),
            _ => Err(WireError::UnsupportedFrame),
        }
    }
}
