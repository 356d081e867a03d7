//! Gateway configuration and builder.
//!
//! Everything is validated once, at `build()` — a bad intents mask or an
//! out-of-range large-guild threshold fails here instead of costing a
//! connect/close round-trip against the live service.

use std::sync::Arc;
use std::time::Duration;

use accord_wire::{FrameCodec, Identify, IdentifyProperties, Intents, JsonCodec};
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::reconnect::ReconnectPolicy;

/// Canonical gateway endpoint, used when neither the configuration nor the
/// discovery call supplies one.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.accord.gg";

/// Gateway protocol version requested on connect.
pub const GATEWAY_VERSION: u8 = 10;

/// How the fleet decides its shard count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardSelection {
    /// Ask the discovery endpoint for the recommended count and the
    /// identify-concurrency budget.
    Auto,
    /// Fixed shard count, no discovery call.
    Count(u32),
}

/// Configuration consumed by [`Shard`](crate::shard::Shard) and
/// [`ShardFleet`](crate::fleet::ShardFleet).
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
    /// Explicit gateway URL; `None` falls back to discovery (Auto mode)
    /// or [`DEFAULT_GATEWAY_URL`].
    pub gateway_url: Option<String>,
    pub shards: ShardSelection,
    /// Overrides the discovered `max_concurrency` (how many shards may
    /// identify at once). Defaults to 1 when there is no discovery call.
    pub identify_concurrency: Option<u32>,
    pub large_threshold: Option<u32>,
    pub presence: Option<Value>,
    pub properties: IdentifyProperties,
    pub compress: bool,
    /// Frame codec; JSON unless an alternate codec is injected.
    pub codec: Arc<dyn FrameCodec>,
    pub reconnect: ReconnectPolicy,
    /// How long to wait for the server's Hello after connecting.
    pub hello_timeout: Duration,
    /// Pause between identify waves. The service enforces its concurrency
    /// budget per this same cadence; the default of 5 s is the floor it
    /// tolerates.
    pub identify_delay: Duration,
    /// How long the fleet waits for one shard's connect attempt to settle
    /// before moving on with the wave.
    pub wave_timeout: Duration,
    /// Randomized wait bounds before re-handshaking after InvalidSession.
    pub invalid_session_delay_min: Duration,
    pub invalid_session_delay_max: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &self.token)
            .field("intents", &self.intents)
            .field("gateway_url", &self.gateway_url)
            .field("shards", &self.shards)
            .field("identify_concurrency", &self.identify_concurrency)
            .field("large_threshold", &self.large_threshold)
            .field("presence", &self.presence)
            .field("properties", &self.properties)
            .field("compress", &self.compress)
            .field("codec", &"Arc<dyn FrameCodec>")
            .field("reconnect", &self.reconnect)
            .field("hello_timeout", &self.hello_timeout)
            .field("identify_delay", &self.identify_delay)
            .field("wave_timeout", &self.wave_timeout)
            .field("invalid_session_delay_min", &self.invalid_session_delay_min)
            .field("invalid_session_delay_max", &self.invalid_session_delay_max)
            .finish()
    }
}

impl GatewayConfig {
    pub fn builder(token: impl Into<String>) -> GatewayConfigBuilder {
        GatewayConfigBuilder::new(token)
    }

    /// The Identify payload for one shard of `total`.
    pub fn identify_for(&self, shard_id: u32, total: u32) -> Identify {
        Identify {
            token: self.token.clone(),
            properties: self.properties.clone(),
            intents: self.intents,
            shard: [shard_id, total],
            compress: self.compress,
            large_threshold: self.large_threshold,
            presence: self.presence.clone(),
        }
    }
}

/// Fluent builder for [`GatewayConfig`].
pub struct GatewayConfigBuilder {
    token: String,
    intents: Intents,
    gateway_url: Option<String>,
    shards: ShardSelection,
    identify_concurrency: Option<u32>,
    large_threshold: Option<u32>,
    presence: Option<Value>,
    properties: IdentifyProperties,
    compress: bool,
    codec: Option<Arc<dyn FrameCodec>>,
    reconnect: ReconnectPolicy,
    hello_timeout: Duration,
    identify_delay: Duration,
    wave_timeout: Duration,
    invalid_session_delay_min: Duration,
    invalid_session_delay_max: Duration,
}

impl GatewayConfigBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::none(),
            gateway_url: None,
            shards: ShardSelection::Auto,
            identify_concurrency: None,
            large_threshold: None,
            presence: None,
            properties: IdentifyProperties::default(),
            compress: false,
            codec: None,
            reconnect: ReconnectPolicy::default(),
            hello_timeout: Duration::from_secs(10),
            identify_delay: Duration::from_secs(5),
            wave_timeout: Duration::from_secs(60),
            invalid_session_delay_min: Duration::from_secs(1),
            invalid_session_delay_max: Duration::from_secs(5),
        }
    }

    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Override the gateway URL (tests, proxies, regional endpoints).
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    pub fn shards(mut self, selection: ShardSelection) -> Self {
        self.shards = selection;
        self
    }

    pub fn identify_concurrency(mut self, n: u32) -> Self {
        self.identify_concurrency = Some(n);
        self
    }

    /// Member count above which a guild is considered "large" (50–250).
    pub fn large_threshold(mut self, n: u32) -> Self {
        self.large_threshold = Some(n);
        self
    }

    /// Initial presence, forwarded opaquely in Identify.
    pub fn presence(mut self, presence: Value) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Ask the server for zlib-compressed payloads.
    pub fn compress(mut self, on: bool) -> Self {
        self.compress = on;
        self
    }

    /// Inject an alternate frame codec. Selection fails closed: without
    /// one, JSON is used.
    pub fn codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn hello_timeout(mut self, d: Duration) -> Self {
        self.hello_timeout = d;
        self
    }

    /// Pause between identify waves (the service expects ≥5 s).
    pub fn identify_delay(mut self, d: Duration) -> Self {
        self.identify_delay = d;
        self
    }

    pub fn wave_timeout(mut self, d: Duration) -> Self {
        self.wave_timeout = d;
        self
    }

    pub fn invalid_session_delay(mut self, min: Duration, max: Duration) -> Self {
        self.invalid_session_delay_min = min;
        self.invalid_session_delay_max = max;
        self
    }

    pub fn build(self) -> Result<GatewayConfig> {
        if self.token.is_empty() {
            return Err(GatewayError::Config("token is required".into()));
        }
        self.intents
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        if let Some(threshold) = self.large_threshold {
            if !(50..=250).contains(&threshold) {
                return Err(GatewayError::Config(format!(
                    "large_threshold must be within 50..=250, got {threshold}"
                )));
            }
        }
        if let ShardSelection::Count(0) = self.shards {
            return Err(GatewayError::Config("shard count must be non-zero".into()));
        }
        if let Some(0) = self.identify_concurrency {
            return Err(GatewayError::Config(
                "identify_concurrency must be non-zero".into(),
            ));
        }
        if self.invalid_session_delay_min > self.invalid_session_delay_max {
            return Err(GatewayError::Config(
                "invalid_session_delay_min exceeds max".into(),
            ));
        }

        Ok(GatewayConfig {
            token: self.token,
            intents: self.intents,
            gateway_url: self.gateway_url,
            shards: self.shards,
            identify_concurrency: self.identify_concurrency,
            large_threshold: self.large_threshold,
            presence: self.presence,
            properties: self.properties,
            compress: self.compress,
            codec: self.codec.unwrap_or_else(|| Arc::new(JsonCodec)),
            reconnect: self.reconnect,
            hello_timeout: self.hello_timeout,
            identify_delay: self.identify_delay,
            wave_timeout: self.wave_timeout,
            invalid_session_delay_min: self.invalid_session_delay_min,
            invalid_session_delay_max: self.invalid_session_delay_max,
        })
    }
}
