//! `accord-rest` — Adaptive rate-limit controller and request pipeline for
//! the Accord HTTP API.
//!
//! The per-resource CRUD wrappers that make up the bulk of an API client
//! carry no logic of their own; they all funnel into one primitive here:
//! [`RestClient::request`], which derives the route's rate-limit key, waits
//! for admission from the shared [`BucketManager`], executes the call, feeds
//! the response headers back into the bucket state, and drives retries.
//!
//! # Bucket discovery
//!
//! Buckets are keyed by route template until the server reveals its own
//! bucket id for a route, at which point the route is aliased onto that id
//! and every route sharing the limit converges on one bucket. Expired
//! buckets are swept periodically and recreated on demand.

pub mod bucket;
pub mod client;
pub mod error;
pub mod manager;
pub mod routes;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use bucket::{RateBucket, RateLimitBody, RateLimitInfo, RateLimitScope};
pub use client::{ApiResponse, GatewayBot, RestClient, RestClientBuilder, SessionStartLimit};
pub use error::{RestError, Result};
pub use manager::BucketManager;
pub use routes::Route;
