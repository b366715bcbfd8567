//! Cache chain for Strata.
//!
//! A [`CacheChain`] stacks repository tiers above an authoritative backing
//! store and presents them as a single [`Repository`](strata_store::Repository).
//! Typical stacks are a per-request memory cache, an optional access log
//! that records what the request touched, and the log-backed store.
//!
//! # Modules
//!
//! - [`chain`]: [`CacheChain`] and its builder
//! - [`tiers`]: [`CacheTier`] and the built-in tiers
//! - [`config`]: [`CacheConfig`]

pub mod chain;
pub mod config;
pub mod tiers;

pub use chain::{CacheChain, CacheChainBuilder};
pub use config::CacheConfig;
pub use tiers::{
    AccessKind, AccessLog, AccessLogTier, AccessRecord, BackingTier, CacheTier, RequestCacheTier,
};
