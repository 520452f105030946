//! Clashpool - Resilient requests over a rotating Clash node pool
//!
//! Outbound HTTP requests go direct until the origin signals a block (HTTP 412).
//! From then on they are routed through a local Clash forward proxy, whose active
//! node is rotated through the Clash external controller whenever a node fails.
//!
//! ## Features
//!
//! - Node discovery from a Clash selector group, with reserved tokens filtered out
//! - Per-node failure counters and random switching among healthy nodes
//! - Retry loop with linear backoff and one-way escalation to proxied mode
//! - HTTP and SOCKS5 egress proxies
//! - Egress IP probing through an IP echo service

pub mod config;
pub mod control;
pub mod error;
pub mod models;
pub mod pool;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use control::{ClashApi, ControlPlane};
pub use error::{PoolError, Result};
pub use models::NodeId;
pub use pool::ProxyPool;
pub use retry::{RequestRetrier, RetryPolicy, RetryRequest};
