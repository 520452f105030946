//! Control plane client
//!
//! The control plane reports the proxy groups it manages and switches the node
//! that a group routes through. `ClashApi` talks to a Clash-compatible external
//! controller over HTTP.

mod clash;

pub use clash::ClashApi;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ProxiesPayload;

/// Operations the pool needs from the control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// List every group and proxy the control plane knows about
    async fn list_groups(&self) -> Result<ProxiesPayload>;

    /// Node currently active in `group`, as reported by the control plane
    async fn group_now(&self, group: &str) -> Result<Option<String>>;

    /// Make `node` the active node of `group`
    ///
    /// Fails with `PoolError::ControlPlane` when the control plane rejects the switch.
    async fn select(&self, group: &str, node: &str) -> Result<()>;
}
