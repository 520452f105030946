use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::health::HealthTracker;
use crate::control::ControlPlane;
use crate::error::{PoolError, Result};
use crate::models::NodeId;

/// Picks healthy nodes and activates them on the control plane.
///
/// Decide-and-activate runs under one pool-wide async lock so concurrent callers
/// cannot pick different nodes and leave `current` disagreeing with the control
/// plane. The lock covers the control plane call only, never request traffic.
pub struct NodeSwitcher {
    control: Arc<dyn ControlPlane>,
    health: Arc<HealthTracker>,
    group: String,
    current: RwLock<Option<NodeId>>,
    switch_lock: Mutex<()>,
}

impl NodeSwitcher {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        health: Arc<HealthTracker>,
        group: impl Into<String>,
        current: Option<NodeId>,
    ) -> Self {
        // An active node outside the usable set is treated as unknown.
        let current = current.filter(|node| health.contains(node.as_str()));

        Self {
            control,
            health,
            group: group.into(),
            current: RwLock::new(current),
            switch_lock: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Option<NodeId> {
        self.current.read().clone()
    }

    /// Activate a random healthy node
    #[instrument(skip(self), fields(group = %self.group))]
    pub async fn switch_node(&self) -> Result<NodeId> {
        let _guard = self.switch_lock.lock().await;

        let healthy = self.health.healthy_set();
        let node = {
            let mut rng = rand::thread_rng();
            healthy.choose(&mut rng).cloned()
        }
        .ok_or(PoolError::NoHealthyNode)?;

        self.activate(node).await
    }

    /// Activate a specific node regardless of its health
    #[instrument(skip(self), fields(group = %self.group))]
    pub async fn switch_to(&self, node: &str) -> Result<NodeId> {
        if !self.health.contains(node) {
            return Err(PoolError::UnknownNode(node.to_string()));
        }

        let _guard = self.switch_lock.lock().await;
        self.activate(NodeId::from(node)).await
    }

    /// Caller holds `switch_lock`
    async fn activate(&self, node: NodeId) -> Result<NodeId> {
        match self.control.select(&self.group, node.as_str()).await {
            Ok(()) => {
                *self.current.write() = Some(node.clone());
                info!("Switched to node {}", node);
                Ok(node)
            }
            Err(e) => {
                warn!("Failed to switch to node {}: {}", node, e);
                Err(e)
            }
        }
    }
}
