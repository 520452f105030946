//! Per-node failure accounting
//!
//! The node set is fixed when the pool is created, so the counter map is built
//! once and only its atomic values change afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::models::NodeId;

/// Tracks consecutive failures of every node in the pool
#[derive(Debug)]
pub struct HealthTracker {
    nodes: Vec<NodeId>,
    failures: HashMap<NodeId, AtomicU32>,
    max_fail: u32,
}

impl HealthTracker {
    pub fn new(nodes: Vec<NodeId>, max_fail: u32) -> Self {
        let failures = nodes
            .iter()
            .map(|node| (node.clone(), AtomicU32::new(0)))
            .collect();

        Self {
            nodes,
            failures,
            max_fail,
        }
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn max_fail(&self) -> u32 {
        self.max_fail
    }

    pub fn contains(&self, node: &str) -> bool {
        self.failures.contains_key(node)
    }

    /// Reset the node's failure count
    pub fn record_success(&self, node: &str) {
        match self.failures.get(node) {
            Some(count) => count.store(0, Ordering::Release),
            None => debug!("Ignoring success for unknown node {}", node),
        }
    }

    /// Count one more failure against the node
    pub fn record_failure(&self, node: &str) {
        match self.failures.get(node) {
            Some(count) => {
                let _ = count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                    Some(c.saturating_add(1))
                });
            }
            None => debug!("Ignoring failure for unknown node {}", node),
        }
    }

    pub fn failures(&self, node: &str) -> Option<u32> {
        self.failures.get(node).map(|c| c.load(Ordering::Acquire))
    }

    /// A node is healthy while its failure count is below `max_fail`
    pub fn is_healthy(&self, node: &str) -> bool {
        self.failures(node).is_some_and(|c| c < self.max_fail)
    }

    /// Healthy nodes, in node-set order
    pub fn healthy_set(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| self.is_healthy(node.as_str()))
            .cloned()
            .collect()
    }
}
