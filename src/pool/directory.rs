use std::sync::Arc;

use tracing::{info, warn};

use crate::control::ControlPlane;
use crate::error::{PoolError, Result};
use crate::models::{NodeId, ReservedTokens};

/// Group name that asks the directory to pick the group itself
pub const AUTO_GROUP: &str = "auto";

/// Discovers usable nodes of a control plane group
pub struct NodeDirectory {
    control: Arc<dyn ControlPlane>,
    group: String,
    reserved: ReservedTokens,
}

impl NodeDirectory {
    pub fn new(control: Arc<dyn ControlPlane>, group: impl Into<String>, reserved: ReservedTokens) -> Self {
        Self {
            control,
            group: group.into(),
            reserved,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Resolve the `auto` group to a concrete one; other names are kept as given.
    pub async fn resolve_group(&mut self) -> Result<()> {
        if self.group.eq_ignore_ascii_case(AUTO_GROUP) {
            self.group = self.detect_group().await?;
        }
        Ok(())
    }

    /// First group, in name order, that lists member nodes
    pub async fn detect_group(&self) -> Result<String> {
        let payload = self.control.list_groups().await.map_err(configuration)?;

        let group = payload
            .proxies
            .into_iter()
            .find(|(_, info)| info.all.is_some())
            .map(|(name, _)| name)
            .ok_or_else(|| {
                PoolError::Configuration("No proxy group with member nodes found".into())
            })?;

        info!("Detected proxy group {}", group);
        Ok(group)
    }

    /// Usable nodes of the configured group, reserved tokens removed
    pub async fn fetch_nodes(&self) -> Result<Vec<NodeId>> {
        let mut payload = self.control.list_groups().await.map_err(configuration)?;

        let all = payload
            .proxies
            .remove(&self.group)
            .and_then(|info| info.all)
            .ok_or_else(|| {
                PoolError::Configuration(format!("Group {} not found or has no nodes", self.group))
            })?;

        let mut nodes: Vec<NodeId> = Vec::with_capacity(all.len());
        for id in all {
            if self.reserved.is_reserved(&id) || nodes.iter().any(|n| n.as_str() == id) {
                continue;
            }
            nodes.push(NodeId::from(id));
        }

        if nodes.is_empty() {
            return Err(PoolError::Configuration(format!(
                "Group {} has no usable nodes",
                self.group
            )));
        }

        info!("Found {} usable nodes in group {}", nodes.len(), self.group);
        Ok(nodes)
    }

    /// Node the control plane currently routes the group through.
    ///
    /// Best effort: failures and reserved tokens yield `None`.
    pub async fn query_current_node(&self) -> Option<NodeId> {
        match self.control.group_now(&self.group).await {
            Ok(Some(now)) if !self.reserved.is_reserved(&now) => Some(NodeId::from(now)),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to query current node of {}: {}", self.group, e);
                None
            }
        }
    }
}

fn configuration(err: PoolError) -> PoolError {
    match err {
        PoolError::Configuration(_) => err,
        other => PoolError::Configuration(format!("Failed to list proxy groups: {}", other)),
    }
}
