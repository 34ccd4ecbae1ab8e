use std::sync::Arc;

use tracing::debug;

use crate::types::NodeHandle;
use crate::{ClusterApi, Error, Result};

/// Cluster membership, read fresh on every call.
#[derive(Clone)]
pub struct ClusterTopology {
    api: Arc<dyn ClusterApi>,
}

impl ClusterTopology {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeHandle>> {
        self.api.list_nodes().await
    }

    /// Pick the node new containers are placed on.
    ///
    /// A single-node cluster always answers with its only member. Otherwise
    /// the preferred node wins when it exists, falling back to the first
    /// node in listing order.
    pub async fn resolve_operating_node(&self, preferred: Option<&str>) -> Result<NodeHandle> {
        let mut nodes = self.list_nodes().await?;

        if nodes.len() == 1 {
            return Ok(nodes.remove(0));
        }

        if let Some(name) = preferred
            && let Some(pos) = nodes.iter().position(|n| n.name == name)
        {
            return Ok(nodes.swap_remove(pos));
        }

        if nodes.is_empty() {
            return Err(Error::NoNodesAvailable);
        }
        debug!(
            preferred = preferred.unwrap_or_default(),
            node = %nodes[0],
            "preferred node not in cluster, using first listed"
        );
        Ok(nodes.remove(0))
    }
}
