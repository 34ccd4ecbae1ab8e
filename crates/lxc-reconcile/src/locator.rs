use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::topology::ClusterTopology;
use crate::types::ContainerHandle;
use crate::{ClusterApi, Error, Result};

/// Finds which node hosts a container, remembering the answer for the run.
///
/// Entries are inserted once per container ID and never evicted.
pub struct ContainerLocator {
    api: Arc<dyn ClusterApi>,
    topology: ClusterTopology,
    cache: HashMap<u32, ContainerHandle>,
}

impl ContainerLocator {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            topology: ClusterTopology::new(api.clone()),
            api,
            cache: HashMap::new(),
        }
    }

    /// Probe every node in listing order; the first one that knows the
    /// container wins. `None` once all nodes answered "not found".
    pub async fn locate(&mut self, vmid: u32) -> Result<Option<ContainerHandle>> {
        if let Some(handle) = self.cache.get(&vmid) {
            return Ok(Some(handle.clone()));
        }

        let nodes = self.topology.list_nodes().await?;
        if nodes.is_empty() {
            return Err(Error::NoNodesAvailable);
        }

        for node in nodes {
            match self.api.get_container_config(&node, vmid).await {
                Ok(_) => {
                    debug!(vmid, node = %node, "container located");
                    let handle = ContainerHandle { vmid, node };
                    return Ok(Some(self.remember(handle)));
                }
                Err(Error::NotFound(_)) => {
                    debug!(vmid, node = %node, "container not on node");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Record where a container lives. An existing entry is kept.
    pub fn remember(&mut self, handle: ContainerHandle) -> ContainerHandle {
        self.cache.entry(handle.vmid).or_insert(handle).clone()
    }
}
