use super::{BurdockManager, ManagerError};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

/// Kernel ids are dashed five-part ids, e.g. uuids.
static KERNEL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+-\w+-\w+-\w+-\w+$").unwrap());

/// All live managers, keyed by kernel id.
#[derive(Default)]
pub struct ManagerRegistry {
    instances: RwLock<BTreeMap<String, Arc<BurdockManager>>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_instance(
        &self,
        kernel_id: &str,
        manager: BurdockManager,
    ) -> Result<Arc<BurdockManager>, ManagerError> {
        if !KERNEL_ID_RE.is_match(kernel_id) {
            return Err(ManagerError::InvalidKernelId {
                kernel_id: kernel_id.to_string(),
            });
        }

        let mut instances = self.instances.write();
        if instances.contains_key(kernel_id) {
            return Err(ManagerError::AlreadyExists {
                kernel_id: kernel_id.to_string(),
            });
        }
        let manager = Arc::new(manager);
        instances.insert(kernel_id.to_string(), Arc::clone(&manager));
        tracing::info!(kernel_id, "manager created");
        Ok(manager)
    }

    pub fn get(&self, kernel_id: &str) -> Result<Arc<BurdockManager>, ManagerError> {
        self.instances
            .read()
            .get(kernel_id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound {
                kernel_id: kernel_id.to_string(),
            })
    }

    pub fn remove(&self, kernel_id: &str) -> Result<Arc<BurdockManager>, ManagerError> {
        let removed = self.instances.write().remove(kernel_id);
        let manager = removed.ok_or_else(|| ManagerError::NotFound {
            kernel_id: kernel_id.to_string(),
        })?;
        tracing::info!(kernel_id, "manager removed");
        Ok(manager)
    }

    pub fn contains(&self, kernel_id: &str) -> bool {
        self.instances.read().contains_key(kernel_id)
    }

    pub fn kernel_ids(&self) -> Vec<String> {
        self.instances.read().keys().cloned().collect()
    }

    /// JSON model of one instance: `{"id", "installed"}`.
    pub fn instance_model(&self, kernel_id: &str) -> Result<Value, ManagerError> {
        let manager = self.get(kernel_id)?;
        Ok(json!({
            "id": kernel_id,
            "installed": manager.is_installed(),
        }))
    }

    pub fn list_instances(&self) -> Vec<Value> {
        self.instances
            .read()
            .iter()
            .map(|(kernel_id, manager)| {
                json!({
                    "id": kernel_id,
                    "installed": manager.is_installed(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::KernelClient;
    use crate::message::Session;
    use crate::transport::loopback;

    const KERNEL_ID: &str = "0f6c3c86-8d9e-4c55-9d1e-3f0a2b1c4d5e";

    fn manager() -> BurdockManager {
        let (transport, inbound, _kernel) = loopback(4);
        BurdockManager::new(KernelClient::start(Arc::new(transport), inbound, Session::new("t")))
    }

    #[tokio::test]
    async fn create_get_remove() {
        let registry = ManagerRegistry::new();
        registry.create_instance(KERNEL_ID, manager()).unwrap();

        assert!(registry.contains(KERNEL_ID));
        assert_eq!(
            registry.instance_model(KERNEL_ID).unwrap(),
            json!({"id": KERNEL_ID, "installed": false})
        );
        assert_eq!(registry.list_instances().len(), 1);

        registry.remove(KERNEL_ID).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.get(KERNEL_ID).err().map(|e| e.status_code()), Some(404));
    }

    #[tokio::test]
    async fn rejects_duplicates_and_malformed_ids() {
        let registry = ManagerRegistry::new();
        registry.create_instance(KERNEL_ID, manager()).unwrap();

        let duplicate = registry.create_instance(KERNEL_ID, manager()).err().unwrap();
        assert!(matches!(duplicate, ManagerError::AlreadyExists { .. }));

        let malformed = registry.create_instance("not-a-kernel", manager()).err().unwrap();
        assert!(matches!(malformed, ManagerError::InvalidKernelId { .. }));
        assert_eq!(registry.len(), 1);
    }
}
