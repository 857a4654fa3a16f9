use std::collections::HashMap;

use localport_commons::models::service_model::ServiceDescriptor;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service '{0}' is already registered")]
    DuplicateName(String),
}

/// In-memory set of declared services keyed by id, unique by name. The
/// registry holds descriptors only; runtime state lives in the manager.
pub struct ServiceRegistry {
    services: RwLock<HashMap<Uuid, ServiceDescriptor>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, descriptor: ServiceDescriptor) -> Result<(), RegistryError> {
        let mut services = self.services.write().await;

        let name_taken = services
            .values()
            .any(|s| s.name == descriptor.name && s.id != descriptor.id);
        if name_taken {
            return Err(RegistryError::DuplicateName(descriptor.name));
        }

        services.insert(descriptor.id, descriptor);
        Ok(())
    }

    /// Swaps the whole set, e.g. after a config (re)load. The incoming set
    /// is assumed pre-validated for name uniqueness.
    pub async fn replace_all(&self, descriptors: Vec<ServiceDescriptor>) {
        let mut services = self.services.write().await;
        services.clear();
        for descriptor in descriptors {
            services.insert(descriptor.id, descriptor);
        }
    }

    pub async fn remove(&self, id: Uuid) -> Option<ServiceDescriptor> {
        self.services.write().await.remove(&id)
    }

    pub async fn remove_by_name(&self, name: &str) -> Option<ServiceDescriptor> {
        let mut services = self.services.write().await;
        let id = services
            .values()
            .find(|s| s.name == name)
            .map(|s| s.id)?;
        services.remove(&id)
    }

    pub async fn get(&self, id: Uuid) -> Option<ServiceDescriptor> {
        self.services.read().await.get(&id).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<ServiceDescriptor> {
        self.services
            .read()
            .await
            .values()
            .find(|s| s.name == name)
            .cloned()
    }

    pub async fn find_all(&self) -> Vec<ServiceDescriptor> {
        let mut all: Vec<ServiceDescriptor> = self.services.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn find_by_tag(&self, tag: &str) -> Vec<ServiceDescriptor> {
        let mut matching: Vec<ServiceDescriptor> = self
            .services
            .read()
            .await
            .values()
            .filter(|s| s.has_tag(tag))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        matching
    }

    /// Resolves names to descriptors, reporting unknown names separately so
    /// callers can fail with a useful message.
    pub async fn find_by_names(
        &self, names: &[String],
    ) -> (Vec<ServiceDescriptor>, Vec<String>) {
        let services = self.services.read().await;
        let mut found = Vec::new();
        let mut missing = Vec::new();

        for name in names {
            match services.values().find(|s| &s.name == name) {
                Some(descriptor) => found.push(descriptor.clone()),
                None => missing.push(name.clone()),
            }
        }
        (found, missing)
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use localport_commons::models::service_model::ForwardingTechnology;

    use super::*;

    fn descriptor(name: &str, port: u16) -> ServiceDescriptor {
        ServiceDescriptor::new(name, ForwardingTechnology::Ssh, port, port)
    }

    #[tokio::test]
    async fn test_insert_enforces_unique_names() {
        let registry = ServiceRegistry::new();
        registry.insert(descriptor("pg", 5432)).await.unwrap();

        let err = registry.insert(descriptor("pg", 5433)).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reinserting_same_service_updates_in_place() {
        let registry = ServiceRegistry::new();
        let mut service = descriptor("pg", 5432);
        registry.insert(service.clone()).await.unwrap();

        service.remote_port = 5433;
        registry.insert(service).await.unwrap();

        assert_eq!(registry.len().await, 1);
        let stored = registry.get_by_name("pg").await.unwrap();
        assert_eq!(stored.remote_port, 5433);
    }

    #[tokio::test]
    async fn test_find_by_names_reports_missing() {
        let registry = ServiceRegistry::new();
        registry.insert(descriptor("pg", 5432)).await.unwrap();

        let names = vec!["pg".to_string(), "redis".to_string()];
        let (found, missing) = registry.find_by_names(&names).await;

        assert_eq!(found.len(), 1);
        assert_eq!(missing, vec!["redis".to_string()]);
    }

    #[tokio::test]
    async fn test_find_by_tag() {
        let registry = ServiceRegistry::new();
        let mut tagged = descriptor("pg", 5432);
        tagged.tags.push("db".to_string());
        registry.insert(tagged).await.unwrap();
        registry.insert(descriptor("api", 8080)).await.unwrap();

        let matching = registry.find_by_tag("db").await;
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].name, "pg");
    }

    #[tokio::test]
    async fn test_find_all_is_name_sorted() {
        let registry = ServiceRegistry::new();
        registry.insert(descriptor("zebra", 1)).await.unwrap();
        registry.insert(descriptor("api", 2)).await.unwrap();

        let all = registry.find_all().await;
        assert_eq!(all[0].name, "api");
        assert_eq!(all[1].name, "zebra");
    }
}
