use localport_commons::models::service_model::ServiceDescriptor;

/// Outcome of diffing a freshly loaded config against the current registry,
/// keyed by service name. `changed` pairs the registered descriptor with
/// its replacement; `unchanged` keeps the registered descriptor so service
/// ids stay stable across reloads.
#[derive(Debug, Default)]
pub struct ServiceDiff {
    pub added: Vec<ServiceDescriptor>,
    pub removed: Vec<ServiceDescriptor>,
    pub changed: Vec<(ServiceDescriptor, ServiceDescriptor)>,
    pub unchanged: Vec<ServiceDescriptor>,
}

impl ServiceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub fn diff_services(current: &[ServiceDescriptor], loaded: &[ServiceDescriptor]) -> ServiceDiff {
    let mut diff = ServiceDiff::default();

    for service in loaded {
        match current.iter().find(|c| c.name == service.name) {
            None => diff.added.push(service.clone()),
            Some(existing) if existing.same_definition(service) => {
                diff.unchanged.push(existing.clone());
            }
            Some(existing) => diff.changed.push((existing.clone(), service.clone())),
        }
    }

    for service in current {
        if !loaded.iter().any(|l| l.name == service.name) {
            diff.removed.push(service.clone());
        }
    }

    diff
}
