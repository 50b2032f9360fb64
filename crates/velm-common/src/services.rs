//! Request-scoped service resolution for injected static-command arguments.

use rustc_hash::FxHashMap;

use crate::types::TypeId;
use crate::value::ServiceRef;

/// A flat, request-scoped service container keyed by registered type.
///
/// The hosting layer builds one per request; the static-command engine only
/// reads from it.
#[derive(Default)]
pub struct ServiceProvider {
    services: FxHashMap<TypeId, ServiceRef>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        ServiceProvider::default()
    }

    pub fn register(&mut self, service_type: TypeId, service: ServiceRef) {
        self.services.insert(service_type, service);
    }

    pub fn register_instance<T: std::any::Any + Send + Sync>(
        &mut self,
        service_type: TypeId,
        instance: T,
    ) {
        self.register(service_type, ServiceRef::new(instance));
    }

    pub fn get(&self, service_type: TypeId) -> Option<ServiceRef> {
        self.services.get(&service_type).cloned()
    }
}
