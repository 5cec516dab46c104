use std::collections::HashMap;
use std::sync::Arc;

use common::PaymentMethod;

use crate::adapter::PaymentAdapter;

/// Adapters keyed by the payment method they serve.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<PaymentMethod, Arc<dyn PaymentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous one for its method.
    pub fn register(&mut self, adapter: Arc<dyn PaymentAdapter>) {
        self.adapters.insert(adapter.method(), adapter);
    }

    pub fn with(mut self, adapter: impl PaymentAdapter + 'static) -> Self {
        self.register(Arc::new(adapter));
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentAdapter>> {
        self.adapters.get(&method).cloned()
    }

    pub fn supports(&self, method: PaymentMethod) -> bool {
        self.adapters.contains_key(&method)
    }
}
