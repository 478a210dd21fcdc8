// ABOUTME: Registry pattern for runtime transport selection.
// ABOUTME: Transports register factories, the orchestrator resolves one by name from config.

use crate::transport::TransportFactory;
use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Registry for runtime transport selection
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a transport factory by name
    pub fn register(mut self, name: &str, factory: TransportFactory) -> Self {
        self.factories.insert(name.to_string(), factory);
        self
    }

    /// Look up the factory registered under `name`
    pub fn resolve(&self, name: &str) -> Result<TransportFactory> {
        self.factories.get(name).cloned().ok_or_else(|| {
            let mut available = self.available();
            available.sort_unstable();
            anyhow!(
                "Unknown agent transport: {} (available: {})",
                name,
                available.join(", ")
            )
        })
    }

    /// List available transport names
    pub fn available(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        use crate::backends::mock::MockTransport;

        let registry = Self::new().register("mock", MockTransport::new().factory());

        #[cfg(feature = "acp")]
        let registry = {
            use crate::backends::acp::AcpTransport;
            registry.register("acp", AcpTransport::factory())
        };

        registry
    }
}
