//! Lookup of configured upstreams by data-source handle.

use std::collections::HashMap;
use std::sync::Arc;

use bulkpull_types::DataSourceHandle;

use super::{HttpSearchProvider, SearchProvider};
use crate::config::SourceConfig;
use crate::error::UpstreamError;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SearchProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP providers for every configured source.
    pub fn from_sources(sources: &[SourceConfig]) -> Result<Self, UpstreamError> {
        let mut registry = Self::new();
        for source in sources {
            let provider = HttpSearchProvider::from_config(source)?;
            registry.insert(source.name.clone(), Arc::new(provider));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: impl Into<String>, provider: Arc<dyn SearchProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn with(mut self, name: impl Into<String>, provider: Arc<dyn SearchProvider>) -> Self {
        self.insert(name, provider);
        self
    }

    pub fn get(&self, handle: &DataSourceHandle) -> Option<Arc<dyn SearchProvider>> {
        self.providers.get(handle.as_str()).cloned()
    }

    pub fn contains(&self, handle: &DataSourceHandle) -> bool {
        self.providers.contains_key(handle.as_str())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
