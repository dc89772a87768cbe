//! Per-invocation data-loader registry.
//!
//! The gateway never looks inside a registry: it only obtains a fresh one from the configured
//! [`DataLoaderRegistryProvider`] for every invocation and hands it to the engine through the
//! [`crate::ExecutionRequest`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

/// Named, type-erased loaders shared by the resolvers of one execution.
#[derive(Clone, Default)]
pub struct DataLoaderRegistry {
    loaders: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl DataLoaderRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `loader` under `name`, replacing any previous loader with that name.
    pub fn register<L>(&self, name: impl Into<String>, loader: L) -> &Self
    where
        L: Any + Send + Sync,
    {
        self.loaders.insert(name.into(), Arc::new(loader));
        self
    }

    /// Returns the loader registered under `name` if it has type `L`.
    pub fn get<L>(&self, name: &str) -> Option<Arc<L>>
    where
        L: Any + Send + Sync,
    {
        self.loaders
            .get(name)
            .and_then(|loader| loader.value().clone().downcast::<L>().ok())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.loaders.iter().map(|l| l.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Whether both handles point at the same registry instance.
    pub fn ptr_eq(&self, other: &DataLoaderRegistry) -> bool {
        Arc::ptr_eq(&self.loaders, &other.loaders)
    }
}

impl fmt::Debug for DataLoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoaderRegistry")
            .field("loaders", &self.keys())
            .finish()
    }
}

/// Supplies a new [`DataLoaderRegistry`] for each invocation.
pub trait DataLoaderRegistryProvider: Send + Sync + 'static {
    fn get(&self) -> DataLoaderRegistry;
}

impl<F> DataLoaderRegistryProvider for F
where
    F: Fn() -> DataLoaderRegistry + Send + Sync + 'static,
{
    fn get(&self) -> DataLoaderRegistry {
        (self)()
    }
}
