//! Keyed service registry: one [`SearchService`] per resolved store path

use super::SearchService;
use crate::config::Config;
use crate::error::{SeekError, SeekResult};
use crate::paths::PlatformPaths;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Instances = Mutex<HashMap<PathBuf, Arc<SearchService>>>;

/// Back-reference a service uses to leave its registry on dispose
pub(crate) struct Registration {
    instances: Weak<Instances>,
    key: PathBuf,
}

impl Registration {
    /// Remove `service` unless the key already points at a newer instance
    pub(crate) fn remove(&self, service: &SearchService) {
        let Some(instances) = self.instances.upgrade() else {
            return;
        };
        let Ok(mut map) = instances.lock() else {
            return;
        };
        if map
            .get(&self.key)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), service))
        {
            map.remove(&self.key);
            tracing::debug!("Unregistered service for {}", self.key.display());
        }
    }
}

/// Map from store path to the service that owns it
///
/// Lookup and creation happen under one short-lived lock; services are initialized by the
/// caller afterwards.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    instances: Arc<Instances>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry key of a configuration
    pub fn key_for(config: &Config) -> PathBuf {
        PlatformPaths::resolve(&config.store.path)
    }

    fn lock(&self) -> SeekResult<MutexGuard<'_, HashMap<PathBuf, Arc<SearchService>>>> {
        self.instances
            .lock()
            .map_err(|_| SeekError::other("service registry lock poisoned"))
    }

    /// Existing service for the configured store path, or a new registered one
    pub fn get_instance(&self, config: Config) -> SeekResult<Arc<SearchService>> {
        self.get_instance_with(config, SearchService::new)
    }

    /// Like [`get_instance`](Self::get_instance), building new services with `build`
    pub fn get_instance_with(
        &self,
        config: Config,
        build: impl FnOnce(Config) -> SearchService,
    ) -> SeekResult<Arc<SearchService>> {
        let key = Self::key_for(&config);
        let mut instances = self.lock()?;
        if let Some(existing) = instances.get(&key) {
            return Ok(existing.clone());
        }

        let service = Arc::new(build(config).registered(Registration {
            instances: Arc::downgrade(&self.instances),
            key: key.clone(),
        }));
        tracing::debug!("Registered service for {}", key.display());
        instances.insert(key, service.clone());
        Ok(service)
    }

    /// Forget the service of a store path without disposing it
    pub fn remove_instance(&self, store_path: &Path) -> Option<Arc<SearchService>> {
        let key = PlatformPaths::resolve(store_path);
        self.lock().ok()?.remove(&key)
    }

    pub fn contains(&self, store_path: &Path) -> bool {
        let key = PlatformPaths::resolve(store_path);
        self.lock().is_ok_and(|map| map.contains_key(&key))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every registered service
    pub async fn dispose_all(&self) {
        let services: Vec<Arc<SearchService>> = match self.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for service in services {
            service.dispose().await;
        }
    }
}
