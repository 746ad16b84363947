use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

/// Key→client map owned by whoever hosts the assistant and passed in at
/// construction. Clients are built once per key and shared read-only.
pub struct ClientCache<C> {
    clients: Mutex<HashMap<String, Arc<C>>>,
}

impl<C> Default for ClientCache<C> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> ClientCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client for `key`, building it with `build` on first use.
    /// A failed build is not cached.
    pub fn get_or_try_insert_with<F>(&self, key: &str, build: F) -> Result<Arc<C>>
    where
        F: FnOnce() -> Result<C>,
    {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(c) = clients.get(key) {
            return Ok(Arc::clone(c));
        }
        let client = Arc::new(build()?);
        clients.insert(key.to_string(), Arc::clone(&client));
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_once_per_key() {
        let cache: ClientCache<String> = ClientCache::new();
        let mut builds = 0;
        let a = cache
            .get_or_try_insert_with("gemini:key-1", || {
                builds += 1;
                Ok("client-1".to_string())
            })
            .unwrap();
        let b = cache
            .get_or_try_insert_with("gemini:key-1", || {
                builds += 1;
                Ok("client-2".to_string())
            })
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_not_cached() {
        let cache: ClientCache<String> = ClientCache::new();
        assert!(cache
            .get_or_try_insert_with("k", || anyhow::bail!("no credentials"))
            .is_err());
        assert!(cache.is_empty());
        cache.get_or_try_insert_with("k", || Ok("ok".to_string())).unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
