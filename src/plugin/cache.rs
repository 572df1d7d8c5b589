use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{content_digest, LoadError, ModuleLoader, ToolModule};
use crate::models::ToolRecord;

/// Process-wide map of loaded tool modules, keyed by tool id.
///
/// The persisted record is the source of truth: an entry whose digest no longer
/// matches the record's content is reloaded on the next lookup.
#[derive(Debug, Clone, Default)]
pub struct ModuleCache {
    modules: Arc<RwLock<HashMap<String, Arc<ToolModule>>>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ToolModule>> {
        self.modules.read().await.get(id).cloned()
    }

    // 后写入者覆盖
    pub async fn insert(&self, module: ToolModule) -> Arc<ToolModule> {
        let module = Arc::new(module);
        self.modules
            .write()
            .await
            .insert(module.id.clone(), module.clone());
        module
    }

    pub async fn evict(&self, id: &str) -> bool {
        self.modules.write().await.remove(id).is_some()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.modules.read().await.len()
    }

    /// Returns the cached module for `tool`, loading it from the persisted content when
    /// it is missing or stale.
    pub async fn get_or_load(
        &self,
        loader: &dyn ModuleLoader,
        tool: &ToolRecord,
    ) -> Result<Arc<ToolModule>, LoadError> {
        if let Some(module) = self.get(&tool.id).await {
            if module.digest == content_digest(&tool.content) {
                return Ok(module);
            }
            info!("Cached module for tool {} is stale, reloading", tool.id);
        }

        let (module, _) = loader.load_module(&tool.id, &tool.content)?;
        Ok(self.insert(module).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use crate::models::ToolMeta;
    use crate::plugin::ManifestLoader;

    fn record(content: &str) -> ToolRecord {
        ToolRecord {
            id: "calc".to_string(),
            user_id: "u1".to_string(),
            name: "Calc".to_string(),
            content: content.to_string(),
            specs: vec![],
            meta: ToolMeta::default(),
            access_control: None,
            updated_at: 0,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_get_or_load_caches_module() {
        let cache = ModuleCache::new();
        let loader = ManifestLoader::new(&PluginConfig::default()).unwrap();
        let tool = record(r#"{"functions": [{"name": "add"}]}"#);

        let first = cache.get_or_load(&loader, &tool).await.unwrap();
        let second = cache.get_or_load(&loader, &tool).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_stale_module_is_reloaded() {
        let cache = ModuleCache::new();
        let loader = ManifestLoader::new(&PluginConfig::default()).unwrap();

        let old = cache
            .get_or_load(&loader, &record(r#"{"functions": [{"name": "add"}]}"#))
            .await
            .unwrap();
        let new = cache
            .get_or_load(&loader, &record(r#"{"functions": [{"name": "sub"}]}"#))
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.functions[0].name, "sub");
    }

    #[tokio::test]
    async fn test_evict() {
        let cache = ModuleCache::new();
        cache
            .insert(ToolModule {
                id: "calc".to_string(),
                ..Default::default()
            })
            .await;

        assert!(cache.evict("calc").await);
        assert!(!cache.evict("calc").await);
        assert!(cache.get("calc").await.is_none());
    }

    #[tokio::test]
    async fn test_load_failure_leaves_cache_untouched() {
        let cache = ModuleCache::new();
        let loader = ManifestLoader::new(&PluginConfig::default()).unwrap();

        let result = cache.get_or_load(&loader, &record("{ broken")).await;
        assert!(result.is_err());
        assert_eq!(cache.len().await, 0);
    }
}
