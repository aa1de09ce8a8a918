use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

pub struct Cache<K, V> {
    inner: LruCache<K, V>,
}

impl<K: std::hash::Hash + Eq, V> Cache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Cache {
            inner: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.inner.put(key, value);
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

/// Models that can be cached by id and by handle
pub trait CachedModel: Clone + Send {
    fn cache_id(&self) -> i64;
    fn cache_handle(&self) -> &str;
}

struct ModelCacheState<M> {
    by_id: Cache<i64, M>,
    by_handle: Cache<String, i64>,
    all: Option<Vec<M>>,
}

/// Process-local repository cache for fields and collections.
///
/// Lookups that miss are not remembered; a local mutation writes through
/// (`put` / `remove`) and drops the cached all-models list.
pub struct ModelCache<M> {
    state: Mutex<ModelCacheState<M>>,
}

impl<M: CachedModel> ModelCache<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ModelCacheState {
                by_id: Cache::new(capacity),
                by_handle: Cache::new(capacity),
                all: None,
            }),
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Option<M> {
        self.state.lock().await.by_id.get(&id).cloned()
    }

    pub async fn get_by_handle(&self, handle: &str) -> Option<M> {
        let mut state = self.state.lock().await;
        let id = *state.by_handle.get(&handle.to_ascii_lowercase())?;
        let model = state.by_id.get(&id).cloned()?;
        // a renamed model may still be indexed under its old handle
        model.cache_handle().eq_ignore_ascii_case(handle).then_some(model)
    }

    pub async fn all(&self) -> Option<Vec<M>> {
        self.state.lock().await.all.clone()
    }

    pub async fn put(&self, model: M) {
        let mut state = self.state.lock().await;
        Self::index(&mut state, model);
        state.all = None;
    }

    pub async fn put_all(&self, models: Vec<M>) {
        let mut state = self.state.lock().await;
        for model in &models {
            Self::index(&mut state, model.clone());
        }
        state.all = Some(models);
    }

    pub async fn remove(&self, id: i64) {
        let mut state = self.state.lock().await;
        if let Some(model) = state.by_id.remove(&id) {
            state
                .by_handle
                .remove(&model.cache_handle().to_ascii_lowercase());
        }
        state.all = None;
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.by_id.clear();
        state.by_handle.clear();
        state.all = None;
    }

    fn index(state: &mut ModelCacheState<M>, model: M) {
        let id = model.cache_id();
        state
            .by_handle
            .insert(model.cache_handle().to_ascii_lowercase(), id);
        state.by_id.insert(id, model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Named {
        id: i64,
        handle: String,
    }

    impl CachedModel for Named {
        fn cache_id(&self) -> i64 {
            self.id
        }

        fn cache_handle(&self) -> &str {
            &self.handle
        }
    }

    fn named(id: i64, handle: &str) -> Named {
        Named { id, handle: handle.to_string() }
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = Cache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(3, "c");
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get(&3), Some(&"c"));
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_handle() {
        let cache = ModelCache::new(10);
        cache.put(named(1, "quality")).await;

        assert_eq!(cache.get_by_id(1).await, Some(named(1, "quality")));
        assert_eq!(cache.get_by_handle("Quality").await, Some(named(1, "quality")));
        assert!(cache.get_by_handle("value").await.is_none());
    }

    #[tokio::test]
    async fn test_renamed_model_is_not_found_by_old_handle() {
        let cache = ModelCache::new(10);
        cache.put(named(1, "quality")).await;
        cache.put(named(1, "craftsmanship")).await;

        assert!(cache.get_by_handle("quality").await.is_none());
        assert_eq!(cache.get_by_handle("craftsmanship").await.map(|m| m.id), Some(1));
    }

    #[tokio::test]
    async fn test_put_drops_all_list() {
        let cache = ModelCache::new(10);
        cache.put_all(vec![named(1, "a"), named(2, "b")]).await;
        assert_eq!(cache.all().await.map(|all| all.len()), Some(2));

        cache.put(named(3, "c")).await;
        assert!(cache.all().await.is_none());

        cache.remove(1).await;
        assert!(cache.get_by_id(1).await.is_none());
        assert!(cache.get_by_handle("a").await.is_none());
    }
}
