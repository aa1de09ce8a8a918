// Field-Version Gate - values derived from the field catalog, valid for one token
// A changed token means the catalog was edited, possibly by another process

use std::sync::Arc;
use tokio::sync::Mutex;

struct Generation<T> {
    token: Option<String>,
    value: Option<Arc<T>>,
}

/// Holds a value built against one field-version token.
pub struct FieldVersionGate<T> {
    generation: Mutex<Generation<T>>,
}

impl<T> Default for FieldVersionGate<T> {
    fn default() -> Self {
        Self {
            generation: Mutex::new(Generation { token: None, value: None }),
        }
    }
}

impl<T> FieldVersionGate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current token. Returns true (and drops the held value) when it differs
    /// from the token the gate last saw.
    pub async fn observe(&self, token: &str) -> bool {
        let mut generation = self.generation.lock().await;
        if generation.token.as_deref() == Some(token) {
            return false;
        }
        generation.token = Some(token.to_string());
        generation.value = None;
        true
    }

    /// Value built against `token`, if any.
    pub async fn get(&self, token: &str) -> Option<Arc<T>> {
        let generation = self.generation.lock().await;
        if generation.token.as_deref() == Some(token) {
            generation.value.clone()
        } else {
            None
        }
    }

    /// Keep `value` as built against `token`. Ignored if the gate has moved on.
    pub async fn store(&self, token: &str, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut generation = self.generation.lock().await;
        if generation.token.as_deref() == Some(token) {
            generation.value = Some(value.clone());
        }
        value
    }

    pub async fn invalidate(&self) {
        let mut generation = self.generation.lock().await;
        generation.token = None;
        generation.value = None;
    }
}
