use std::{collections::HashMap, hash::Hash};

use tokio::sync::RwLock;

/// Read-mostly concurrent map handing out clones.
/// RwLock allows many readers, minimizing locking effect.
#[derive(Debug)]
pub struct CloneCache<K: PartialEq + Eq + Hash, T: Clone>(
  RwLock<HashMap<K, T>>,
);

impl<K: PartialEq + Eq + Hash, T: Clone> Default
  for CloneCache<K, T>
{
  fn default() -> Self {
    Self(RwLock::new(HashMap::new()))
  }
}

impl<K: PartialEq + Eq + Hash + Clone, T: Clone> CloneCache<K, T> {
  pub async fn get(&self, key: &K) -> Option<T> {
    self.0.read().await.get(key).cloned()
  }

  pub async fn contains(&self, key: &K) -> bool {
    self.0.read().await.contains_key(key)
  }

  pub async fn get_keys(&self) -> Vec<K> {
    let cache = self.0.read().await;
    cache.keys().cloned().collect()
  }

  pub async fn len(&self) -> usize {
    self.0.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.0.read().await.is_empty()
  }

  pub async fn insert<Key>(&self, key: Key, val: T) -> Option<T>
  where
    Key: Into<K>,
  {
    self.0.write().await.insert(key.into(), val)
  }

  pub async fn remove(&self, key: &K) -> Option<T> {
    self.0.write().await.remove(key)
  }

  pub async fn clear(&self) {
    self.0.write().await.clear()
  }
}
