// stepchain/src/core/state.rs
use parking_lot::{RwLock, RwLockReadGuard};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-erased value stored in a [`StateBag`] or carried in [`crate::Args`].
pub type StateValue = Arc<dyn Any + Send + Sync>;

/// Shared key/value store of one root chain and everything it spawns.
///
/// Cloning a `StateBag` clones the handle, not the data: every frame,
/// parallel branch and loop iteration of a chain sees the same instance.
///
/// IMPORTANT: values are handed out by clone, or through a closure for
/// in-place updates. Apart from `read()`, no lock guard escapes this type, so
/// a step body can call back into the engine while holding values it read.
#[derive(Clone, Default)]
pub struct StateBag(Arc<RwLock<HashMap<String, StateValue>>>);

impl StateBag {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns a clone of the value under `key` if present and of type `T`.
  pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
    self.0.read().get(key).and_then(|v| v.downcast_ref::<T>()).cloned()
  }

  /// Returns the raw shared value under `key`.
  pub fn get_raw(&self, key: &str) -> Option<StateValue> {
    self.0.read().get(key).cloned()
  }

  /// Stores `value` under `key`, replacing whatever was there.
  pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
    self.0.write().insert(key.into(), Arc::new(value));
  }

  pub fn set_raw(&self, key: impl Into<String>, value: StateValue) {
    self.0.write().insert(key.into(), value);
  }

  pub fn has(&self, key: &str) -> bool {
    self.0.read().contains_key(key)
  }

  /// Removes `key`; returns whether it was present.
  pub fn delete(&self, key: &str) -> bool {
    self.0.write().remove(key).is_some()
  }

  /// Mutates the `T` stored under `key` in place and returns the closure's
  /// result, or `None` if the key is absent or holds another type.
  ///
  /// The closure runs under the bag's write lock; it must not touch the
  /// bag itself.
  pub fn update<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R>
  where
    T: Any + Clone + Send + Sync,
  {
    let mut map = self.0.write();
    let slot = map.get_mut(key)?;
    if !slot.is::<T>() {
      return None;
    }
    // Copy-on-write: values may still be shared with a bag merged via copy_from.
    let mut value: T = slot.downcast_ref::<T>()?.clone();
    let out = f(&mut value);
    *slot = Arc::new(value);
    Some(out)
  }

  /// Like [`StateBag::update`], inserting `default()` first if the key is absent.
  pub fn upsert<T, R>(&self, key: &str, default: impl FnOnce() -> T, f: impl FnOnce(&mut T) -> R) -> R
  where
    T: Any + Clone + Send + Sync,
  {
    let mut map = self.0.write();
    let mut value: T = map
      .get(key)
      .and_then(|v| v.downcast_ref::<T>())
      .cloned()
      .unwrap_or_else(default);
    let out = f(&mut value);
    map.insert(key.to_string(), Arc::new(value));
    out
  }

  /// Merges entries of `other` into `self`. Keys already present in `self`
  /// are kept (first write wins). Returns the number of keys copied.
  pub fn merge_missing(&self, other: &StateBag) -> usize {
    if Arc::ptr_eq(&self.0, &other.0) {
      return 0;
    }
    let source: Vec<(String, StateValue)> = other
      .0
      .read()
      .iter()
      .map(|(k, v)| (k.clone(), Arc::clone(v)))
      .collect();
    let mut target = self.0.write();
    let mut copied = 0;
    for (key, value) in source {
      target.entry(key).or_insert_with(|| {
        copied += 1;
        value
      });
    }
    copied
  }

  pub fn keys(&self) -> Vec<String> {
    self.0.read().keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.0.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.read().is_empty()
  }

  /// True if both handles refer to the same underlying bag.
  pub fn same_bag(&self, other: &StateBag) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }

  /// Read access to the raw map. The guard MUST be dropped before calling
  /// back into the bag or the engine.
  pub fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StateValue>> {
    self.0.read()
  }
}

impl fmt::Debug for StateBag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut keys = self.keys();
    keys.sort();
    f.debug_struct("StateBag").field("keys", &keys).finish()
  }
}
