//! In-memory entity cache with read-through fetching.
//!
//! The cache is a process-wide map from [`CacheKey`] to a JSON-encoded entry.
//! All access goes through `get`/`fetch`/`invalidate`/`evict`; the map itself
//! is never exposed. Concurrent `fetch` calls for the same key share a single
//! in-flight load, so a loader runs at most once per key at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::key::CacheKey;

/// Tunable lifetimes for a cache instance.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
  /// How long a fetched value is served without refetching
  pub stale_after: Duration,
  /// How long an unused entry survives before the sweep drops it
  pub evict_after: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after: Duration::from_secs(5 * 60),
      evict_after: Duration::from_secs(30 * 60),
    }
  }
}

struct Entry {
  value: Value,
  fetched_at: Instant,
  last_access: Instant,
  stale: bool,
}

impl Entry {
  fn is_fresh(&self, stale_after: Duration) -> bool {
    !self.stale && self.fetched_at.elapsed() <= stale_after
  }
}

/// Outcome of an in-flight load, broadcast to every waiting fetcher.
/// Errors cross the channel as strings because the underlying reports
/// are not cloneable.
type LoadOutcome = std::result::Result<Value, String>;

/// Shared in-memory entity cache.
pub struct EntityCache {
  config: CacheConfig,
  entries: Mutex<HashMap<CacheKey, Entry>>,
  in_flight: Mutex<HashMap<CacheKey, broadcast::Sender<LoadOutcome>>>,
}

enum Role {
  Leader(broadcast::Sender<LoadOutcome>),
  Follower(broadcast::Receiver<LoadOutcome>),
}

impl EntityCache {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      config,
      entries: Mutex::new(HashMap::new()),
      in_flight: Mutex::new(HashMap::new()),
    }
  }

  /// Return the cached value if present and not yet evicted.
  ///
  /// The value may be stale; this never triggers a load.
  pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
    self.sweep();
    let mut entries = self.entries.lock().ok()?;
    let entry = entries.get_mut(key)?;
    entry.last_access = Instant::now();
    serde_json::from_value(entry.value.clone()).ok()
  }

  /// True if the cache holds a value for `key` that is neither stale nor
  /// past its staleness window.
  pub fn is_fresh(&self, key: &CacheKey) -> bool {
    let entries = match self.entries.lock() {
      Ok(entries) => entries,
      Err(_) => return false,
    };
    entries
      .get(key)
      .map(|e| e.is_fresh(self.config.stale_after))
      .unwrap_or(false)
  }

  /// Fetch through the cache.
  ///
  /// Returns the cached value when fresh; otherwise runs `loader`, stores the
  /// result and resets the staleness timer. While a load for `key` is
  /// outstanding, further fetchers wait on that load instead of starting
  /// their own. Loader failure propagates to every waiter and leaves the
  /// entry untouched.
  pub async fn fetch<T, F, Fut>(&self, key: &CacheKey, loader: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    self.sweep();

    if let Some(value) = self.fresh_value(key)? {
      return decode(key, value);
    }

    let role = {
      let mut in_flight = self
        .in_flight
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      match in_flight.get(key) {
        Some(tx) => Role::Follower(tx.subscribe()),
        None => {
          let (tx, _) = broadcast::channel(1);
          in_flight.insert(key.clone(), tx.clone());
          Role::Leader(tx)
        }
      }
    };

    match role {
      Role::Follower(mut rx) => match rx.recv().await {
        Ok(Ok(value)) => decode(key, value),
        Ok(Err(message)) => Err(eyre!(message)),
        Err(_) => Err(eyre!("load for {} ended without a result", key)),
      },
      Role::Leader(tx) => {
        let loaded = loader().await;

        let outcome: LoadOutcome = match &loaded {
          Ok(data) => serde_json::to_value(data)
            .map_err(|e| format!("failed to encode value for {}: {}", key, e)),
          Err(e) => Err(format!("{:#}", e)),
        };

        // Store before releasing the flight so late fetchers see the fresh
        // entry instead of starting a new load.
        if let Ok(value) = &outcome {
          self.store(key, value.clone())?;
        }
        self
          .in_flight
          .lock()
          .map_err(|e| eyre!("Lock poisoned: {}", e))?
          .remove(key);
        let _ = tx.send(outcome.clone());

        match (loaded, outcome) {
          (Ok(data), Ok(_)) => Ok(data),
          (Ok(_), Err(message)) => Err(eyre!(message)),
          (Err(e), _) => Err(e),
        }
      }
    }
  }

  /// Mark every entry whose key extends `prefix` as stale.
  ///
  /// Entries are not removed; the next `fetch` on them reloads.
  pub fn invalidate(&self, prefix: &CacheKey) {
    let Ok(mut entries) = self.entries.lock() else {
      return;
    };
    let mut marked = 0usize;
    for (key, entry) in entries.iter_mut() {
      if key.starts_with(prefix) {
        entry.stale = true;
        marked += 1;
      }
    }
    debug!(prefix = %prefix, marked, "cache invalidated");
  }

  /// Remove every entry whose key extends `prefix`.
  ///
  /// Evicting keys with no matching entries is a no-op.
  pub fn evict(&self, prefix: &CacheKey) {
    let Ok(mut entries) = self.entries.lock() else {
      return;
    };
    entries.retain(|key, _| !key.starts_with(prefix));
  }

  fn fresh_value(&self, key: &CacheKey) -> Result<Option<Value>> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get_mut(key).and_then(|entry| {
      entry.last_access = Instant::now();
      entry
        .is_fresh(self.config.stale_after)
        .then(|| entry.value.clone())
    }))
  }

  fn store(&self, key: &CacheKey, value: Value) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let now = Instant::now();
    entries.insert(
      key.clone(),
      Entry {
        value,
        fetched_at: now,
        last_access: now,
        stale: false,
      },
    );
    Ok(())
  }

  /// Drop entries that have gone unused past the eviction deadline.
  fn sweep(&self) {
    let Ok(mut entries) = self.entries.lock() else {
      return;
    };
    let evict_after = self.config.evict_after;
    entries.retain(|_, entry| entry.last_access.elapsed() <= evict_after);
  }
}

fn decode<T: DeserializeOwned>(key: &CacheKey, value: Value) -> Result<T> {
  serde_json::from_value(value)
    .map_err(|e| eyre!("failed to decode cached value for {}: {}", key, e))
}
