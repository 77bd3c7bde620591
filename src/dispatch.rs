//! Mutation dispatcher.
//!
//! Writes go to the backend first; cache invalidation happens strictly after
//! the mutation is observed to succeed. A failed write performs no cache work
//! and returns the error unchanged.

use std::future::Future;
use std::sync::Arc;

use color_eyre::Result;
use tracing::debug;

use crate::cache::{EntityCache, InvalidationSet};

#[derive(Clone)]
pub struct MutationDispatcher {
  cache: Arc<EntityCache>,
}

impl MutationDispatcher {
  pub fn new(cache: Arc<EntityCache>) -> Self {
    Self { cache }
  }

  /// Run the write, then apply the invalidation set on success.
  pub async fn mutate<T, Fut>(&self, operation: Fut, invalidation: InvalidationSet) -> Result<T>
  where
    Fut: Future<Output = Result<T>>,
  {
    let result = operation.await?;

    for key in &invalidation.stale {
      self.cache.invalidate(key);
    }
    for key in &invalidation.evict {
      self.cache.evict(key);
    }
    debug!(
      stale = invalidation.stale.len(),
      evicted = invalidation.evict.len(),
      "mutation committed, cache invalidated"
    );

    Ok(result)
  }
}
