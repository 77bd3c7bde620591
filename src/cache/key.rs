//! Typed cache keys with prefix hierarchy.
//!
//! Keys are ordered tuples of parts (e.g. `blog/basePost/<uuid>`). Invalidating
//! a shorter key invalidates every key that extends it. All keys the client
//! uses are built through the [`keys`] factory functions so an invalidation set
//! can never drift out of sync with the corresponding read key.

use std::fmt;

use uuid::Uuid;

use crate::api::types::MediaKind;

/// One segment of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPart {
  /// Static segment naming a domain or collection (e.g. "blog", "globalPosts")
  Name(&'static str),
  /// Entity id segment
  Id(Uuid),
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeyPart::Name(s) => f.write_str(s),
      KeyPart::Id(id) => write!(f, "{}", id),
    }
  }
}

/// Hierarchical identifier for a cached resource or collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  parts: Vec<KeyPart>,
}

impl CacheKey {
  fn new(parts: Vec<KeyPart>) -> Self {
    Self { parts }
  }

  /// True if this key equals `prefix` or extends it by further parts.
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.parts.len() >= prefix.parts.len()
      && self.parts[..prefix.parts.len()] == prefix.parts[..]
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, part) in self.parts.iter().enumerate() {
      if i > 0 {
        f.write_str("/")?;
      }
      write!(f, "{}", part)?;
    }
    Ok(())
  }
}

/// Factory functions for every key the client caches under.
pub mod keys {
  use super::*;

  /// Global denormalized post list (embeds per-post media counts).
  pub fn global_posts() -> CacheKey {
    CacheKey::new(vec![KeyPart::Name("blog"), KeyPart::Name("globalPosts")])
  }

  /// A single base post.
  pub fn base_post(post: Uuid) -> CacheKey {
    CacheKey::new(vec![
      KeyPart::Name("blog"),
      KeyPart::Name("basePost"),
      KeyPart::Id(post),
    ])
  }

  /// The media collection of one kind under a post.
  pub fn post_media(post: Uuid, kind: MediaKind) -> CacheKey {
    CacheKey::new(vec![
      KeyPart::Name("blog"),
      KeyPart::Name("basePost"),
      KeyPart::Id(post),
      KeyPart::Name(kind.as_str()),
    ])
  }

  /// A single media entity under a post.
  pub fn media_item(post: Uuid, kind: MediaKind, media: Uuid) -> CacheKey {
    CacheKey::new(vec![
      KeyPart::Name("blog"),
      KeyPart::Name("basePost"),
      KeyPart::Id(post),
      KeyPart::Name(kind.as_str()),
      KeyPart::Id(media),
    ])
  }

  /// The flow chart list.
  pub fn flows() -> CacheKey {
    CacheKey::new(vec![KeyPart::Name("flow"), KeyPart::Name("charts")])
  }

  /// A single flow chart (nodes, edges, viewport).
  pub fn flow(chart: Uuid) -> CacheKey {
    CacheKey::new(vec![
      KeyPart::Name("flow"),
      KeyPart::Name("chart"),
      KeyPart::Id(chart),
    ])
  }

  /// The presentation list.
  pub fn presentations() -> CacheKey {
    CacheKey::new(vec![KeyPart::Name("deck"), KeyPart::Name("presentations")])
  }

  /// A single presentation with nested slides and elements.
  pub fn presentation(deck: Uuid) -> CacheKey {
    CacheKey::new(vec![
      KeyPart::Name("deck"),
      KeyPart::Name("presentation"),
      KeyPart::Id(deck),
    ])
  }

  /// The slide collection of a presentation.
  pub fn slides(deck: Uuid) -> CacheKey {
    CacheKey::new(vec![
      KeyPart::Name("deck"),
      KeyPart::Name("presentation"),
      KeyPart::Id(deck),
      KeyPart::Name("slides"),
    ])
  }
}

/// The cache work a successful mutation triggers.
///
/// `stale` keys are marked for refetch; `evict` keys are removed outright
/// (used for deletes, where a refetch would 404).
#[derive(Debug, Clone, Default)]
pub struct InvalidationSet {
  pub stale: Vec<CacheKey>,
  pub evict: Vec<CacheKey>,
}

impl InvalidationSet {
  pub fn stale(keys: impl IntoIterator<Item = CacheKey>) -> Self {
    Self {
      stale: keys.into_iter().collect(),
      evict: Vec::new(),
    }
  }

  pub fn and_evict(mut self, keys: impl IntoIterator<Item = CacheKey>) -> Self {
    self.evict.extend(keys);
    self
  }

  /// A created/updated child media entity under post `post`.
  ///
  /// All three keys are required: the item itself, the per-post collection,
  /// and the global list that embeds denormalized media counts. Dropping any
  /// one leaves the UI rendering stale derived state.
  pub fn media_changed(post: Uuid, kind: MediaKind, media: Uuid) -> Self {
    Self::stale([
      keys::media_item(post, kind, media),
      keys::post_media(post, kind),
      keys::global_posts(),
    ])
  }

  /// A deleted child media entity: the item is evicted, the collections go
  /// stale. Evicting an already-absent item key is a no-op.
  pub fn media_removed(post: Uuid, kind: MediaKind, media: Uuid) -> Self {
    Self::stale([keys::post_media(post, kind), keys::global_posts()])
      .and_evict([keys::media_item(post, kind, media)])
  }

  /// A created or updated base post.
  pub fn post_changed(post: Uuid) -> Self {
    Self::stale([keys::base_post(post), keys::global_posts()])
  }

  /// A deleted base post: the post subtree (post, media collections, media
  /// items) is evicted via the prefix, the global list goes stale.
  pub fn post_removed(post: Uuid) -> Self {
    Self::stale([keys::global_posts()]).and_evict([keys::base_post(post)])
  }

  /// A saved flow snapshot.
  pub fn flow_saved(chart: Uuid) -> Self {
    Self::stale([keys::flow(chart), keys::flows()])
  }

  /// An added or reordered slide under presentation `deck`.
  pub fn slide_changed(deck: Uuid) -> Self {
    Self::stale([
      keys::slides(deck),
      keys::presentation(deck),
      keys::presentations(),
    ])
  }

  /// A deleted slide.
  pub fn slide_removed(deck: Uuid) -> Self {
    // Slides are cached nested in the presentation, not under their own key,
    // so delete is the same set as change.
    Self::slide_changed(deck)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_prefix_matches_self_and_extensions() {
    let post = Uuid::new_v4();
    let media = Uuid::new_v4();

    let parent = keys::base_post(post);
    let collection = keys::post_media(post, MediaKind::Image);
    let item = keys::media_item(post, MediaKind::Image, media);

    assert!(parent.starts_with(&parent));
    assert!(collection.starts_with(&parent));
    assert!(item.starts_with(&parent));
    assert!(item.starts_with(&collection));
    assert!(!parent.starts_with(&collection));
  }

  #[test]
  fn test_sibling_keys_do_not_match() {
    let post = Uuid::new_v4();

    let images = keys::post_media(post, MediaKind::Image);
    let videos = keys::post_media(post, MediaKind::Video);
    assert!(!images.starts_with(&videos));

    let other_post = keys::base_post(Uuid::new_v4());
    assert!(!images.starts_with(&other_post));
  }

  #[test]
  fn test_media_invalidation_set_covers_all_three_keys() {
    let post = Uuid::new_v4();
    let media = Uuid::new_v4();

    let set = InvalidationSet::media_changed(post, MediaKind::Audio, media);
    assert_eq!(set.stale.len(), 3);
    assert!(set.evict.is_empty());
    assert!(set.stale.contains(&keys::media_item(post, MediaKind::Audio, media)));
    assert!(set.stale.contains(&keys::post_media(post, MediaKind::Audio)));
    assert!(set.stale.contains(&keys::global_posts()));
  }

  #[test]
  fn test_display_is_slash_separated() {
    let key = keys::global_posts();
    assert_eq!(key.to_string(), "blog/globalPosts");
  }
}
