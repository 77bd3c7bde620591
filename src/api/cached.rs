//! Cached API client.
//!
//! Wraps [`ApiClient`] with the entity cache for reads and the mutation
//! dispatcher for writes. Reads share the typed keys from `cache::keys`;
//! writes carry the relationship-derived invalidation set for the entity
//! they touch, so dependent views refetch after the backend confirms.

use std::sync::Arc;

use color_eyre::Result;
use uuid::Uuid;

use crate::cache::{keys, EntityCache, InvalidationSet};
use crate::dispatch::MutationDispatcher;

use super::client::ApiClient;
use super::types::{
  FlowSavePayload, FlowSnapshot, FlowSummary, MediaItem, MediaKind, NewPost, Post,
  PostSummary, Presentation, PresentationSummary, Slide,
};

#[derive(Clone)]
pub struct CachedApiClient {
  inner: Arc<ApiClient>,
  cache: Arc<EntityCache>,
  dispatcher: MutationDispatcher,
}

impl CachedApiClient {
  pub fn new(inner: ApiClient, cache: Arc<EntityCache>) -> Self {
    Self {
      inner: Arc::new(inner),
      dispatcher: MutationDispatcher::new(cache.clone()),
      cache,
    }
  }

  pub fn api(&self) -> &ApiClient {
    &self.inner
  }

  // === blog reads ===

  pub async fn list_posts(&self) -> Result<Vec<PostSummary>> {
    self
      .cache
      .fetch(&keys::global_posts(), || self.inner.list_posts())
      .await
  }

  pub async fn get_post(&self, post: Uuid) -> Result<Post> {
    self
      .cache
      .fetch(&keys::base_post(post), || self.inner.get_post(post))
      .await
  }

  pub async fn list_media(&self, post: Uuid, kind: MediaKind) -> Result<Vec<MediaItem>> {
    self
      .cache
      .fetch(&keys::post_media(post, kind), || {
        self.inner.list_media(post, kind)
      })
      .await
  }

  // === blog writes ===

  pub async fn create_post(&self, new: &NewPost) -> Result<Post> {
    let created = self
      .dispatcher
      .mutate(
        self.inner.create_post(new),
        InvalidationSet::stale([keys::global_posts()]),
      )
      .await?;
    // The new post's own key only exists after the backend assigns the id.
    self.cache.invalidate(&keys::base_post(created.id));
    Ok(created)
  }

  pub async fn update_post(&self, post: Uuid, new: &NewPost) -> Result<Post> {
    self
      .dispatcher
      .mutate(
        self.inner.update_post(post, new),
        InvalidationSet::post_changed(post),
      )
      .await
  }

  pub async fn delete_post(&self, post: Uuid) -> Result<()> {
    self
      .dispatcher
      .mutate(
        self.inner.delete_post(post),
        InvalidationSet::post_removed(post),
      )
      .await
  }

  pub async fn upload_media(
    &self,
    post: Uuid,
    kind: MediaKind,
    label: &str,
    file_name: &str,
    bytes: Vec<u8>,
  ) -> Result<MediaItem> {
    let item = self
      .dispatcher
      .mutate(
        self.inner.upload_media(post, kind, label, file_name, bytes),
        InvalidationSet::stale([keys::post_media(post, kind), keys::global_posts()]),
      )
      .await?;
    self
      .cache
      .invalidate(&keys::media_item(post, kind, item.id));
    Ok(item)
  }

  pub async fn delete_media(&self, post: Uuid, kind: MediaKind, media: Uuid) -> Result<()> {
    self
      .dispatcher
      .mutate(
        self.inner.delete_media(post, kind, media),
        InvalidationSet::media_removed(post, kind, media),
      )
      .await
  }

  // === flows ===

  pub async fn list_flows(&self) -> Result<Vec<FlowSummary>> {
    self
      .cache
      .fetch(&keys::flows(), || self.inner.list_flows())
      .await
  }

  pub async fn get_flow(&self, chart: Uuid) -> Result<FlowSnapshot> {
    self
      .cache
      .fetch(&keys::flow(chart), || self.inner.get_flow(chart))
      .await
  }

  pub async fn save_flow(&self, chart: Uuid, payload: &FlowSavePayload) -> Result<()> {
    self
      .dispatcher
      .mutate(
        self.inner.save_flow(chart, payload),
        InvalidationSet::flow_saved(chart),
      )
      .await
  }

  // === presentations ===

  pub async fn list_presentations(&self) -> Result<Vec<PresentationSummary>> {
    self
      .cache
      .fetch(&keys::presentations(), || self.inner.list_presentations())
      .await
  }

  pub async fn get_presentation(&self, deck: Uuid) -> Result<Presentation> {
    self
      .cache
      .fetch(&keys::presentation(deck), || {
        self.inner.get_presentation(deck)
      })
      .await
  }

  pub async fn add_slide(&self, deck: Uuid, position: u32) -> Result<Slide> {
    self
      .dispatcher
      .mutate(
        self.inner.add_slide(deck, position),
        InvalidationSet::slide_changed(deck),
      )
      .await
  }

  pub async fn delete_slide(&self, deck: Uuid, slide: Uuid) -> Result<()> {
    self
      .dispatcher
      .mutate(
        self.inner.delete_slide(deck, slide),
        InvalidationSet::slide_removed(deck),
      )
      .await
  }
}
