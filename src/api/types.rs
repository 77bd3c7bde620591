//! Wire types for the Draftdeck backend API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four media kinds a post can own.
///
/// The backend dispatches uploads on the multipart field name, so the
/// `field_name` mapping is part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
  Image,
  Video,
  Audio,
  File,
}

impl MediaKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      MediaKind::Image => "image",
      MediaKind::Video => "video",
      MediaKind::Audio => "audio",
      MediaKind::File => "file",
    }
  }

  /// Multipart field name for the binary part of an upload.
  pub fn field_name(&self) -> &'static str {
    self.as_str()
  }

  /// URL path segment of the media collection (e.g. `images`).
  pub fn path_segment(&self) -> &'static str {
    match self {
      MediaKind::Image => "images",
      MediaKind::Video => "videos",
      MediaKind::Audio => "audio",
      MediaKind::File => "files",
    }
  }
}

/// An entry in the global denormalized post list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
  pub id: Uuid,
  pub title: String,
  /// Total media entities across all kinds, embedded by the backend
  pub media_count: u32,
  pub created_at: DateTime<Utc>,
}

/// A full base post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
  pub id: Uuid,
  pub title: String,
  pub body: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
  pub title: String,
  pub body: String,
}

/// A media entity nested under a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
  pub id: Uuid,
  pub label: String,
  pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
  pub id: Uuid,
  pub name: String,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
  pub id: String,
  pub position: Point,
  #[serde(default)]
  pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
  pub id: String,
  pub source: String,
  pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
  pub x: f64,
  pub y: f64,
  pub zoom: f64,
}

/// The node graph state, saved wholesale on every autosave tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
  pub nodes: Vec<FlowNode>,
  pub edges: Vec<FlowEdge>,
  pub viewport: Viewport,
}

/// Save payload: the full snapshot plus a change description, no deltas.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSavePayload {
  pub nodes: Vec<FlowNode>,
  pub edges: Vec<FlowEdge>,
  pub viewport: Viewport,
  pub change_description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationSummary {
  pub id: Uuid,
  pub title: String,
  pub slide_count: u32,
}

/// A presentation with nested slides and slide elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
  pub id: Uuid,
  pub title: String,
  pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
  pub id: Uuid,
  pub position: u32,
  #[serde(default)]
  pub elements: Vec<SlideElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideElement {
  pub id: Uuid,
  pub kind: String,
  #[serde(default)]
  pub content: serde_json::Value,
}

/// Access/refresh pair returned by login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
  pub access_token: String,
  pub refresh_token: String,
}

/// Dashboard sort orders.
///
/// The trending and popular formulas mirror the dashboard's historical
/// behavior (media count weighted by age, and media count alone); they are
/// display heuristics, not confirmed business rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PostSort {
  #[default]
  Recent,
  Trending,
  Popular,
}

fn trending_score(post: &PostSummary, now: DateTime<Utc>) -> f64 {
  let age_hours = (now - post.created_at).num_minutes() as f64 / 60.0;
  post.media_count as f64 * age_hours.max(0.0)
}

pub fn sort_posts(posts: &mut [PostSummary], order: PostSort, now: DateTime<Utc>) {
  match order {
    PostSort::Recent => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    PostSort::Popular => posts.sort_by(|a, b| b.media_count.cmp(&a.media_count)),
    PostSort::Trending => posts.sort_by(|a, b| {
      trending_score(b, now)
        .partial_cmp(&trending_score(a, now))
        .unwrap_or(std::cmp::Ordering::Equal)
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn post(title: &str, media_count: u32, age_hours: i64, now: DateTime<Utc>) -> PostSummary {
    PostSummary {
      id: Uuid::new_v4(),
      title: title.to_string(),
      media_count,
      created_at: now - Duration::hours(age_hours),
    }
  }

  #[test]
  fn test_sort_recent_newest_first() {
    let now = Utc::now();
    let mut posts = vec![post("old", 0, 10, now), post("new", 0, 1, now)];
    sort_posts(&mut posts, PostSort::Recent, now);
    assert_eq!(posts[0].title, "new");
  }

  #[test]
  fn test_sort_popular_by_media_count_only() {
    let now = Utc::now();
    let mut posts = vec![post("light", 1, 1, now), post("heavy", 9, 100, now)];
    sort_posts(&mut posts, PostSort::Popular, now);
    assert_eq!(posts[0].title, "heavy");
  }

  #[test]
  fn test_sort_trending_weighs_count_by_age() {
    let now = Utc::now();
    // 2 media * 10h = 20 beats 3 media * 2h = 6.
    let mut posts = vec![post("fresh", 3, 2, now), post("seasoned", 2, 10, now)];
    sort_posts(&mut posts, PostSort::Trending, now);
    assert_eq!(posts[0].title, "seasoned");
  }

  #[test]
  fn test_media_field_names_match_backend_contract() {
    assert_eq!(MediaKind::Image.field_name(), "image");
    assert_eq!(MediaKind::Video.field_name(), "video");
    assert_eq!(MediaKind::Audio.field_name(), "audio");
    assert_eq!(MediaKind::File.field_name(), "file");
  }

  #[test]
  fn test_flow_save_payload_uses_camel_case_change_description() {
    let payload = FlowSavePayload {
      nodes: vec![],
      edges: vec![],
      viewport: Viewport { x: 0.0, y: 0.0, zoom: 1.0 },
      change_description: "autosave".to_string(),
    };
    let json = serde_json::to_value(&payload).unwrap();
    assert!(json.get("changeDescription").is_some());
  }
}
