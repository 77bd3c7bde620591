//! Command handlers: the view layer of the client.
//!
//! Renders cached data, dispatches mutations through the cached client, and
//! translates propagated errors into user-facing messages. The flow edit
//! session drives the autosave loop against a local snapshot file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::api::types::{
  FlowSavePayload, FlowSnapshot, MediaKind, NewPost, PostSort,
};
use crate::api::CachedApiClient;
use crate::autosave::{AutosaveLoop, AutosaveState};

pub async fn login(client: &CachedApiClient, email: &str, password: &str) -> Result<()> {
  client.api().login(email, password).await?;
  println!("Logged in as {}", email);
  Ok(())
}

pub fn logout(client: &CachedApiClient) -> Result<()> {
  client.api().logout()?;
  println!("Logged out");
  Ok(())
}

// === posts ===

pub async fn list_posts(client: &CachedApiClient, sort: PostSort) -> Result<()> {
  let mut posts = client.list_posts().await?;
  if posts.is_empty() {
    println!("No posts yet.");
    return Ok(());
  }

  crate::api::types::sort_posts(&mut posts, sort, Utc::now());

  println!("{:<38} {:>6}  {:<20} TITLE", "ID", "MEDIA", "CREATED");
  for post in &posts {
    println!(
      "{:<38} {:>6}  {:<20} {}",
      post.id,
      post.media_count,
      post.created_at.format("%Y-%m-%d %H:%M"),
      post.title
    );
  }
  Ok(())
}

pub async fn show_post(client: &CachedApiClient, post: Uuid) -> Result<()> {
  let post = client.get_post(post).await?;
  println!("# {}\n", post.title);
  println!("{}", post.body);
  println!(
    "\n(created {}, updated {})",
    post.created_at.format("%Y-%m-%d %H:%M"),
    post.updated_at.format("%Y-%m-%d %H:%M")
  );
  Ok(())
}

pub async fn create_post(client: &CachedApiClient, title: String, body: String) -> Result<()> {
  let post = client.create_post(&NewPost { title, body }).await?;
  println!("Created post {} ({})", post.title, post.id);
  Ok(())
}

pub async fn delete_post(client: &CachedApiClient, post: Uuid) -> Result<()> {
  client.delete_post(post).await?;
  println!("Deleted post {}", post);
  Ok(())
}

// === media ===

pub async fn list_media(client: &CachedApiClient, post: Uuid, kind: MediaKind) -> Result<()> {
  let items = client.list_media(post, kind).await?;
  if items.is_empty() {
    println!("No {} media on this post.", kind.as_str());
    return Ok(());
  }
  println!("{:<38} {:<24} URL", "ID", "LABEL");
  for item in &items {
    println!("{:<38} {:<24} {}", item.id, item.label, item.url);
  }
  Ok(())
}

pub async fn add_media(
  client: &CachedApiClient,
  post: Uuid,
  kind: MediaKind,
  label: Option<String>,
  file: &Path,
) -> Result<()> {
  // Validation failures stay local; nothing reaches the network.
  let bytes = std::fs::read(file)
    .map_err(|e| eyre!("Cannot read {}: {}", file.display(), e))?;
  let file_name = file
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| eyre!("File name is not valid UTF-8: {}", file.display()))?;
  let label = label.unwrap_or_else(|| file_name.to_string());

  let item = client
    .upload_media(post, kind, &label, file_name, bytes)
    .await?;
  println!("Uploaded {} as {} ({})", file.display(), kind.as_str(), item.id);
  Ok(())
}

pub async fn rm_media(
  client: &CachedApiClient,
  post: Uuid,
  kind: MediaKind,
  media: Uuid,
) -> Result<()> {
  client.delete_media(post, kind, media).await?;
  println!("Deleted {} {}", kind.as_str(), media);
  Ok(())
}

// === flows ===

pub async fn list_flows(client: &CachedApiClient) -> Result<()> {
  let flows = client.list_flows().await?;
  if flows.is_empty() {
    println!("No flow charts yet.");
    return Ok(());
  }
  println!("{:<38} {:<20} NAME", "ID", "UPDATED");
  for flow in &flows {
    println!(
      "{:<38} {:<20} {}",
      flow.id,
      flow.updated_at.format("%Y-%m-%d %H:%M"),
      flow.name
    );
  }
  Ok(())
}

pub async fn pull_flow(client: &CachedApiClient, chart: Uuid, out: &Path) -> Result<()> {
  let snapshot = client.get_flow(chart).await?;
  write_snapshot(out, &snapshot)?;
  println!(
    "Wrote {} ({} nodes, {} edges)",
    out.display(),
    snapshot.nodes.len(),
    snapshot.edges.len()
  );
  Ok(())
}

/// Manual save: push a local snapshot file wholesale.
pub async fn push_flow(
  client: &CachedApiClient,
  chart: Uuid,
  file: &Path,
  message: Option<String>,
) -> Result<()> {
  let snapshot = read_snapshot(file)?;
  let payload = save_payload(snapshot, message.unwrap_or_else(|| "manual save".to_string()));
  client.save_flow(chart, &payload).await?;
  println!("Saved flow {}", chart);
  Ok(())
}

/// Watch a local snapshot file and autosave it with a debounce.
///
/// Every content change records an edit; the autosave loop issues the save
/// once the file has been quiet for the debounce window. Ctrl-C disarms the
/// pending timer before teardown.
pub async fn edit_flow(
  client: &CachedApiClient,
  chart: Uuid,
  file: PathBuf,
  debounce: Duration,
) -> Result<()> {
  if !file.exists() {
    let snapshot = client.get_flow(chart).await?;
    write_snapshot(&file, &snapshot)?;
    println!("Pulled current snapshot to {}", file.display());
  }

  let mut last_digest = digest_file(&file)?;

  let saver_client = client.clone();
  let saver_file = file.clone();
  let mut autosave = AutosaveLoop::new(move || {
    let client = saver_client.clone();
    let file = saver_file.clone();
    async move {
      let snapshot = read_snapshot(&file).map_err(|e| format!("{:#}", e))?;
      let payload = save_payload(snapshot, "autosave".to_string());
      client
        .save_flow(chart, &payload)
        .await
        .map_err(|e| format!("{:#}", e))
    }
  })
  .with_debounce(debounce);

  println!(
    "Watching {} (autosave after {:?} of quiet, Ctrl-C to stop)",
    file.display(),
    debounce
  );

  let mut ticker = tokio::time::interval(Duration::from_millis(250));
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      _ = ticker.tick() => {
        match digest_file(&file) {
          Ok(digest) if digest != last_digest => {
            last_digest = digest;
            autosave.record_edit();
            info!(chart = %chart, "local edit detected");
          }
          // Editors replace files non-atomically; a transient read error
          // just means we pick the change up on the next tick.
          _ => {}
        }

        if autosave.poll() {
          report_autosave(&autosave);
        }
      }
    }
  }

  let parting = autosave.status();
  autosave.cancel();
  if parting.has_unsaved_changes {
    println!(
      "Unsaved changes remain in {}. Push them with `draftdeck flow push {} {}`.",
      file.display(),
      chart,
      file.display()
    );
  }
  Ok(())
}

fn report_autosave(autosave: &AutosaveLoop) {
  match autosave.state() {
    AutosaveState::Saving { .. } => println!("Saving..."),
    AutosaveState::Clean => {
      if let Some(at) = autosave.status().last_saved {
        println!("Saved at {}", at.format("%H:%M:%S"));
      }
    }
    AutosaveState::Error => {
      println!(
        "Save failed: {}. Edits are kept locally; the next change retries.",
        autosave.last_error().unwrap_or("unknown error")
      );
    }
    AutosaveState::Dirty { .. } => {}
  }
}

// === presentations ===

pub async fn list_decks(client: &CachedApiClient) -> Result<()> {
  let decks = client.list_presentations().await?;
  if decks.is_empty() {
    println!("No presentations yet.");
    return Ok(());
  }
  println!("{:<38} {:>7}  TITLE", "ID", "SLIDES");
  for deck in &decks {
    println!("{:<38} {:>7}  {}", deck.id, deck.slide_count, deck.title);
  }
  Ok(())
}

pub async fn show_deck(client: &CachedApiClient, deck: Uuid) -> Result<()> {
  let deck = client.get_presentation(deck).await?;
  println!("# {} ({} slides)", deck.title, deck.slides.len());
  for slide in &deck.slides {
    println!("  slide {} [{}]: {} elements", slide.position, slide.id, slide.elements.len());
  }
  Ok(())
}

pub async fn add_slide(client: &CachedApiClient, deck: Uuid, position: u32) -> Result<()> {
  let slide = client.add_slide(deck, position).await?;
  println!("Added slide {} at position {}", slide.id, slide.position);
  Ok(())
}

pub async fn rm_slide(client: &CachedApiClient, deck: Uuid, slide: Uuid) -> Result<()> {
  client.delete_slide(deck, slide).await?;
  println!("Deleted slide {}", slide);
  Ok(())
}

// === snapshot file helpers ===

fn read_snapshot(path: &Path) -> Result<FlowSnapshot> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Cannot read {}: {}", path.display(), e))?;
  serde_json::from_str(&contents)
    .map_err(|e| eyre!("{} is not a valid flow snapshot: {}", path.display(), e))
}

fn write_snapshot(path: &Path, snapshot: &FlowSnapshot) -> Result<()> {
  let contents = serde_json::to_string_pretty(snapshot)?;
  std::fs::write(path, contents)
    .map_err(|e| eyre!("Cannot write {}: {}", path.display(), e))?;
  Ok(())
}

fn save_payload(snapshot: FlowSnapshot, change_description: String) -> FlowSavePayload {
  FlowSavePayload {
    nodes: snapshot.nodes,
    edges: snapshot.edges,
    viewport: snapshot.viewport,
    change_description,
  }
}

fn digest_file(path: &Path) -> Result<String> {
  let bytes =
    std::fs::read(path).map_err(|e| eyre!("Cannot read {}: {}", path.display(), e))?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::Viewport;

  #[test]
  fn test_digest_tracks_content_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.json");

    std::fs::write(&path, "a").unwrap();
    let first = digest_file(&path).unwrap();
    let again = digest_file(&path).unwrap();
    assert_eq!(first, again);

    std::fs::write(&path, "b").unwrap();
    assert_ne!(digest_file(&path).unwrap(), first);
  }

  #[test]
  fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.json");

    let snapshot = FlowSnapshot {
      nodes: vec![],
      edges: vec![],
      viewport: Viewport { x: 10.0, y: -4.0, zoom: 0.5 },
    };
    write_snapshot(&path, &snapshot).unwrap();
    assert_eq!(read_snapshot(&path).unwrap(), snapshot);
  }

  #[test]
  fn test_invalid_snapshot_is_a_local_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.json");
    std::fs::write(&path, "{not json").unwrap();

    let err = read_snapshot(&path).unwrap_err();
    assert!(err.to_string().contains("not a valid flow snapshot"));
  }
}
