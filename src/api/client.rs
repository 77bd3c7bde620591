//! HTTP client for the Draftdeck backend.
//!
//! Every authenticated request carries a bearer access token. A 401 triggers
//! exactly one transparent refresh using the stored refresh token, then one
//! retry of the original request. Requests that hit a 401 concurrently share
//! a single in-flight refresh: the refresh lock plus a token generation
//! counter guarantee at-most-one-refresh per expiry.

use std::sync::{Arc, Mutex as StdMutex};

use color_eyre::{eyre::eyre, Result};
use reqwest::{multipart, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::auth::{CredentialStore, Credentials};
use super::types::{
  FlowSavePayload, FlowSnapshot, FlowSummary, MediaItem, MediaKind, NewPost, Post,
  PostSummary, Presentation, PresentationSummary, Slide, TokenPair,
};

struct AccessToken {
  token: Option<String>,
  /// Bumped on every successful refresh or login.
  generation: u64,
}

/// Client for the backend REST API.
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  store: Arc<dyn CredentialStore>,
  access: StdMutex<AccessToken>,
  refresh_lock: Mutex<()>,
}

impl ApiClient {
  pub fn new(base_url: &str, store: Arc<dyn CredentialStore>) -> Result<Self> {
    let base = Url::parse(base_url)
      .and_then(|u| u.join("/"))
      .map_err(|e| eyre!("Invalid API URL {}: {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("draftdeck/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let token = store.load()?.map(|c| c.access);

    Ok(Self {
      http,
      base,
      store,
      access: StdMutex::new(AccessToken {
        token,
        generation: 0,
      }),
      refresh_lock: Mutex::new(()),
    })
  }

  /// True if a refresh token is stored.
  pub fn is_logged_in(&self) -> bool {
    matches!(self.store.load(), Ok(Some(_)))
  }

  // === auth ===

  /// Exchange email + password for a token pair and persist it.
  pub async fn login(&self, email: &str, password: &str) -> Result<()> {
    let url = self.url("auth/login")?;
    let response = self
      .http
      .post(url)
      .json(&json!({ "email": email, "password": password }))
      .send()
      .await?;

    let tokens: TokenPair = decode_or_error(response).await?;
    self.install_tokens(&tokens)?;
    Ok(())
  }

  /// Drop stored credentials. Local only; the refresh token simply expires
  /// server-side.
  pub fn logout(&self) -> Result<()> {
    self.store.clear()?;
    let mut access = self
      .access
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    access.token = None;
    access.generation += 1;
    Ok(())
  }

  // === blog ===

  /// Global post list with denormalized media counts.
  pub async fn list_posts(&self) -> Result<Vec<PostSummary>> {
    self.request_json(Method::GET, "blog/posts", None).await
  }

  pub async fn get_post(&self, post: Uuid) -> Result<Post> {
    self
      .request_json(Method::GET, &format!("blog/posts/{}", post), None)
      .await
  }

  pub async fn create_post(&self, new: &NewPost) -> Result<Post> {
    let body = serde_json::to_value(new)?;
    self.request_json(Method::POST, "blog/posts", Some(body)).await
  }

  pub async fn update_post(&self, post: Uuid, new: &NewPost) -> Result<Post> {
    let body = serde_json::to_value(new)?;
    self
      .request_json(Method::PUT, &format!("blog/posts/{}", post), Some(body))
      .await
  }

  pub async fn delete_post(&self, post: Uuid) -> Result<()> {
    self
      .request_unit(Method::DELETE, &format!("blog/posts/{}", post))
      .await
  }

  pub async fn list_media(&self, post: Uuid, kind: MediaKind) -> Result<Vec<MediaItem>> {
    self
      .request_json(
        Method::GET,
        &format!("blog/posts/{}/{}", post, kind.path_segment()),
        None,
      )
      .await
  }

  /// Multipart upload: `label` text field plus the kind-specific file field.
  /// The backend dispatches on the file field name.
  pub async fn upload_media(
    &self,
    post: Uuid,
    kind: MediaKind,
    label: &str,
    file_name: &str,
    bytes: Vec<u8>,
  ) -> Result<MediaItem> {
    let path = format!("blog/posts/{}/{}", post, kind.path_segment());
    let label = label.to_string();
    let file_name = file_name.to_string();

    let response = self
      .send_authed(Method::POST, &path, move |req| {
        let form = multipart::Form::new().text("label", label.clone()).part(
          kind.field_name(),
          multipart::Part::bytes(bytes.clone()).file_name(file_name.clone()),
        );
        req.multipart(form)
      })
      .await?;

    decode_or_error(response).await
  }

  pub async fn delete_media(&self, post: Uuid, kind: MediaKind, media: Uuid) -> Result<()> {
    self
      .request_unit(
        Method::DELETE,
        &format!("blog/posts/{}/{}/{}", post, kind.path_segment(), media),
      )
      .await
  }

  // === flows ===

  pub async fn list_flows(&self) -> Result<Vec<FlowSummary>> {
    self.request_json(Method::GET, "flows", None).await
  }

  pub async fn get_flow(&self, chart: Uuid) -> Result<FlowSnapshot> {
    self
      .request_json(Method::GET, &format!("flows/{}", chart), None)
      .await
  }

  /// Save the whole snapshot; the backend keeps no deltas.
  pub async fn save_flow(&self, chart: Uuid, payload: &FlowSavePayload) -> Result<()> {
    let body = serde_json::to_value(payload)?;
    let response = self
      .send_authed(Method::PUT, &format!("flows/{}", chart), move |req| {
        req.json(&body)
      })
      .await?;
    unit_or_error(response).await
  }

  // === presentations ===

  pub async fn list_presentations(&self) -> Result<Vec<PresentationSummary>> {
    self.request_json(Method::GET, "presentations", None).await
  }

  pub async fn get_presentation(&self, deck: Uuid) -> Result<Presentation> {
    self
      .request_json(Method::GET, &format!("presentations/{}", deck), None)
      .await
  }

  pub async fn add_slide(&self, deck: Uuid, position: u32) -> Result<Slide> {
    self
      .request_json(
        Method::POST,
        &format!("presentations/{}/slides", deck),
        Some(json!({ "position": position })),
      )
      .await
  }

  pub async fn delete_slide(&self, deck: Uuid, slide: Uuid) -> Result<()> {
    self
      .request_unit(
        Method::DELETE,
        &format!("presentations/{}/slides/{}", deck, slide),
      )
      .await
  }

  // === plumbing ===

  fn url(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  fn current_access(&self) -> Result<(Option<String>, u64)> {
    let access = self
      .access
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok((access.token.clone(), access.generation))
  }

  fn install_tokens(&self, tokens: &TokenPair) -> Result<()> {
    self.store.save(&Credentials {
      access: tokens.access_token.clone(),
      refresh: tokens.refresh_token.clone(),
    })?;
    let mut access = self
      .access
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    access.token = Some(tokens.access_token.clone());
    access.generation += 1;
    Ok(())
  }

  async fn request_json<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<serde_json::Value>,
  ) -> Result<T> {
    let response = self
      .send_authed(method, path, move |req| match &body {
        Some(b) => req.json(b),
        None => req,
      })
      .await?;
    decode_or_error(response).await
  }

  async fn request_unit(&self, method: Method, path: &str) -> Result<()> {
    let response = self.send_authed(method, path, |req| req).await?;
    unit_or_error(response).await
  }

  /// Send an authenticated request, refreshing the access token once on 401.
  ///
  /// `build` runs once per attempt so non-cloneable bodies (multipart forms)
  /// can be rebuilt for the retry.
  async fn send_authed<F>(&self, method: Method, path: &str, build: F) -> Result<Response>
  where
    F: Fn(RequestBuilder) -> RequestBuilder,
  {
    let url = self.url(path)?;
    let (token, generation) = self.current_access()?;
    let token =
      token.ok_or_else(|| eyre!("Not logged in. Run `draftdeck login` first."))?;

    let response = build(self.http.request(method.clone(), url.clone()))
      .bearer_auth(&token)
      .send()
      .await?;

    if response.status() != StatusCode::UNAUTHORIZED {
      return Ok(response);
    }

    // Read the original failure before retrying so it can be surfaced if the
    // refresh does not pan out.
    let original = response_error(response).await;
    debug!(path, "access token rejected, attempting refresh");

    match self.refresh_access(generation).await {
      Ok(fresh) => {
        let retry = build(self.http.request(method, url))
          .bearer_auth(&fresh)
          .send()
          .await?;
        Ok(retry)
      }
      Err(refresh_error) => {
        warn!("token refresh failed: {:#}", refresh_error);
        Err(original)
      }
    }
  }

  /// Refresh the access token, sharing one in-flight refresh across callers.
  ///
  /// `seen_generation` is the generation the caller's rejected token came
  /// from; if the generation moved while waiting for the lock, someone else
  /// already refreshed and the current token is returned as-is.
  async fn refresh_access(&self, seen_generation: u64) -> Result<String> {
    let _guard = self.refresh_lock.lock().await;

    {
      let access = self
        .access
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      if access.generation != seen_generation {
        if let Some(token) = &access.token {
          return Ok(token.clone());
        }
      }
    }

    let refresh_token = self
      .store
      .load()?
      .map(|c| c.refresh)
      .ok_or_else(|| eyre!("no refresh token stored"))?;

    let url = self.url("auth/refresh")?;
    let response = self
      .http
      .post(url)
      .json(&json!({ "refreshToken": refresh_token }))
      .send()
      .await;

    let tokens: TokenPair = match response {
      Ok(response) if response.status().is_success() => {
        decode_or_error(response).await?
      }
      Ok(response) => {
        // The refresh token is no good; a retry loop would never recover.
        self.forget_tokens();
        return Err(response_error(response).await);
      }
      Err(e) => {
        self.forget_tokens();
        return Err(eyre!("refresh request failed: {}", e));
      }
    };

    self.install_tokens(&tokens)?;
    Ok(tokens.access_token)
  }

  fn forget_tokens(&self) {
    if let Err(e) = self.store.clear() {
      warn!("failed to clear credentials: {:#}", e);
    }
    if let Ok(mut access) = self.access.lock() {
      access.token = None;
    }
  }
}

/// Decode a JSON body on success, otherwise build an error from the response.
async fn decode_or_error<T: DeserializeOwned>(response: Response) -> Result<T> {
  let status = response.status();
  if !status.is_success() {
    return Err(response_error(response).await);
  }
  response
    .json()
    .await
    .map_err(|e| eyre!("Failed to parse response ({}): {}", status, e))
}

async fn unit_or_error(response: Response) -> Result<()> {
  if response.status().is_success() {
    return Ok(());
  }
  Err(response_error(response).await)
}

async fn response_error(response: Response) -> color_eyre::Report {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();
  if body.is_empty() {
    eyre!("server returned {}", status)
  } else {
    eyre!("server returned {}: {}", status, body)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::auth::MemoryCredentials;
  use httpmock::MockServer;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn client_with(server: &MockServer, credentials: Option<Credentials>) -> ApiClient {
    let store = Arc::new(MemoryCredentials::new(credentials));
    ApiClient::new(&server.base_url(), store).unwrap()
  }

  fn logged_in(server: &MockServer) -> ApiClient {
    client_with(
      server,
      Some(Credentials {
        access: "old-access".to_string(),
        refresh: "good-refresh".to_string(),
      }),
    )
  }

  #[tokio::test]
  async fn test_request_carries_bearer_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when
        .method("GET")
        .path("/blog/posts")
        .header("authorization", "Bearer old-access");
      then
        .status(200)
        .header("content-type", "application/json")
        .body("[]");
    });

    let client = logged_in(&server);
    let posts = client.list_posts().await.unwrap();
    assert!(posts.is_empty());
    mock.assert();
  }

  #[tokio::test]
  async fn test_unauthenticated_client_fails_before_network() {
    let server = MockServer::start();
    let client = client_with(&server, None);

    let err = client.list_posts().await.unwrap_err();
    assert!(err.to_string().contains("Not logged in"));
  }

  #[tokio::test]
  async fn test_expired_token_refreshes_once_and_retries() {
    let server = MockServer::start();

    let rejected = server.mock(|when, then| {
      when
        .method("GET")
        .path("/blog/posts")
        .header("authorization", "Bearer old-access");
      then.status(401);
    });
    let refresh = server.mock(|when, then| {
      when.method("POST").path("/auth/refresh");
      then
        .status(200)
        .header("content-type", "application/json")
        .body(r#"{"accessToken":"new-access","refreshToken":"new-refresh"}"#);
    });
    let retried = server.mock(|when, then| {
      when
        .method("GET")
        .path("/blog/posts")
        .header("authorization", "Bearer new-access");
      then
        .status(200)
        .header("content-type", "application/json")
        .body("[]");
    });

    let client = logged_in(&server);
    client.list_posts().await.unwrap();

    rejected.assert_hits(1);
    refresh.assert_hits(1);
    retried.assert_hits(1);
  }

  #[tokio::test]
  async fn test_failed_refresh_clears_credentials_and_surfaces_original_error() {
    let server = MockServer::start();

    server.mock(|when, then| {
      when.method("GET").path("/blog/posts");
      then.status(401);
    });
    server.mock(|when, then| {
      when.method("POST").path("/auth/refresh");
      then.status(403);
    });

    let store = Arc::new(MemoryCredentials::new(Some(Credentials {
      access: "old-access".to_string(),
      refresh: "dead-refresh".to_string(),
    })));
    let client = ApiClient::new(&server.base_url(), store.clone()).unwrap();

    let err = client.list_posts().await.unwrap_err();
    assert!(err.to_string().contains("401"));
    assert!(store.load().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_concurrent_expiries_share_one_refresh() {
    let server = MockServer::start();

    server.mock(|when, then| {
      when
        .method("GET")
        .path("/blog/posts")
        .header("authorization", "Bearer old-access");
      then.status(401);
    });
    let refresh = server.mock(|when, then| {
      when.method("POST").path("/auth/refresh");
      then
        .status(200)
        .header("content-type", "application/json")
        .body(r#"{"accessToken":"new-access","refreshToken":"new-refresh"}"#);
    });
    server.mock(|when, then| {
      when
        .method("GET")
        .path("/blog/posts")
        .header("authorization", "Bearer new-access");
      then
        .status(200)
        .header("content-type", "application/json")
        .body("[]");
    });

    let client = Arc::new(logged_in(&server));
    let successes = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
      let client = client.clone();
      let successes = successes.clone();
      handles.push(tokio::spawn(async move {
        client.list_posts().await.unwrap();
        successes.fetch_add(1, Ordering::SeqCst);
      }));
    }
    for result in futures::future::join_all(handles).await {
      result.unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 5);
    refresh.assert_hits(1);
  }

  #[tokio::test]
  async fn test_login_persists_token_pair() {
    let server = MockServer::start();
    server.mock(|when, then| {
      when.method("POST").path("/auth/login");
      then
        .status(200)
        .header("content-type", "application/json")
        .body(r#"{"accessToken":"a1","refreshToken":"r1"}"#);
    });

    let store = Arc::new(MemoryCredentials::new(None));
    let client = ApiClient::new(&server.base_url(), store.clone()).unwrap();

    client.login("me@example.com", "hunter2").await.unwrap();
    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.access, "a1");
    assert_eq!(saved.refresh, "r1");
    assert!(client.is_logged_in());
  }

  #[tokio::test]
  async fn test_upload_sends_kind_specific_field_name() {
    let server = MockServer::start();
    let post = Uuid::new_v4();
    let media = Uuid::new_v4();

    let upload = server.mock(|when, then| {
      when
        .method("POST")
        .path(format!("/blog/posts/{}/images", post));
      then
        .status(201)
        .header("content-type", "application/json")
        .body(format!(
          r#"{{"id":"{}","label":"cover","url":"/media/cover.png"}}"#,
          media
        ));
    });

    let client = logged_in(&server);
    let item = client
      .upload_media(post, MediaKind::Image, "cover", "cover.png", vec![1, 2, 3])
      .await
      .unwrap();

    assert_eq!(item.id, media);
    upload.assert();
  }
}
