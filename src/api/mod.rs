//! Draftdeck backend API: wire types, the HTTP client, credential storage,
//! and the cached client the CLI talks to.

pub mod auth;
pub mod cached;
pub mod client;
pub mod types;

pub use cached::CachedApiClient;
pub use client::ApiClient;
