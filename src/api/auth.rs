//! Credential persistence.
//!
//! Two opaque tokens (access + refresh) stored as a small JSON file in the
//! platform data directory. A missing file or missing refresh token means
//! "not logged in", which is a normal state, not an error.

use std::path::PathBuf;
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// The stored token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
  pub access: String,
  pub refresh: String,
}

/// Backend for credential persistence.
pub trait CredentialStore: Send + Sync {
  /// Load stored credentials; `None` means not logged in.
  fn load(&self) -> Result<Option<Credentials>>;

  fn save(&self, credentials: &Credentials) -> Result<()>;

  /// Forget stored credentials. Clearing an empty store is a no-op.
  fn clear(&self) -> Result<()>;
}

/// File-backed credential store.
pub struct FileCredentials {
  path: PathBuf,
}

impl FileCredentials {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Ok(Self {
      path: Self::default_path()?,
    })
  }

  #[cfg(test)]
  pub fn at(path: PathBuf) -> Self {
    Self { path }
  }

  /// Get the default credentials path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("draftdeck").join("credentials.json"))
  }
}

impl CredentialStore for FileCredentials {
  fn load(&self) -> Result<Option<Credentials>> {
    let contents = match std::fs::read_to_string(&self.path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => {
        return Err(eyre!(
          "Failed to read credentials at {}: {}",
          self.path.display(),
          e
        ))
      }
    };

    let credentials: Credentials = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse credentials file: {}", e))?;
    Ok(Some(credentials))
  }

  fn save(&self, credentials: &Credentials) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create credentials directory: {}", e))?;
    }

    let contents = serde_json::to_string_pretty(credentials)
      .map_err(|e| eyre!("Failed to serialize credentials: {}", e))?;
    std::fs::write(&self.path, contents).map_err(|e| {
      eyre!(
        "Failed to write credentials at {}: {}",
        self.path.display(),
        e
      )
    })?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!(
        "Failed to remove credentials at {}: {}",
        self.path.display(),
        e
      )),
    }
  }
}

/// In-memory credential store for tests.
pub struct MemoryCredentials {
  inner: Mutex<Option<Credentials>>,
}

impl MemoryCredentials {
  pub fn new(credentials: Option<Credentials>) -> Self {
    Self {
      inner: Mutex::new(credentials),
    }
  }
}

impl CredentialStore for MemoryCredentials {
  fn load(&self) -> Result<Option<Credentials>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.clone())
  }

  fn save(&self, credentials: &Credentials) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *inner = Some(credentials.clone());
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *inner = None;
    Ok(())
  }
}
