//! Off-database storage for credential attributes and controller admin
//! passwords.
//!
//! When a secret store is configured the catalog never holds these values;
//! it records a boolean indicator and the store holds the real payload under
//! `/<root>/creds/<cloud>/<owner>/<name>` or `/<root>/controllers/<name>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::{JimmError, JimmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Opaque key/value storage for secret material.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Stores the attribute map at the given path, replacing any previous
    /// value.
    async fn put(&self, path: &str, attributes: HashMap<String, String>) -> JimmResult<()>;

    /// Retrieves the attribute map at the given path, or `None` if nothing
    /// is stored there.
    async fn get(&self, path: &str) -> JimmResult<Option<HashMap<String, String>>>;

    /// Deletes any value stored at the given path.
    async fn delete(&self, path: &str) -> JimmResult<()>;
}

/// A secret store holding one JSON file per path under a root directory.
#[derive(Debug)]
pub struct FileSecretStore {
    root: PathBuf,
}

/// An in-memory secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: std::sync::Mutex<HashMap<String, HashMap<String, String>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FileSecretStore {
    /// Creates a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSecretStore { root: root.into() }
    }

    fn entry_path(&self, path: &str) -> JimmResult<PathBuf> {
        if path.is_empty() || path.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(JimmError::BadRequest(format!(
                "invalid secret path {:?}",
                path
            )));
        }
        Ok(self.root.join(Path::new(path)).with_extension("json"))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn put(&self, path: &str, attributes: HashMap<String, String>) -> JimmResult<()> {
        let file = self.entry_path(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec(&attributes)?;
        fs::write(&file, payload).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> JimmResult<Option<HashMap<String, String>>> {
        let file = self.entry_path(path)?;
        match fs::read(&file).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> JimmResult<()> {
        let file = self.entry_path(path)?;
        match fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, path: &str, attributes: HashMap<String, String>) -> JimmResult<()> {
        self.entries
            .lock()
            .expect("secret store poisoned")
            .insert(path.to_string(), attributes);
        Ok(())
    }

    async fn get(&self, path: &str) -> JimmResult<Option<HashMap<String, String>>> {
        Ok(self
            .entries
            .lock()
            .expect("secret store poisoned")
            .get(path)
            .cloned())
    }

    async fn delete(&self, path: &str) -> JimmResult<()> {
        self.entries
            .lock()
            .expect("secret store poisoned")
            .remove(path);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the secret-store path for a credential's attributes.
pub fn credential_secret_path(cloud: &str, owner: &str, name: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        crate::utils::SECRET_CREDS_SUBPATH,
        cloud,
        owner,
        name
    )
}

/// Returns the secret-store path for a controller's admin credentials.
pub fn controller_secret_path(controller_name: &str) -> String {
    format!(
        "{}/{}",
        crate::utils::SECRET_CONTROLLERS_SUBPATH,
        controller_name
    )
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_file_secret_store_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileSecretStore::new(dir.path());

        let path = credential_secret_path("aws", "alice@external", "default");
        let mut attrs = HashMap::new();
        attrs.insert("access-key".to_string(), "AKIA".to_string());
        attrs.insert("secret-key".to_string(), "s3cret".to_string());

        store.put(&path, attrs.clone()).await?;
        assert_eq!(store.get(&path).await?, Some(attrs));

        store.delete(&path).await?;
        assert_eq!(store.get(&path).await?, None);

        // Deleting a missing entry is not an error.
        store.delete(&path).await?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_file_secret_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path());
        let err = store.get("creds/../../etc/passwd").await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::BadRequest);
    }
}
