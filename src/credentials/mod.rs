//! Local persistence of service credentials, keyed by provider name.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::global;

pub const API_KEY_ENV: &str = "CHAT_DIGEST_API_KEY";

/// Where a resolved credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Flag,
    Environment,
    Store,
    Prompt,
}

impl CredentialSource {
    /// Whether saving the credential would add anything new to the store.
    pub fn is_unsaved(&self) -> bool {
        !matches!(self, CredentialSource::Store)
    }
}

pub struct CredentialStore {
    path: PathBuf,
    lock_path: PathBuf,
}

struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl CredentialStore {
    pub fn open_default() -> Result<Self> {
        Ok(Self {
            path: global::credentials_file()?,
            lock_path: global::credentials_lock_file()?,
        })
    }

    /// Store rooted in `dir`, used by tests and `--config-dir` style overrides.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join("credentials.json"),
            lock_path: dir.join("credentials.lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, provider: &str) -> Result<Option<String>> {
        let _lock = self.lock(false)?;
        Ok(self.read_all()?.remove(provider))
    }

    pub fn set(&self, provider: &str, api_key: &str) -> Result<()> {
        let _lock = self.lock(true)?;
        let mut entries = self.read_all()?;
        entries.insert(provider.to_string(), api_key.trim().to_string());
        self.write_all(&entries)?;
        info!("Saved {} credential to {:?}", provider, self.path);
        Ok(())
    }

    pub fn remove(&self, provider: &str) -> Result<bool> {
        let _lock = self.lock(true)?;
        let mut entries = self.read_all()?;
        let removed = entries.remove(provider).is_some();
        if removed {
            self.write_all(&entries)?;
        }
        Ok(removed)
    }

    fn lock(&self, exclusive: bool) -> Result<StoreLock> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create credentials directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open {}", self.lock_path.display()))?;
        if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        }
        .context("Failed to acquire credentials lock")?;
        Ok(StoreLock { file })
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content =
            std::fs::read_to_string(&self.path).context("Failed to read credentials file")?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).context("Failed to parse credentials file")
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let content =
            serde_json::to_string_pretty(entries).context("Failed to serialize credentials")?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).context("Failed to write credentials file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&tmp_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&tmp_path, perms)?;
        }
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Resolve a credential: explicit flag, environment, store, then `prompt`.
pub fn resolve_api_key<F>(
    flag: Option<String>,
    env: Option<String>,
    store: &CredentialStore,
    provider: &str,
    prompt: F,
) -> Result<Option<(String, CredentialSource)>>
where
    F: FnOnce() -> Result<Option<String>>,
{
    let non_empty = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(key) = non_empty(flag) {
        return Ok(Some((key, CredentialSource::Flag)));
    }
    if let Some(key) = non_empty(env) {
        debug!("Using credential from {}", API_KEY_ENV);
        return Ok(Some((key, CredentialSource::Environment)));
    }
    if let Some(key) = non_empty(store.get(provider)?) {
        debug!("Using stored {} credential", provider);
        return Ok(Some((key, CredentialSource::Store)));
    }
    Ok(non_empty(prompt()?).map(|key| (key, CredentialSource::Prompt)))
}
