//! Token persistence.

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use {
    anyhow::Context,
    async_trait::async_trait,
    tokio::sync::Mutex,
    tracing::{debug, info},
};

use crate::types::TokenSet;

const TOKEN_FILE_NAME: &str = "oauth_tokens.json";

/// Where token sets are saved after login or refresh.
#[async_trait]
pub trait TokenSink: Send + Sync {
    async fn save(&self, account_id: &str, tokens: &TokenSet) -> anyhow::Result<()>;
    async fn load(&self, account_id: &str) -> anyhow::Result<Option<TokenSet>>;
}

/// Token sets keyed by account id in one JSON file, written with owner-only
/// permissions.
pub struct TokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `oauth_tokens.json` in the c2switch config directory.
    pub fn default_path() -> Option<PathBuf> {
        c2switch_config::config_dir().map(|dir| dir.join(TOKEN_FILE_NAME))
    }

    pub fn open_default() -> anyhow::Result<Self> {
        let path = Self::default_path().context("no config directory available")?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored account. A missing file is an empty store.
    pub async fn load_all(&self) -> anyhow::Result<BTreeMap<String, TokenSet>> {
        let path = self.path.clone();
        blocking(move || read_store(&path)).await
    }

    pub async fn accounts(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.load_all().await?.into_keys().collect())
    }

    /// Returns whether anything was removed.
    pub async fn remove(&self, account_id: &str) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load_all().await?;
        let removed = all.remove(account_id).is_some();
        if removed {
            self.write_all(all).await?;
            info!(account_id, "removed stored tokens");
        }
        Ok(removed)
    }

    async fn write_all(&self, all: BTreeMap<String, TokenSet>) -> anyhow::Result<()> {
        let path = self.path.clone();
        blocking(move || {
            let json = serde_json::to_vec_pretty(&all)?;
            write_private_file(&path, &json).with_context(|| format!("writing {}", path.display()))
        })
        .await
    }
}

#[async_trait]
impl TokenSink for TokenStore {
    async fn save(&self, account_id: &str, tokens: &TokenSet) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load_all().await?;
        all.insert(account_id.to_string(), tokens.clone());
        self.write_all(all).await?;
        debug!(account_id, path = %self.path.display(), "saved tokens");
        Ok(())
    }

    async fn load(&self, account_id: &str) -> anyhow::Result<Option<TokenSet>> {
        Ok(self.load_all().await?.remove(account_id))
    }
}

/// Run file I/O on the blocking pool.
async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("token store task failed")?
}

fn read_store(path: &Path) -> anyhow::Result<BTreeMap<String, TokenSet>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Replace `path` atomically with `contents`, readable by the owner only.
///
/// Writes a sibling temp file and renames it over the target. Parent
/// directories are created with mode 0700 on Unix.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_private_dir(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let written = (|| {
        let mut file = open_private(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if written.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // An existing temp file keeps its old mode; force it.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
