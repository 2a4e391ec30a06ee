//! Server artifact updates: check, stage in memory, install with a single
//! rollback generation.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::config::ServerLayout;
use crate::console::Origin;

/// Where new server artifacts come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<u8>>;
}

pub struct HttpSource {
    url: String,
    http: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mca/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { url: url.to_string(), http })
    }
}

#[async_trait]
impl ArtifactSource for HttpSource {
    async fn fetch(&self) -> anyhow::Result<Vec<u8>> {
        tracing::info!("Downloading {}", self.url);
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Failed to download {}: {}", self.url, response.status());
        }
        let bytes = response.bytes().await?;
        tracing::info!("Downloaded {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    Unchanged,
    NewVersionAvailable,
    CheckFailed(String),
}

struct PendingUpdate {
    bytes: Vec<u8>,
    /// Origin whose `y`/`n` answers the install prompt
    awaiting: Option<Origin>,
}

pub struct UpdateManager {
    source: Arc<dyn ArtifactSource>,
    layout: ServerLayout,
    pending: Mutex<Option<PendingUpdate>>,
    /// 동시 체크 직렬화
    check_lock: tokio::sync::Mutex<()>,
}

impl UpdateManager {
    pub fn new(source: Arc<dyn ArtifactSource>, layout: ServerLayout) -> Self {
        Self {
            source,
            layout,
            pending: Mutex::new(None),
            check_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Option<PendingUpdate>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Download the candidate and compare it with the installed artifact.
    /// A new version becomes the pending payload, awaiting `origin`.
    pub async fn check_for_update(&self, origin: Option<Origin>) -> UpdateStatus {
        let _guard = self.check_lock.lock().await;

        let candidate = match self.source.fetch().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Update check failed: {}", e);
                return UpdateStatus::CheckFailed(e.to_string());
            }
        };

        let installed = match tokio::fs::read(self.layout.jar()).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return UpdateStatus::CheckFailed(e.to_string()),
        };

        // 길이 먼저, 그 다음 바이트 비교
        if installed.as_deref() == Some(candidate.as_slice()) {
            return UpdateStatus::Unchanged;
        }

        *self.pending() = Some(PendingUpdate { bytes: candidate, awaiting: origin });
        UpdateStatus::NewVersionAvailable
    }

    pub fn has_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// `true` if `origin` was the one being asked. Answers from any other
    /// origin are ignored.
    pub fn confirm(&self, origin: Origin) -> bool {
        match &mut *self.pending() {
            Some(p) if p.awaiting == Some(origin) => {
                p.awaiting = None;
                true
            }
            _ => false,
        }
    }

    /// Stop waiting for `origin`. The payload stays, so `install` still works.
    pub fn decline(&self, origin: Origin) -> bool {
        self.confirm(origin)
    }

    /// Write the pending payload into place, keeping the current artifact as
    /// the one backup. `Ok(false)` if nothing is pending.
    pub fn install_pending(&self) -> anyhow::Result<bool> {
        let Some(update) = self.pending().take() else {
            return Ok(false);
        };

        if let Err(e) = self.swap_in(&update.bytes) {
            // 실패 시 다음 시도를 위해 payload 복원
            *self.pending() = Some(PendingUpdate { bytes: update.bytes, awaiting: None });
            return Err(e);
        }
        tracing::info!("Installed new server artifact ({} bytes)", update.bytes.len());
        Ok(true)
    }

    fn swap_in(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let current = self.layout.jar();
        let fresh = self.layout.new_jar();
        let backup = self.layout.old_jar();

        std::fs::write(&fresh, bytes)?;
        if backup.exists() {
            std::fs::remove_file(&backup)?;
        }
        if current.exists() {
            std::fs::rename(&current, &backup)?;
        }
        std::fs::rename(&fresh, &current)?;
        Ok(())
    }

    /// Put the backup artifact back. `Ok(false)` if there is none; the
    /// current artifact is left alone.
    pub fn revert(&self) -> anyhow::Result<bool> {
        let current = self.layout.jar();
        let backup = self.layout.old_jar();
        if !backup.exists() {
            return Ok(false);
        }
        if current.exists() {
            std::fs::remove_file(&current)?;
        }
        std::fs::rename(&backup, &current)?;
        tracing::info!("Reverted to previous server artifact");
        Ok(true)
    }

    /// Download the artifact if none is installed. `Ok(true)` if it did.
    pub async fn ensure_artifact(&self) -> anyhow::Result<bool> {
        let path = self.layout.jar();
        if path.exists() {
            return Ok(false);
        }
        let bytes = self.source.fetch().await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(true)
    }
}
