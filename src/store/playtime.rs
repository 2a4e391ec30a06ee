use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::StoreError;

pub const DEFAULT_PLAYTIME_PATH: &str = "played.json";

/// Accumulated playtime per player, plus the login instant of everyone
/// currently online.
pub struct PlaytimeTracker {
    file_path: PathBuf,
    /// player → total seconds from finished sessions
    totals: HashMap<String, u64>,
    logins: HashMap<String, Instant>,
}

#[derive(Serialize, Deserialize)]
struct PlaytimeFile {
    totals: HashMap<String, u64>,
}

impl PlaytimeTracker {
    pub fn new(file_path: &Path) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            totals: HashMap::new(),
            logins: HashMap::new(),
        }
    }

    pub fn load(&mut self) -> Result<(), StoreError> {
        if !self.file_path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.file_path)
            .map_err(|e| StoreError::io(&self.file_path, e))?;
        let file: PlaytimeFile = serde_json::from_str(&content)
            .map_err(|e| StoreError::parse(&self.file_path, e))?;
        self.totals = file.totals;
        Ok(())
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let file = PlaytimeFile { totals: self.totals.clone() };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| StoreError::parse(&self.file_path, e))?;
        std::fs::write(&self.file_path, content).map_err(|e| StoreError::io(&self.file_path, e))
    }

    /// Repeated logins keep the first login instant.
    pub fn login(&mut self, player: &str) {
        self.logins.entry(player.to_string()).or_insert_with(Instant::now);
    }

    pub fn logout(&mut self, player: &str) {
        if let Some(since) = self.logins.remove(player) {
            *self.totals.entry(player.to_string()).or_insert(0) += since.elapsed().as_secs();
        }
    }

    pub fn logout_all(&mut self) {
        let online: Vec<String> = self.logins.keys().cloned().collect();
        for player in online {
            self.logout(&player);
        }
    }

    /// Zero when the player is not online.
    pub fn since_login(&self, player: &str) -> Duration {
        self.logins
            .get(player)
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }

    pub fn total(&self, player: &str) -> Duration {
        let stored = self.totals.get(player).copied().unwrap_or(0);
        Duration::from_secs(stored) + self.since_login(player)
    }
}
