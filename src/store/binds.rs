use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::StoreError;

pub const DEFAULT_BINDS_PATH: &str = "binds.json";

/// Per-player command aliases: player → (name → command)
#[derive(Debug, Default, Serialize, Deserialize)]
struct BindFile {
    players: HashMap<String, HashMap<String, String>>,
}

pub struct BindTable {
    file_path: PathBuf,
    binds: BindFile,
}

impl BindTable {
    pub fn new(file_path: &Path) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            binds: BindFile::default(),
        }
    }

    /// 파일에서 로드 (없으면 빈 테이블)
    pub fn load(&mut self) -> Result<(), StoreError> {
        if !self.file_path.exists() {
            self.binds = BindFile::default();
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.file_path)
            .map_err(|e| StoreError::io(&self.file_path, e))?;
        self.binds = serde_json::from_str(&content)
            .map_err(|e| StoreError::parse(&self.file_path, e))?;
        tracing::info!("Loaded binds for {} players", self.binds.players.len());
        Ok(())
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&self.binds)
            .map_err(|e| StoreError::parse(&self.file_path, e))?;
        std::fs::write(&self.file_path, content).map_err(|e| StoreError::io(&self.file_path, e))
    }

    /// Bind `name` to `command` for `player`. A bind whose name is its own
    /// command is ignored.
    pub fn bind(&mut self, player: &str, name: &str, command: &str) {
        if name == command {
            return;
        }
        self.binds
            .players
            .entry(player.to_string())
            .or_default()
            .insert(name.to_string(), command.to_string());
    }

    pub fn unbind(&mut self, player: &str, name: &str) {
        if let Some(binds) = self.binds.players.get_mut(player) {
            binds.remove(name);
        }
    }

    pub fn get(&self, player: &str, name: &str) -> Option<&str> {
        self.binds
            .players
            .get(player)
            .and_then(|binds| binds.get(name))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_unbind() {
        let mut table = BindTable::new(Path::new("unused.json"));
        table.bind("Notch", "home", "tp Notch 0 64 0");
        assert_eq!(table.get("Notch", "home"), Some("tp Notch 0 64 0"));
        assert_eq!(table.get("jeb_", "home"), None);

        table.bind("Notch", "home", "tp Notch 10 64 10");
        assert_eq!(table.get("Notch", "home"), Some("tp Notch 10 64 10"));

        table.unbind("Notch", "home");
        assert_eq!(table.get("Notch", "home"), None);
        // 없는 바인드 해제는 no-op
        table.unbind("nobody", "home");
    }

    #[test]
    fn test_self_bind_ignored() {
        let mut table = BindTable::new(Path::new("unused.json"));
        table.bind("Notch", "time", "time");
        assert_eq!(table.get("Notch", "time"), None);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("binds.json");

        let mut table = BindTable::new(&path);
        table.bind("Notch", "d", "give Notch 264 64");
        table.save().unwrap();

        let mut reloaded = BindTable::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("Notch", "d"), Some("give Notch 264 64"));
    }

    #[test]
    fn test_load_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("binds.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut table = BindTable::new(&path);
        assert!(matches!(table.load(), Err(StoreError::Parse { .. })));
    }
}
