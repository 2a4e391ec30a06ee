//! `server.properties`: the game server's own `key=value` settings file.
//!
//! Comment lines and key order are kept so the file survives a round trip
//! through the supervisor unchanged apart from the edited keys.

use std::path::{Path, PathBuf};

pub const DEFAULT_PROPERTIES_PATH: &str = "server.properties";

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Pair { key: String, value: String },
    Other(String),
}

#[derive(Debug, Clone)]
pub struct ServerProperties {
    path: PathBuf,
    lines: Vec<Line>,
}

impl ServerProperties {
    /// Load the file, `Ok(None)` if it does not exist yet.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(Self::parse(path, &content)))
    }

    fn parse(path: &Path, content: &str) -> Self {
        let lines = content
            .lines()
            .map(|raw| {
                let trimmed = raw.trim_start();
                if trimmed.starts_with('#') || trimmed.starts_with('!') {
                    return Line::Other(raw.to_string());
                }
                match raw.split_once('=') {
                    Some((key, value)) => Line::Pair {
                        key: key.trim().to_string(),
                        value: value.trim().to_string(),
                    },
                    None => Line::Other(raw.to_string()),
                }
            })
            .collect();

        Self { path: path.to_path_buf(), lines }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Pair { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
                Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set a key in memory and write the file.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let existing = self.lines.iter_mut().find_map(|line| match line {
            Line::Pair { key: k, value } if k == key => Some(value),
            _ => None,
        });
        match existing {
            Some(slot) => *slot = value.to_string(),
            None => self.lines.push(Line::Pair {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
        self.save()
    }

    pub fn level_name(&self) -> Option<&str> {
        self.get("level-name").filter(|name| !name.is_empty())
    }

    pub fn online_mode(&self) -> Option<bool> {
        self.get("online-mode")
            .and_then(|v| v.to_ascii_lowercase().parse::<bool>().ok())
    }

    pub fn max_players(&self) -> Option<u32> {
        self.get("max-players").and_then(|v| v.parse().ok())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
