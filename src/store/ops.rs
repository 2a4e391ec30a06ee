use std::path::Path;

pub const DEFAULT_OPS_PATH: &str = "ops.txt";

/// Operator names as written by the game server, one per line.
#[derive(Debug, Clone, Default)]
pub struct OpsList {
    names: Vec<String>,
}

impl OpsList {
    /// `Ok(None)` when the server has not written an ops file yet.
    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        tracing::info!("Loading ops from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let names = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        Ok(Some(Self { names }))
    }

    pub fn contains(&self, player: &str) -> bool {
        self.names.iter().any(|name| name.eq_ignore_ascii_case(player))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
