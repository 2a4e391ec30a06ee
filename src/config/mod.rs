//! MCA settings (`mca.toml`)
//!
//! Known keys are typed fields; anything else lands in `extra` and is written
//! back untouched on save.

pub mod properties;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use properties::ServerProperties;

pub const DEFAULT_CONFIG_PATH: &str = "mca.toml";
pub const DEFAULT_UPDATE_URL: &str = "http://www.minecraft.net/download/minecraft_server.jar";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McaConfig {
    /// Remote console bind address
    #[serde(default = "default_console_ip")]
    pub console_ip: String,
    #[serde(default = "default_console_port")]
    pub console_port: u16,
    /// Start the remote console together with the supervisor
    #[serde(default)]
    pub console_autostart: bool,
    /// Backup interval in minutes, 0 = disabled
    #[serde(default)]
    pub backup_interval: f64,
    #[serde(default)]
    pub backup_dir: String,
    #[serde(default = "default_java")]
    pub java: String,
    #[serde(default = "default_java_args")]
    pub java_args: Vec<String>,
    #[serde(default = "default_server_jar")]
    pub server_jar: String,
    #[serde(default = "default_update_url")]
    pub update_url: String,
    /// Unrecognized keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

fn default_console_ip() -> String { "0.0.0.0".to_string() }
fn default_console_port() -> u16 { 25566 }
fn default_java() -> String { "java".to_string() }
fn default_java_args() -> Vec<String> { vec!["-Xmx1024M".to_string(), "-Xms1024M".to_string()] }
fn default_server_jar() -> String { "minecraft_server.jar".to_string() }
fn default_update_url() -> String { DEFAULT_UPDATE_URL.to_string() }

impl Default for McaConfig {
    fn default() -> Self {
        Self {
            console_ip: default_console_ip(),
            console_port: default_console_port(),
            console_autostart: false,
            backup_interval: 0.0,
            backup_dir: String::new(),
            java: default_java(),
            java_args: default_java_args(),
            server_jar: default_server_jar(),
            update_url: default_update_url(),
            extra: BTreeMap::new(),
        }
    }
}

impl McaConfig {
    /// Config path from `MCA_CONFIG`, falling back to `./mca.toml`.
    pub fn resolve_path() -> PathBuf {
        std::env::var("MCA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("No MCA settings file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        tracing::info!("MCA settings loaded from {}", path.display());
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Backup destination, `None` when blank.
    pub fn backup_destination(&self) -> Option<PathBuf> {
        let dir = self.backup_dir.trim();
        if dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(dir))
        }
    }

    /// Command-line arguments for the server JVM.
    pub fn server_args(&self) -> Vec<String> {
        let mut args = self.java_args.clone();
        args.push("-jar".to_string());
        args.push(self.server_jar.clone());
        args.push("nogui".to_string());
        args
    }

    /// Fallback lookup for keys without a typed field.
    pub fn get_extra(&self, key: &str) -> Option<&toml::Value> {
        self.extra.get(key)
    }

    pub fn set_extra(&mut self, key: &str, value: toml::Value) {
        self.extra.insert(key.to_string(), value);
    }
}

/// Where the supervisor finds the game server and its own state files.
/// Relative paths resolve against `root`, the server's working directory.
#[derive(Debug, Clone)]
pub struct ServerLayout {
    pub root: PathBuf,
    pub server_jar: String,
}

impl ServerLayout {
    pub fn new(root: impl Into<PathBuf>, server_jar: &str) -> Self {
        Self { root: root.into(), server_jar: server_jar.to_string() }
    }

    pub fn jar(&self) -> PathBuf {
        self.root.join(&self.server_jar)
    }

    /// `minecraft_server.jar` → `minecraft_server_old.jar`
    pub fn old_jar(&self) -> PathBuf {
        self.jar_variant("_old", "jar")
    }

    /// Staging file for an install in progress.
    pub fn new_jar(&self) -> PathBuf {
        self.jar_variant("_new", "jar")
    }

    fn jar_variant(&self, suffix: &str, ext: &str) -> PathBuf {
        let stem = Path::new(&self.server_jar)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "minecraft_server".to_string());
        self.root.join(format!("{}{}.{}", stem, suffix, ext))
    }

    pub fn properties(&self) -> PathBuf {
        self.root.join(properties::DEFAULT_PROPERTIES_PATH)
    }

    pub fn ops(&self) -> PathBuf {
        self.root.join(crate::store::ops::DEFAULT_OPS_PATH)
    }

    pub fn items(&self) -> PathBuf {
        self.root.join(crate::store::items::DEFAULT_ITEMS_PATH)
    }

    pub fn binds(&self) -> PathBuf {
        self.root.join(crate::store::binds::DEFAULT_BINDS_PATH)
    }

    pub fn playtime(&self) -> PathBuf {
        self.root.join(crate::store::playtime::DEFAULT_PLAYTIME_PATH)
    }

    pub fn recovery(&self) -> PathBuf {
        self.root.join(crate::supervisor::recovery::RECOVERY_FILE)
    }
}
