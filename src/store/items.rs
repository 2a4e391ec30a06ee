use std::path::Path;

pub const DEFAULT_ITEMS_PATH: &str = "ids.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: u32,
    pub name: String,
}

/// Item id lookup built from an `id:name` per line text file.
#[derive(Debug, Default)]
pub struct ItemTable {
    items: Vec<Item>,
}

impl ItemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`. A missing file leaves the table empty; malformed lines
    /// are skipped.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            tracing::warn!("No item list found at {}, item lookup disabled", path.display());
            return Ok(Self::default());
        }
        tracing::info!("Loading items from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    fn parse(content: &str) -> Self {
        let items = content
            .lines()
            .filter_map(|line| {
                let (id, name) = line.split_once(':')?;
                Some(Item {
                    id: id.trim().parse().ok()?,
                    name: name.trim().to_string(),
                })
            })
            .collect();
        Self { items }
    }

    /// Case-insensitive substring search over item names.
    pub fn find(&self, name: &str) -> Vec<&Item> {
        let needle = name.to_lowercase();
        self.items
            .iter()
            .filter(|item| item.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
