//! Small keyed stores the supervisor reads and writes: player binds,
//! playtime, the ops list and the item lookup table.

pub mod binds;
pub mod items;
pub mod ops;
pub mod playtime;

pub use binds::BindTable;
pub use items::{Item, ItemTable};
pub use ops::OpsList;
pub use playtime::PlaytimeTracker;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io { path: path.display().to_string(), source }
    }

    fn parse(path: &std::path::Path, source: serde_json::Error) -> Self {
        Self::Parse { path: path.display().to_string(), source }
    }
}
