//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Location of the on-disk store; `None` keeps everything in memory.
    pub store_path: Option<PathBuf>,
    /// Whether the resolver checks the filesystem before accepting a
    /// file URL that is not yet known to the store.
    pub stat_local_files: bool,
    /// Bound of each watch subscription's event queue; events beyond it are
    /// dropped rather than blocking the engine.
    pub watch_queue_capacity: usize,
}

impl Config {
    pub fn in_memory() -> Self {
        Config {
            store_path: None,
            ..Config::default()
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Config {
            store_path: Some(path.into()),
            ..Config::default()
        }
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)
            .map_err(|e| Error::internal(e.to_string()))?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let config: Config =
            serde_json::from_reader(reader).map_err(|e| Error::internal(e.to_string()))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_path: None,
            stat_local_files: true,
            watch_queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("semstore.json");
        let config = Config::at_path(dir.path().join("store"));
        config.save_to_file(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }
}
