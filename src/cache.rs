use std::{
    fs::{create_dir_all, remove_file, rename, File},
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{file_record::FileRecord, node_record::NodeRecord};

///
/// Snapshot of both registries, persisted as JSON between runs.
///
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Cache {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl Cache {
    pub fn parse_from_file(file_path: &Path) -> Result<Self> {
        let file = File::open(file_path)
            .with_context(|| format!("Unable to open snapshot {}", file_path.display()))?;
        let reader = BufReader::new(file);
        let cache: Cache = serde_json::from_reader(reader)
            .with_context(|| format!("Unable to parse snapshot {}", file_path.display()))?;

        Ok(cache)
    }

    ///
    /// Writes to a sibling temp file first, then renames it over the target.
    ///
    /// Every call uses its own temp file, concurrent saves never interleave their bytes and the
    /// last rename wins.
    ///
    pub fn save_to_file(&self, file_path: &Path) -> Result<()> {
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_dir_all(parent)?;
            }
        }

        let temp_path = file_path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        let written = File::create(&temp_path)
            .with_context(|| format!("Unable to create {}", temp_path.display()))
            .and_then(|file| serde_json::to_writer_pretty(file, self).map_err(Into::into))
            .and_then(|()| {
                rename(&temp_path, file_path)
                    .with_context(|| format!("Unable to replace {}", file_path.display()))
            });
        if written.is_err() {
            let _ = remove_file(&temp_path);
        }
        written
    }
}
