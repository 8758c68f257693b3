use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tempfile::Builder;
use tracing::debug;

use crate::das::DasDocument;
use crate::domain::{DatasetId, Protocol};
use crate::error::IngestError;

const SCRATCH_EXTENSIONS: &[&str] = &["csv", "nc", "geojson"];

/// Transient working storage: the DAS cache and the scratch download directory.
#[derive(Debug, Clone)]
pub struct Store {
    das_root: Utf8PathBuf,
    scratch_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, IngestError> {
        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("erddap-ingest"))
                    .ok()
            })
            .ok_or_else(|| {
                IngestError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            das_root: cache_root.join("das"),
            scratch_root: cache_root.join("scratch"),
        })
    }

    pub fn new_with_paths(das_root: Utf8PathBuf, scratch_root: Utf8PathBuf) -> Self {
        Self {
            das_root,
            scratch_root,
        }
    }

    pub fn das_root(&self) -> &Utf8Path {
        &self.das_root
    }

    pub fn scratch_root(&self) -> &Utf8Path {
        &self.scratch_root
    }

    pub fn das_path(&self, id: &DatasetId) -> Utf8PathBuf {
        self.das_root.join(format!("{id}.json"))
    }

    /// Each dataset downloads into its own `<scratch>/<id>/` directory: `<id>.<ext>` for a
    /// single request, `<id>_<n>.<ext>` (1-based) for chunks.
    pub fn chunk_path(
        &self,
        id: &DatasetId,
        protocol: Protocol,
        index: usize,
        total: usize,
    ) -> Utf8PathBuf {
        let ext = protocol.file_extension();
        let dir = self.dataset_scratch_dir(id);
        if total <= 1 {
            dir.join(format!("{id}.{ext}"))
        } else {
            dir.join(format!("{id}_{}.{ext}", index + 1))
        }
    }

    pub fn dataset_scratch_dir(&self, id: &DatasetId) -> Utf8PathBuf {
        self.scratch_root.join(id.as_str())
    }

    pub fn ensure_das_root(&self) -> Result<(), IngestError> {
        fs::create_dir_all(self.das_root.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))
    }

    pub fn ensure_scratch_root(&self) -> Result<(), IngestError> {
        fs::create_dir_all(self.scratch_root.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))
    }

    pub fn read_das(&self, id: &DatasetId) -> Result<Option<DasDocument>, IngestError> {
        let path = self.das_path(id);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let doc = serde_json::from_str(&content)
            .map_err(|err| IngestError::Filesystem(format!("corrupt DAS cache {path}: {err}")))?;
        Ok(Some(doc))
    }

    pub fn write_das(&self, id: &DatasetId, doc: &DasDocument) -> Result<Utf8PathBuf, IngestError> {
        let path = self.das_path(id);
        let content = serde_json::to_vec_pretty(doc)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&path, &content)?;
        debug!(dataset = %id, path = %path, "cached DAS");
        Ok(path)
    }

    /// Returns whether a cache entry existed.
    pub fn invalidate_das(&self, id: &DatasetId) -> Result<bool, IngestError> {
        let path = self.das_path(id);
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(true)
    }

    pub fn clear_das(&self) -> Result<(), IngestError> {
        if self.das_root.as_std_path().exists() {
            fs::remove_dir_all(self.das_root.as_std_path())
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    /// Removes downloaded data files from the scratch directory and the per-dataset
    /// directories below it, returning how many were deleted. Anything that is not a
    /// data file is left in place, and a dataset directory is removed once empty.
    pub fn clean_scratch(&self) -> Result<usize, IngestError> {
        if !self.scratch_root.as_std_path().exists() {
            return Ok(0);
        }
        let mut removed = remove_data_files(self.scratch_root.as_std_path())?;
        let entries = fs::read_dir(self.scratch_root.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        for entry in entries {
            let path = entry
                .map_err(|err| IngestError::Filesystem(err.to_string()))?
                .path();
            if !path.is_dir() {
                continue;
            }
            removed += remove_data_files(&path)?;
            let is_empty = fs::read_dir(&path)
                .map(|mut rest| rest.next().is_none())
                .unwrap_or(false);
            if is_empty {
                fs::remove_dir(&path).map_err(|err| IngestError::Filesystem(err.to_string()))?;
            }
        }
        Ok(removed)
    }

    /// Writes through a temp file in the destination directory so readers never see a
    /// half-written file.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), IngestError> {
        let parent = path
            .parent()
            .ok_or_else(|| IngestError::Filesystem("invalid destination path".to_string()))?;
        let parent = if parent.as_str().is_empty() {
            Utf8Path::new(".")
        } else {
            parent
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix(".erddap-ingest")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn remove_data_files(dir: &Path) -> Result<usize, IngestError> {
    let entries = fs::read_dir(dir).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    let mut removed = 0;
    for entry in entries {
        let path = entry
            .map_err(|err| IngestError::Filesystem(err.to_string()))?
            .path();
        let is_data = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SCRATCH_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
        if is_data {
            fs::remove_file(&path).map_err(|err| IngestError::Filesystem(err.to_string()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_paths(
            Utf8PathBuf::from("/cache/das"),
            Utf8PathBuf::from("/cache/scratch"),
        );
        let id: DatasetId = "gcoos_42G01".parse().unwrap();
        assert_eq!(store.das_path(&id), "/cache/das/gcoos_42G01.json");
        assert_eq!(
            store.chunk_path(&id, Protocol::Tabledap, 0, 1),
            "/cache/scratch/gcoos_42G01/gcoos_42G01.csv"
        );
        assert_eq!(
            store.chunk_path(&id, Protocol::Griddap, 2, 4),
            "/cache/scratch/gcoos_42G01/gcoos_42G01_3.nc"
        );
    }

    #[test]
    fn chunk_and_single_names_never_collide_across_datasets() {
        let store = Store::new_with_paths(
            Utf8PathBuf::from("/cache/das"),
            Utf8PathBuf::from("/cache/scratch"),
        );
        let x: DatasetId = "x".parse().unwrap();
        let x_1: DatasetId = "x_1".parse().unwrap();
        for total in [2, 4] {
            assert_ne!(
                store.chunk_path(&x, Protocol::Tabledap, 0, total),
                store.chunk_path(&x_1, Protocol::Tabledap, 0, 1)
            );
        }
        let x_dot: DatasetId = "x.1".parse().unwrap();
        assert_ne!(
            store.chunk_path(&x, Protocol::Tabledap, 0, 2),
            store.chunk_path(&x_dot, Protocol::Tabledap, 0, 1)
        );
    }
}
