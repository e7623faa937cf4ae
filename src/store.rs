use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::SpeciesName;
use crate::error::OccError;
use crate::fingerprint::Fingerprint;
use crate::query::OccurrenceFilters;

/// Project-local report directory plus a shared per-user cache, both with the
/// same `reports/` + `metadata/` layout.
#[derive(Debug, Clone)]
pub struct Store {
    project_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, OccError> {
        let cwd = std::env::current_dir().map_err(|err| OccError::Filesystem(err.to_string()))?;
        let project_root = Utf8PathBuf::from_path_buf(cwd.join(".gbif-occ"))
            .map_err(|_| OccError::Filesystem("invalid project path".to_string()))?;

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("gbif-occ")).ok()
            })
            .ok_or_else(|| OccError::Filesystem("unable to resolve cache directory".to_string()))?;

        Ok(Self {
            project_root,
            cache_root,
        })
    }

    pub fn new_with_paths(project_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            project_root,
            cache_root,
        }
    }

    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn project_geodata_path(&self, fingerprint: &Fingerprint) -> Utf8PathBuf {
        geodata_path(&self.project_root, fingerprint)
    }

    pub fn cache_geodata_path(&self, fingerprint: &Fingerprint) -> Utf8PathBuf {
        geodata_path(&self.cache_root, fingerprint)
    }

    pub fn project_coordinates_path(&self, fingerprint: &Fingerprint) -> Utf8PathBuf {
        self.project_root
            .join("reports")
            .join(fingerprint.coordinates_file_name())
    }

    pub fn project_metadata_path(&self, fingerprint: &Fingerprint) -> Utf8PathBuf {
        metadata_path(&self.project_root, fingerprint)
    }

    pub fn cache_metadata_path(&self, fingerprint: &Fingerprint) -> Utf8PathBuf {
        metadata_path(&self.cache_root, fingerprint)
    }

    pub fn ensure_project_root(&self) -> Result<(), OccError> {
        fs::create_dir_all(self.project_root.as_std_path())
            .map_err(|err| OccError::Filesystem(err.to_string()))
    }

    pub fn ensure_cache_root(&self) -> Result<(), OccError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| OccError::Filesystem(err.to_string()))
    }

    pub fn exists(path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn clear_project(&self) -> Result<(), OccError> {
        if self.project_root.as_std_path().exists() {
            fs::remove_dir_all(self.project_root.as_std_path())
                .map_err(|err| OccError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &Metadata) -> Result<(), OccError> {
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|err| OccError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_metadata(path: &Utf8Path) -> Result<Metadata, OccError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| OccError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| OccError::Filesystem(format!("parse {path}: {err}")))
    }

    /// Writes through a sibling temp file and renames it into place.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), OccError> {
        let parent = path
            .parent()
            .ok_or_else(|| OccError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| OccError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("gbif-occ-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| OccError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| OccError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| OccError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), OccError> {
        let content = fs::read(source.as_std_path())
            .map_err(|err| OccError::Filesystem(format!("read {source}: {err}")))?;
        Self::write_bytes_atomic(dest, &content)
    }

    /// Metadata sidecars under `root/metadata`, sorted by fingerprint.
    pub fn list_metadata(root: &Utf8Path) -> Result<Vec<Metadata>, OccError> {
        let metadata_root = root.join("metadata");
        if !metadata_root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        let dir = fs::read_dir(metadata_root.as_std_path())
            .map_err(|err| OccError::Filesystem(err.to_string()))?;
        for entry in dir {
            let path = entry
                .map_err(|err| OccError::Filesystem(err.to_string()))?
                .path();
            if !path.is_file() || path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(path)
                .map_err(|_| OccError::Filesystem("non-utf8 metadata path".to_string()))?;
            entries.push(Self::read_metadata(&path)?);
        }
        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(entries)
    }
}

/// Sidecar describing one cached occurrence table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub source: String,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub search_name: Option<String>,
    pub species: Vec<SpeciesName>,
    pub filters: OccurrenceFilters,
    pub records: usize,
    pub downloaded_at: String,
    pub tool: String,
    pub resolved_path: String,
}

fn geodata_path(root: &Utf8Path, fingerprint: &Fingerprint) -> Utf8PathBuf {
    root.join("reports").join(fingerprint.geodata_file_name())
}

fn metadata_path(root: &Utf8Path, fingerprint: &Fingerprint) -> Utf8PathBuf {
    root.join("metadata")
        .join(format!("{}.json", fingerprint.as_str()))
}
