//! Staging directory layout.
//!
//! ```text
//! <root>/graph/<stepId>/entities/<token>.json
//! <root>/graph/<stepId>/relationships/<token>.json
//! <root>/index/entities/<type>/<token>.json        (hard link or copy)
//! <root>/index/relationships/<type>/<token>.json   (hard link or copy)
//! <root>/summary.json
//! ```
//!
//! The root is owned exclusively by one run and recreated at run start.

use std::path::{Path, PathBuf};

use graphbeam_types::{ExecutionSummary, IntegrationError, StepId};

/// Default staging root, relative to the working directory.
pub const DEFAULT_ROOT_DIR: &str = ".j1-integration";

const SUMMARY_FILE: &str = "summary.json";

/// Which kind of graph object a directory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphObjectKind {
    Entities,
    Relationships,
}

impl GraphObjectKind {
    /// Directory segment for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entities => "entities",
            Self::Relationships => "relationships",
        }
    }
}

impl std::fmt::Display for GraphObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file discovered by a directory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub file_path: PathBuf,
}

/// Path helpers and lifecycle operations for one staging root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_DIR)
    }
}

impl StorageLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn graph_dir(&self) -> PathBuf {
        self.root.join("graph")
    }

    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    /// `graph/<stepId>/<kind>/` for a step's flushed files.
    #[must_use]
    pub fn step_dir(&self, step_id: &StepId, kind: GraphObjectKind) -> PathBuf {
        self.graph_dir().join(step_id.as_str()).join(kind.as_str())
    }

    /// `index/<kind>/<type>/` for lookups and iteration by type.
    #[must_use]
    pub fn type_index_dir(&self, kind: GraphObjectKind, object_type: &str) -> PathBuf {
        self.index_dir().join(kind.as_str()).join(object_type)
    }

    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    /// Remove the root recursively and recreate the skeleton directories.
    ///
    /// # Errors
    ///
    /// Returns an `io` error when the root cannot be removed or recreated.
    pub fn reset(&self) -> Result<(), IntegrationError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(self.graph_dir())?;
        std::fs::create_dir_all(self.index_dir())?;
        Ok(())
    }

    /// All files under `dir`, depth-first, children visited in path order.
    ///
    /// Returns an empty list when the directory does not exist.
    ///
    /// # Errors
    ///
    /// Returns an `io` error when a directory cannot be read.
    pub fn walk_dir(&self, dir: &Path) -> Result<Vec<WalkEntry>, IntegrationError> {
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        children.sort();
        for child in children {
            if child.is_dir() {
                out.extend(self.walk_dir(&child)?);
            } else {
                out.push(WalkEntry { file_path: child });
            }
        }
        Ok(out)
    }

    /// All files under the staging root, depth-first.
    ///
    /// # Errors
    ///
    /// Returns an `io` error when a directory cannot be read.
    pub fn walk(&self) -> Result<Vec<WalkEntry>, IntegrationError> {
        let root = self.root.clone();
        self.walk_dir(&root)
    }

    /// Total byte size of everything under the staging root.
    ///
    /// # Errors
    ///
    /// Returns an `io` error when file metadata cannot be read.
    pub fn total_size_bytes(&self) -> Result<u64, IntegrationError> {
        let mut total = 0u64;
        for entry in self.walk()? {
            total += std::fs::metadata(&entry.file_path)?.len();
        }
        Ok(total)
    }

    /// Write `summary.json`. The summary is always plain JSON.
    ///
    /// # Errors
    ///
    /// Returns an `io` error on serialization or write failure.
    pub fn write_summary(&self, summary: &ExecutionSummary) -> Result<(), IntegrationError> {
        let bytes = serde_json::to_vec_pretty(summary)?;
        std::fs::write(self.summary_path(), bytes)?;
        Ok(())
    }

    /// Read `summary.json` back.
    ///
    /// # Errors
    ///
    /// Returns an `io` error when the file is missing or malformed.
    pub fn read_summary(&self) -> Result<ExecutionSummary, IntegrationError> {
        let bytes = std::fs::read(self.summary_path())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
