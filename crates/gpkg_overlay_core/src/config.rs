//! Session configuration.
//!
//! # Invariants
//! - The side store defaults to `<dataset stem>_data.sqlite` next to the
//!   dataset; the legacy plan file to `<dataset stem>_plans.sqlite`.

use std::path::{Path, PathBuf};

const STORE_SUFFIX: &str = "_data.sqlite";
const LEGACY_PLANS_SUFFIX: &str = "_plans.sqlite";

/// Where a session reads its dataset and keeps its side store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub dataset_path: PathBuf,
    pub store_path: PathBuf,
    /// Layer to open; `None` picks the first layer of the dataset.
    pub layer: Option<String>,
}

impl SessionConfig {
    pub fn for_dataset(dataset_path: impl Into<PathBuf>) -> Self {
        let dataset_path = dataset_path.into();
        let store_path = sibling(&dataset_path, STORE_SUFFIX);
        Self {
            dataset_path,
            store_path,
            layer: None,
        }
    }

    pub fn with_store_path(mut self, store_path: impl Into<PathBuf>) -> Self {
        self.store_path = store_path.into();
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    /// Plan file written by older releases, imported once on open.
    pub fn legacy_plans_path(&self) -> PathBuf {
        sibling(&self.dataset_path, LEGACY_PLANS_SUFFIX)
    }
}

fn sibling(dataset_path: &Path, suffix: &str) -> PathBuf {
    let stem = dataset_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    dataset_path.with_file_name(format!("{stem}{suffix}"))
}
