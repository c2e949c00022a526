use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{de::DeserializeOwned, Serialize};

use crate::contracts::PipelineResult;
use crate::run_context::RunContext;

const DEFAULT_STORE_PATH: &str = "./data/artifacts";
const ARTIFACT_STORE_PATH_ENV: &str = "ADCOMPETE_ARTIFACT_STORE_PATH";

static DEFAULT_PATH: Lazy<PathBuf> = Lazy::new(|| PathBuf::from(DEFAULT_STORE_PATH));

/// # NDOC
/// component: `artifact_store`
/// purpose: Whole-table-replace artifact persistence keyed by `<kind>_<run_id>`.
/// invariants:
///   - A write is atomic: either the full artifact lands, or nothing changes.
///     No stage may observe a half-written artifact.
///   - Artifact file names exactly match the bit-exact naming contract.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(namespace: &str) -> Self {
        let base = std::env::var(ARTIFACT_STORE_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| DEFAULT_PATH.clone());
        Self { root: base.join(namespace) }
    }

    pub fn for_run(ctx: &RunContext) -> Self {
        Self::new(&ctx.namespace)
    }

    fn path_for(&self, kind: &str, run_id: &str) -> PathBuf {
        self.root.join(format!("{}_{}.json", kind, run_id))
    }

    /// Writes `value` as the artifact `<kind>_<run_id>`, replacing whatever
    /// was there before. Uses a temp file in the same directory plus an
    /// atomic rename so a crash mid-write never leaves a partial artifact.
    pub fn write<T: Serialize>(&self, kind: &str, run_id: &str, value: &T) -> PipelineResult<()> {
        fs::create_dir_all(&self.root)?;
        let final_path = self.path_for(kind, run_id);
        let tmp_path = self.root.join(format!(".{}_{}.tmp", kind, run_id));
        let body = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp_path, body)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    pub fn exists(&self, kind: &str, run_id: &str) -> bool {
        self.path_for(kind, run_id).is_file()
    }

    /// Reads and deserializes an artifact; returns `Ok(None)` if absent
    /// rather than an error, since "missing artifact" is a normal resume
    /// condition, not a schema drift.
    pub fn read<T: DeserializeOwned>(&self, kind: &str, run_id: &str) -> PipelineResult<Option<T>> {
        let path = self.path_for(kind, run_id);
        if !path.is_file() {
            return Ok(None);
        }
        let body = fs::read(&path)?;
        let value = serde_json::from_slice(&body)?;
        Ok(Some(value))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    fn temp_store() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(ARTIFACT_STORE_PATH_ENV, dir.path());
        (ArtifactStore::new("ns_test"), dir)
    }

    #[test]
    fn round_trips_a_written_artifact() {
        let (store, _dir) = temp_store();
        store.write("competitors_raw", "run1", &Sample { value: 7 }).unwrap();
        let back: Option<Sample> = store.read("competitors_raw", "run1").unwrap();
        assert_eq!(back, Some(Sample { value: 7 }));
    }

    #[test]
    fn missing_artifact_reads_as_none() {
        let (store, _dir) = temp_store();
        let back: Option<Sample> = store.read("competitors_raw", "missing").unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn write_replaces_whole_artifact() {
        let (store, _dir) = temp_store();
        store.write("ads_raw", "run1", &Sample { value: 1 }).unwrap();
        store.write("ads_raw", "run1", &Sample { value: 2 }).unwrap();
        let back: Option<Sample> = store.read("ads_raw", "run1").unwrap();
        assert_eq!(back, Some(Sample { value: 2 }));
    }

    #[test]
    fn exists_reflects_presence() {
        let (store, _dir) = temp_store();
        assert!(!store.exists("signals", "run1"));
        store.write("signals", "run1", &Sample { value: 0 }).unwrap();
        assert!(store.exists("signals", "run1"));
    }
}
