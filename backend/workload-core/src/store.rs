// src/store.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

use crate::error::{io_context, PipelineError};
use crate::pipeline::PipelineResult;

pub const DEFAULT_ARTIFACT_FILE: &str = "fact_table.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<String>,
    pub fact_rows: usize,
}

/// A persisted pipeline result together with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub metadata: ArtifactMetadata,
    pub result: PipelineResult,
}

/// Persists the last pipeline result for consumers in other processes.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(DEFAULT_ARTIFACT_FILE)
    }

    /// Writes the result to a temp file and renames it into place, so readers
    /// never see a partially written artifact.
    pub fn save(&self, result: &PipelineResult) -> Result<ArtifactMetadata, PipelineError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            io_context(e, format!("Failed to create artifact directory: {:?}", self.dir))
        })?;

        let metadata = ArtifactMetadata {
            generated_at: Utc::now(),
            sources: result
                .report
                .sources
                .iter()
                .map(|s| s.source_name.clone())
                .collect(),
            fact_rows: result.facts.len(),
        };
        let artifact = StoredArtifact {
            metadata: metadata.clone(),
            result: result.clone(),
        };
        let json_string = serde_json::to_string_pretty(&artifact)?;

        let path = self.path();
        let tmp_path = path.with_extension("json.tmp");
        write_file(&tmp_path, json_string.as_bytes())?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            io_context(e, format!("Failed to move artifact into place: {:?}", path))
        })?;

        info!(
            "Saved artifact with {} fact rows to {:?}",
            metadata.fact_rows, path
        );
        Ok(metadata)
    }

    /// Loads the stored artifact. A missing or corrupt file yields `None`;
    /// a corrupt file is removed.
    pub fn load(&self) -> Result<Option<StoredArtifact>, PipelineError> {
        let path = self.path();
        if !path.exists() {
            debug!("No artifact found at {:?}", path);
            return Ok(None);
        }

        let json_string = fs::read_to_string(&path)
            .map_err(|e| io_context(e, format!("Failed to read artifact file: {:?}", path)))?;

        match serde_json::from_str::<StoredArtifact>(&json_string) {
            Ok(artifact) => {
                debug!("Loaded artifact generated at {}", artifact.metadata.generated_at);
                Ok(Some(artifact))
            }
            Err(e) => {
                warn!(
                    "Failed to deserialize artifact {:?}: {}. Removing corrupt artifact.",
                    path, e
                );
                if let Err(remove_err) = fs::remove_file(&path) {
                    error!("Failed to remove corrupt artifact {:?}: {}", path, remove_err);
                }
                Ok(None)
            }
        }
    }
}

/// Writes `bytes` to `path`, replacing any existing file.
pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let mut file = File::create(path)
        .map_err(|e| io_context(e, format!("Failed to create file: {:?}", path)))?;
    file.write_all(bytes)
        .map_err(|e| io_context(e, format!("Failed to write file: {:?}", path)))?;
    file.sync_all()
        .map_err(|e| io_context(e, format!("Failed to flush file: {:?}", path)))?;
    Ok(())
}
