use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use vanity_core::{canonical_secret, GrindPattern, KeypairRecord};
use vanity_storage::{KeyStore, StorageError};

use crate::worker::SearchWorker;

/// Result of pushing one artifact through derive, encode, and insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Inserted { public_key: String },
    /// The key was already stored; the existing row is untouched.
    Duplicate { public_key: String },
    DerivationFailed { reason: String },
    EncodingFailed { public_key: String, reason: String },
    StorageFailed { public_key: String, reason: String },
}

impl ProcessOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Inserted { .. } | Self::Duplicate { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inserted { .. } => "inserted",
            Self::Duplicate { .. } => "duplicate",
            Self::DerivationFailed { .. } => "derivation_failed",
            Self::EncodingFailed { .. } => "encoding_failed",
            Self::StorageFailed { .. } => "storage_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    pub artifact: PathBuf,
    pub outcome: ProcessOutcome,
}

/// Owns the process-wide store handle. The connection is opened on the
/// first insert and kept for the life of the gate; a failed open is tried
/// again on the next insert.
pub struct PersistenceGate {
    descriptor: String,
    store: Option<KeyStore>,
}

impl PersistenceGate {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            store: None,
        }
    }

    pub fn with_store(store: KeyStore) -> Self {
        Self {
            descriptor: String::new(),
            store: Some(store),
        }
    }

    pub fn store(&self) -> Option<&KeyStore> {
        self.store.as_ref()
    }

    fn connection(&mut self) -> Result<&KeyStore, StorageError> {
        if self.store.is_none() {
            let store = KeyStore::connect(&self.descriptor)?;
            info!(event = "store_connected");
            self.store = Some(store);
        }
        self.store.as_ref().ok_or(StorageError::MissingDescriptor)
    }

    /// `Ok(true)` when a new row was written, `Ok(false)` for a benign
    /// duplicate.
    pub fn insert(&mut self, record: &KeypairRecord) -> Result<bool, StorageError> {
        self.connection()?.insert_keypair(record)
    }
}

pub struct ArtifactProcessor<'a, W: SearchWorker> {
    worker: &'a W,
    pattern: &'a GrindPattern,
    ignore_case: bool,
}

impl<'a, W: SearchWorker> ArtifactProcessor<'a, W> {
    pub fn new(worker: &'a W, pattern: &'a GrindPattern, ignore_case: bool) -> Self {
        Self {
            worker,
            pattern,
            ignore_case,
        }
    }

    /// Processes every artifact independently; a failure never stops the
    /// remaining artifacts from being attempted.
    pub fn process_all(
        &self,
        gate: &mut PersistenceGate,
        artifacts: &[PathBuf],
        log_path: &Path,
    ) -> Vec<ArtifactReport> {
        artifacts
            .iter()
            .map(|artifact| ArtifactReport {
                artifact: artifact.clone(),
                outcome: self.process(gate, artifact, log_path),
            })
            .collect()
    }

    pub fn process(
        &self,
        gate: &mut PersistenceGate,
        artifact: &Path,
        log_path: &Path,
    ) -> ProcessOutcome {
        let public_key = match self.worker.derive_public_key(artifact) {
            Ok(public_key) => public_key,
            Err(err) => {
                warn!(
                    event = "derivation_failed",
                    artifact = %artifact.display(),
                    error = %err
                );
                return ProcessOutcome::DerivationFailed {
                    reason: err.to_string(),
                };
            }
        };

        if !self.pattern.matches(&public_key, self.ignore_case) {
            warn!(
                event = "pattern_mismatch",
                public_key = %public_key,
                pattern = %self.pattern,
                "worker artifact does not end with the configured suffix"
            );
        }

        let record = match encode_artifact(artifact, &public_key) {
            Ok(record) => record,
            Err(reason) => {
                warn!(
                    event = "encoding_failed",
                    artifact = %artifact.display(),
                    public_key = %public_key,
                    error = %reason
                );
                return ProcessOutcome::EncodingFailed { public_key, reason };
            }
        };

        match gate.insert(&record) {
            Ok(true) => {
                info!(event = "keypair_inserted", public_key = %public_key);
                ProcessOutcome::Inserted { public_key }
            }
            Ok(false) => {
                info!(
                    event = "keypair_duplicate",
                    public_key = %public_key,
                    "already stored, existing row kept"
                );
                ProcessOutcome::Duplicate { public_key }
            }
            Err(err) => {
                error!(
                    event = "storage_failed",
                    public_key = %public_key,
                    artifact = %artifact.display(),
                    log = %log_path.display(),
                    error = %err,
                    "insert failed, recover manually from the artifact"
                );
                ProcessOutcome::StorageFailed {
                    public_key,
                    reason: err.to_string(),
                }
            }
        }
    }
}

fn encode_artifact(artifact: &Path, public_key: &str) -> Result<KeypairRecord, String> {
    let text = fs::read_to_string(artifact).map_err(|err| format!("read failed: {err}"))?;
    let encoded = canonical_secret(&text).map_err(|err| err.to_string())?;
    KeypairRecord::from_canonical_hex(public_key, &encoded).map_err(|err| err.to_string())
}
