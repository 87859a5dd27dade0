use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::classifier::{Classifier, FeatureExtractor};
use crate::identity::UserId;

const MODEL_FILE: &str = "model.json";
const GLOBAL_DIR: &str = "global";
const USERS_DIR: &str = "users";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No personalized artifact for user {0}")]
    NotFound(String),
    #[error("Artifact checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("Malformed artifact: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Artifact payload rejected: {0}")]
    InvalidArtifact(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// True for the expected steady-state miss, as opposed to a present but
    /// unreadable artifact.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// On-disk artifact envelope: the payload bytes are checksummed so a
/// truncated or bit-rotted file is detected before anything is deserialized
/// into a live model.
#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    payload: Box<RawValue>,
}

#[derive(Serialize, Deserialize)]
struct ArtifactPayload {
    dimensions: usize,
    trained_at: DateTime<Utc>,
    categories: Vec<CategoryPayload>,
}

#[derive(Serialize, Deserialize)]
struct CategoryPayload {
    id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    examples: usize,
    prototype: Vec<f32>,
}

/// Durable home of every artifact: one global model plus zero-or-more
/// per-user personalized models, laid out as
///
/// ```text
/// <data_dir>/global/model.json
/// <data_dir>/users/<user_id>/model.json
/// ```
///
/// The store owns the durable copies; loaded [`Classifier`] handles are
/// process-local snapshots. Publishing goes through a temp file in the
/// destination directory followed by an atomic rename, so a concurrent load
/// sees either the complete old artifact or the complete new one.
#[derive(Clone)]
pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at the default data directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::default_data_dir())
    }

    /// Returns the default data directory path
    pub fn default_data_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("LEDGERCAT_DATA") {
            return PathBuf::from(path);
        }

        // 2. Use platform-specific data directory
        if let Some(data_dir) = dirs::data_dir() {
            return data_dir.join("ledgercat");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".ledgercat");
        }

        // 4. If all else fails, use system temp directory (platform agnostic)
        env::temp_dir().join("ledgercat")
    }

    pub fn new<P: AsRef<Path>>(data_dir: P) -> io::Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn global_model_path(&self) -> PathBuf {
        self.data_dir.join(GLOBAL_DIR).join(MODEL_FILE)
    }

    pub fn user_model_path(&self, user_id: &UserId) -> PathBuf {
        self.data_dir
            .join(USERS_DIR)
            .join(user_id.as_str())
            .join(MODEL_FILE)
    }

    /// Whether a personalized artifact has ever been published for this user.
    pub fn exists(&self, user_id: &UserId) -> bool {
        self.user_model_path(user_id).exists()
    }

    /// Loads a user's personalized artifact.
    ///
    /// `NotFound` is the common steady-state answer for users who never
    /// corrected anything; every other error means an artifact is present
    /// but unusable.
    pub fn load(&self, user_id: &UserId) -> Result<Classifier, StoreError> {
        let path = self.user_model_path(user_id);
        if !path.exists() {
            return Err(StoreError::NotFound(user_id.to_string()));
        }
        debug!("Loading personalized artifact for {} from {:?}", user_id, path);
        self.read_envelope(&path)
    }

    /// Loads the shared global artifact. Failure here at startup is fatal:
    /// without a global model there is no fallback left to serve.
    pub fn load_global(&self) -> Result<Classifier, StoreError> {
        let path = self.global_model_path();
        debug!("Loading global artifact from {:?}", path);
        self.read_envelope(&path)
    }

    /// Atomically publishes a user's personalized artifact.
    pub fn publish_atomic(
        &self,
        user_id: &UserId,
        classifier: &Classifier,
    ) -> Result<(), StoreError> {
        let path = self.user_model_path(user_id);
        self.write_envelope(&path, classifier)?;
        info!(
            "Published personalized artifact for {} ({} categories)",
            user_id,
            classifier.info().num_categories
        );
        Ok(())
    }

    /// Atomically publishes the global artifact.
    pub fn publish_global(&self, classifier: &Classifier) -> Result<(), StoreError> {
        let path = self.global_model_path();
        self.write_envelope(&path, classifier)?;
        info!(
            "Published global artifact ({} categories)",
            classifier.info().num_categories
        );
        Ok(())
    }

    fn read_envelope(&self, path: &Path) -> Result<Classifier, StoreError> {
        let bytes = fs::read(path)?;
        let envelope: Envelope = serde_json::from_slice(&bytes)?;

        let actual = sha256_hex(envelope.payload.get().as_bytes());
        if actual != envelope.checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: envelope.checksum,
                actual,
            });
        }

        let payload: ArtifactPayload = serde_json::from_str(envelope.payload.get())?;
        if payload.categories.is_empty() {
            return Err(StoreError::InvalidArtifact(
                "artifact has no categories".to_string(),
            ));
        }

        let mut prototypes = HashMap::new();
        let mut labels = HashMap::new();
        let mut example_counts = HashMap::new();
        for category in payload.categories {
            if category.prototype.len() != payload.dimensions {
                return Err(StoreError::InvalidArtifact(format!(
                    "category {} prototype has {} dimensions, artifact declares {}",
                    category.id,
                    category.prototype.len(),
                    payload.dimensions
                )));
            }
            if let Some(label) = category.label {
                labels.insert(category.id, label);
            }
            example_counts.insert(category.id, category.examples);
            prototypes.insert(category.id, Array1::from_vec(category.prototype));
        }

        Ok(Classifier {
            extractor: FeatureExtractor::new(payload.dimensions),
            prototypes: Arc::new(prototypes),
            labels: Arc::new(labels),
            example_counts: Arc::new(example_counts),
            trained_at: payload.trained_at,
        })
    }

    fn write_envelope(&self, path: &Path, classifier: &Classifier) -> Result<(), StoreError> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidArtifact(format!("bad artifact path {:?}", path)))?;
        fs::create_dir_all(parent)?;

        // Categories sorted by id so the payload bytes, and therefore the
        // checksum, are deterministic for a given model.
        let mut ids: Vec<u32> = classifier.prototypes.keys().copied().collect();
        ids.sort_unstable();
        let categories = ids
            .into_iter()
            .map(|id| CategoryPayload {
                id,
                label: classifier.labels.get(&id).cloned(),
                examples: classifier.example_counts.get(&id).copied().unwrap_or(0),
                prototype: classifier.prototypes[&id].to_vec(),
            })
            .collect();
        let payload = ArtifactPayload {
            dimensions: classifier.extractor.dimensions(),
            trained_at: classifier.trained_at(),
            categories,
        };

        let payload_json = serde_json::to_string(&payload)?;
        let envelope = Envelope {
            checksum: sha256_hex(payload_json.as_bytes()),
            payload: RawValue::from_string(payload_json)?,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        // Temp file in the destination directory, then rename into place:
        // a concurrent reader never observes a partially written artifact.
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CategoryExamples;

    fn sample_classifier() -> Classifier {
        Classifier::builder()
            .with_dimensions(128)
            .add_category(
                CategoryExamples::new(5)
                    .with_label("Cafe")
                    .with_examples(vec!["Starbucks", "Aroma Kava"]),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn publish_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let user = UserId::new("u1").unwrap();

        assert!(!store.exists(&user));
        store.publish_atomic(&user, &sample_classifier()).unwrap();
        assert!(store.exists(&user));

        let loaded = store.load(&user).unwrap();
        let info = loaded.info();
        assert_eq!(info.dimensions, 128);
        assert_eq!(info.category_ids, vec![5]);
        assert_eq!(loaded.label(5), Some("Cafe"));
        let (category, _) = loaded.predict("Starbucks latte").unwrap();
        assert_eq!(category, Some(5));
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let user = UserId::new("nobody").unwrap();

        let err = store.load(&user).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn garbage_artifact_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let user = UserId::new("u2").unwrap();

        let path = store.user_model_path(&user);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not json at all").unwrap();

        let err = store.load(&user).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn truncated_artifact_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let user = UserId::new("u3").unwrap();

        store.publish_atomic(&user, &sample_classifier()).unwrap();
        let path = store.user_model_path(&user);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(store.load(&user).is_err());
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let user = UserId::new("u4").unwrap();

        store.publish_atomic(&user, &sample_classifier()).unwrap();
        let path = store.user_model_path(&user);
        let text = fs::read_to_string(&path).unwrap();
        // Flip the declared dimension inside the checksummed payload.
        let tampered = text.replace("\"dimensions\":128", "\"dimensions\":129");
        assert_ne!(text, tampered);
        fs::write(&path, tampered).unwrap();

        let err = store.load(&user).unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn global_publish_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        assert!(store.load_global().is_err());
        store.publish_global(&sample_classifier()).unwrap();
        let global = store.load_global().unwrap();
        assert_eq!(global.info().category_ids, vec![5]);
    }

    #[test]
    fn republish_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let user = UserId::new("u5").unwrap();

        store.publish_atomic(&user, &sample_classifier()).unwrap();

        let replacement = Classifier::builder()
            .with_dimensions(128)
            .add_category(CategoryExamples::new(9).with_examples(vec!["Uklon ride"]))
            .unwrap()
            .build()
            .unwrap();
        store.publish_atomic(&user, &replacement).unwrap();

        let loaded = store.load(&user).unwrap();
        assert_eq!(loaded.info().category_ids, vec![9]);
    }

    #[test]
    fn default_data_dir_is_absolute() {
        assert!(ArtifactStore::default_data_dir().is_absolute());
    }
}
