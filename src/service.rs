use std::sync::Arc;

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::task;
use tokio::time::timeout;

use crate::cache::ModelCache;
use crate::config::ServiceConfig;
use crate::corrections::{CorrectionLog, CorrectionRecord};
use crate::error::ServeError;
use crate::identity::UserId;
use crate::recorder::CorrectionRecorder;
use crate::resolver::Resolver;
use crate::retrainer::{RetrainOutcome, Retrainer, RetrainerHandle};
use crate::store::{ArtifactStore, StoreError};

/// A classification request as the transport layer hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub user_id: String,
    pub description: String,
}

/// The resolved prediction. `category_id` is `None` when the serving
/// artifact maps the description to "unknown".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub description: String,
    pub category_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub user_id: String,
    pub description: String,
    pub original_category_id: Option<u32>,
    pub corrected_category_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub accepted: bool,
    pub retrain_triggered: bool,
}

/// The assembled categorization service: resolver, cache, correction
/// recorder, and background retrain workers over one data directory.
///
/// Construction refuses to serve without a loadable global artifact; there
/// is no further fallback behind it. Must be opened inside a tokio runtime,
/// which the retrain workers are spawned onto.
pub struct Categorizer {
    config: ServiceConfig,
    store: Arc<ArtifactStore>,
    resolver: Arc<Resolver>,
    recorder: Arc<CorrectionRecorder>,
    retrainer: Retrainer,
    retrain_handle: RetrainerHandle,
}

impl Categorizer {
    pub fn open(config: ServiceConfig) -> Result<Self, ServeError> {
        let store = Arc::new(
            ArtifactStore::new(&config.data_dir)
                .map_err(|e| ServeError::Startup(StoreError::Io(e)))?,
        );
        let global = Arc::new(store.load_global().map_err(ServeError::Startup)?);
        info!(
            "Global artifact loaded ({} categories, trained {})",
            global.info().num_categories,
            global.trained_at()
        );

        let cache = ModelCache::new(config.cache_capacity);
        let log = Arc::new(
            CorrectionLog::new(&config.data_dir)
                .map_err(|e| ServeError::Startup(StoreError::Io(e)))?,
        );

        let retrainer = Retrainer::new(Arc::clone(&store), Arc::clone(&log), cache.clone(), &config);
        let retrain_handle = retrainer.spawn(config.retrain_workers, config.retrain_timeout);

        let resolver = Arc::new(Resolver::new(Arc::clone(&store), cache, global));
        let recorder = Arc::new(CorrectionRecorder::new(
            log,
            retrain_handle.clone(),
            config.retrain_threshold,
            config.min_training_samples,
        ));

        Ok(Self {
            config,
            store,
            resolver,
            recorder,
            retrainer,
            retrain_handle,
        })
    }

    /// Classifies one description for one user.
    ///
    /// Resolution and the artifact load behind it run off the async
    /// executor; a request that cannot resolve within the configured budget
    /// fails with `Timeout` instead of hanging.
    pub async fn classify(&self, request: ClassifyRequest) -> Result<ClassifyResult, ServeError> {
        let user_id = UserId::new(&request.user_id)?;
        let resolver = Arc::clone(&self.resolver);
        let description = request.description;

        let work = task::spawn_blocking({
            let description = description.clone();
            move || resolver.resolve(&user_id, &description)
        });

        let resolution = match timeout(self.config.classify_timeout, work).await {
            Err(_) => return Err(ServeError::Timeout(self.config.classify_timeout)),
            Ok(Err(e)) => {
                return Err(ServeError::Internal(format!(
                    "classification task died: {}",
                    e
                )))
            }
            Ok(Ok(result)) => result?,
        };

        Ok(ClassifyResult {
            description,
            category_id: resolution.category_id,
        })
    }

    /// Records a correction. The append is durable before this returns;
    /// retraining, if triggered, happens in the background.
    pub async fn submit_correction(
        &self,
        request: CorrectionRequest,
    ) -> Result<CorrectionResult, ServeError> {
        let user_id = UserId::new(&request.user_id)?;
        let record = CorrectionRecord {
            user_id: request.user_id,
            description: request.description,
            original_category_id: request.original_category_id,
            corrected_category_id: request.corrected_category_id,
            timestamp: Utc::now(),
        };

        let recorder = Arc::clone(&self.recorder);
        let retrain_triggered = task::spawn_blocking(move || recorder.record(&user_id, record))
            .await
            .map_err(|e| ServeError::Internal(format!("correction task died: {}", e)))??;

        Ok(CorrectionResult {
            accepted: true,
            retrain_triggered,
        })
    }

    /// Requests a background retrain regardless of the trigger policy.
    /// Returns whether a new task was enqueued (false when one is already
    /// in flight).
    pub fn trigger_retrain(&self, user_id: &str) -> Result<bool, ServeError> {
        let user_id = UserId::new(user_id)?;
        Ok(self.retrain_handle.request(user_id))
    }

    /// Runs a retrain to completion on the calling thread. Blocking; meant
    /// for the ops binary and tests, not the request path.
    pub fn retrain_now(&self, user_id: &str) -> Result<RetrainOutcome, ServeError> {
        let user_id = UserId::new(user_id)?;
        self.retrainer.retrain(&user_id)
    }

    pub fn cache(&self) -> &ModelCache {
        self.resolver.cache()
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{CategoryExamples, Classifier};

    fn publish_global(dir: &std::path::Path) {
        let store = ArtifactStore::new(dir).unwrap();
        let global = Classifier::builder()
            .with_dimensions(256)
            .add_category(CategoryExamples::new(0).with_examples(vec!["misc payment"]))
            .unwrap()
            .build()
            .unwrap();
        store.publish_global(&global).unwrap();
    }

    #[tokio::test]
    async fn open_fails_without_global_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let result = Categorizer::open(ServiceConfig::with_data_dir(dir.path()));
        assert!(matches!(result, Err(ServeError::Startup(_))));
    }

    #[tokio::test]
    async fn classify_rejects_invalid_user_id() {
        let dir = tempfile::tempdir().unwrap();
        publish_global(dir.path());
        let service = Categorizer::open(ServiceConfig::with_data_dir(dir.path())).unwrap();

        let result = service
            .classify(ClassifyRequest {
                user_id: "../escape".to_string(),
                description: "coffee".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ServeError::Validation(_))));
    }

    #[tokio::test]
    async fn correction_rejects_invalid_user_id() {
        let dir = tempfile::tempdir().unwrap();
        publish_global(dir.path());
        let service = Categorizer::open(ServiceConfig::with_data_dir(dir.path())).unwrap();

        let result = service
            .submit_correction(CorrectionRequest {
                user_id: String::new(),
                description: "coffee".to_string(),
                original_category_id: None,
                corrected_category_id: 5,
            })
            .await;
        assert!(matches!(result, Err(ServeError::Validation(_))));
    }
}
