use std::path::PathBuf;
use std::time::Duration;

use crate::classifier::DEFAULT_DIMENSIONS;
use crate::store::ArtifactStore;

/// Tunables for a running categorizer service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory holding artifacts and correction logs
    pub data_dir: PathBuf,
    /// Maximum number of personalized artifacts held in memory
    pub cache_capacity: u64,
    /// Feature vector dimension for newly trained artifacts
    pub dimensions: usize,
    /// A retrain is triggered after every this many durable corrections
    pub retrain_threshold: usize,
    /// A retrain below this many corrections is a no-op
    pub min_training_samples: usize,
    /// Budget for one classification request, artifact load included
    pub classify_timeout: Duration,
    /// Budget for one background retrain before it is abandoned
    pub retrain_timeout: Duration,
    /// Number of background retrain workers
    pub retrain_workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: ArtifactStore::default_data_dir(),
            cache_capacity: 128,
            dimensions: DEFAULT_DIMENSIONS,
            retrain_threshold: 5,
            min_training_samples: 3,
            classify_timeout: Duration::from_secs(5),
            retrain_timeout: Duration::from_secs(300),
            retrain_workers: 2,
        }
    }
}

impl ServiceConfig {
    /// A config rooted at the given data dir, defaults everywhere else.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}
