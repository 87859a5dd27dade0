use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

mod error;
mod features;
mod model;
pub mod builder;

pub use builder::{CategoryExamples, ClassifierBuilder, DEFAULT_DIMENSIONS};
pub use error::ClassifierError;
pub use features::FeatureExtractor;
pub use model::Classifier;

/// Information about the current state and configuration of a classifier
#[derive(Debug, Clone)]
pub struct ClassifierInfo {
    /// Feature vector dimension the artifact was trained with
    pub dimensions: usize,
    /// Number of categories the classifier is trained on
    pub num_categories: usize,
    /// Category ids, ascending
    pub category_ids: Vec<u32>,
    /// Human-readable labels for categories that have one
    pub labels: Arc<HashMap<u32, String>>,
    /// When the artifact was trained
    pub trained_at: DateTime<Utc>,
}
