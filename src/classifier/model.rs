use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::Array1;

use super::error::ClassifierError;
use super::features::FeatureExtractor;

/// A trained, immutable categorizer mapping description text to a category id.
///
/// One normalized prototype vector per category; prediction is a cosine
/// similarity argmax over the prototypes. A description with no usable
/// features, or one that matches no prototype at all, predicts `None`
/// ("unknown").
///
/// # Thread Safety
///
/// A classifier is read-only after construction and `Send + Sync`: prototypes
/// are behind `Arc`, so cloning a handle is cheap and concurrent `predict`
/// calls need no locking.
///
/// ```rust
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use ledgercat::{CategoryExamples, Classifier};
///
/// let classifier = Classifier::builder()
///     .with_dimensions(256)
///     .add_category(
///         CategoryExamples::new(5)
///             .with_label("Cafe")
///             .with_examples(vec!["Starbucks", "Aroma Kava"]),
///     )?
///     .build()?;
///
/// let (category_id, _scores) = classifier.predict("Starbucks latte")?;
/// assert_eq!(category_id, Some(5));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Classifier {
    pub(crate) extractor: FeatureExtractor,
    pub(crate) prototypes: Arc<HashMap<u32, Array1<f32>>>,
    pub(crate) labels: Arc<HashMap<u32, String>>,
    pub(crate) example_counts: Arc<HashMap<u32, usize>>,
    pub(crate) trained_at: DateTime<Utc>,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<Classifier>();
    }
};

impl Classifier {
    /// Creates a new ClassifierBuilder for fluent construction
    pub fn builder() -> super::builder::ClassifierBuilder {
        super::builder::ClassifierBuilder::new()
    }

    /// Fits a classifier directly from labeled `(description, category_id)`
    /// samples, grouping the samples per category. This is the path the
    /// retrainer takes over a user's correction history.
    pub fn fit<S: AsRef<str>>(
        dimensions: usize,
        samples: &[(S, u32)],
    ) -> Result<Self, ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::BuildError(
                "Cannot fit a classifier from an empty sample set".to_string(),
            ));
        }

        let mut grouped: HashMap<u32, Vec<String>> = HashMap::new();
        for (text, category_id) in samples {
            grouped
                .entry(*category_id)
                .or_default()
                .push(text.as_ref().to_string());
        }

        let mut builder = Self::builder().with_dimensions(dimensions);
        let mut ids: Vec<u32> = grouped.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let examples = grouped.remove(&id).unwrap_or_default();
            builder = builder
                .add_category(super::builder::CategoryExamples::new(id).with_examples(examples))?;
        }
        builder.build()
    }

    /// Returns information about the classifier's current state
    pub fn info(&self) -> super::ClassifierInfo {
        super::ClassifierInfo {
            dimensions: self.extractor.dimensions(),
            num_categories: self.prototypes.len(),
            category_ids: {
                let mut ids: Vec<u32> = self.prototypes.keys().copied().collect();
                ids.sort_unstable();
                ids
            },
            labels: Arc::clone(&self.labels),
            trained_at: self.trained_at,
        }
    }

    /// Predicts the category of the input text and returns per-category scores.
    ///
    /// # Returns
    /// A tuple containing:
    /// * The predicted category id, or `None` when the text carries no signal
    /// * A map of category ids to cosine similarity scores
    pub fn predict(
        &self,
        text: &str,
    ) -> Result<(Option<u32>, HashMap<u32, f32>), ClassifierError> {
        if self.prototypes.is_empty() {
            return Err(ClassifierError::PredictionError(
                "Classifier has no trained categories".to_string(),
            ));
        }

        let input_vector = self.extractor.vector(text);

        let mut scores = HashMap::new();
        for (&id, prototype) in self.prototypes.as_ref() {
            if prototype.len() != input_vector.len() {
                return Err(ClassifierError::PredictionError(format!(
                    "Prototype for category {} has {} dimensions, expected {}",
                    id,
                    prototype.len(),
                    input_vector.len()
                )));
            }
            scores.insert(id, input_vector.dot(prototype));
        }

        let best = scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .filter(|(_, &score)| score > 0.0)
            .map(|(&id, _)| id);

        Ok((best, scores))
    }

    /// Human-readable label for a category, when the training data carried one.
    pub fn label(&self, category_id: u32) -> Option<&str> {
        self.labels.get(&category_id).map(String::as_str)
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }
}
