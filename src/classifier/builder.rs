use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use ndarray::Array1;

use super::error::ClassifierError;
use super::features::{average_vectors, normalize_vector, FeatureExtractor};
use super::model::Classifier;

/// Default feature vector dimension when the builder is not told otherwise.
pub const DEFAULT_DIMENSIONS: usize = 512;

const MAX_CATEGORIES: usize = 256;

/// Labeled training examples for one category.
///
/// # Example
/// ```
/// use ledgercat::CategoryExamples;
///
/// let category = CategoryExamples::new(5)
///     .with_label("Cafe")
///     .with_examples(vec!["Starbucks", "Aroma Kava"]);
/// ```
#[derive(Debug, Clone)]
pub struct CategoryExamples {
    /// The numeric category identifier this category trains toward
    pub id: u32,
    /// Optional human-readable label, carried through to the artifact
    pub label: Option<String>,
    /// Description texts known to belong to this category
    pub examples: Vec<String>,
}

impl CategoryExamples {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            label: None,
            examples: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_examples(mut self, examples: Vec<impl Into<String>>) -> Self {
        self.examples = examples.into_iter().map(Into::into).collect();
        self
    }
}

/// A builder for constructing a Classifier with a fluent interface.
#[derive(Debug, Default)]
pub struct ClassifierBuilder {
    dimensions: Option<usize>,
    category_examples: HashMap<u32, Vec<String>>,
    labels: HashMap<u32, String>,
}

impl ClassifierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the feature vector dimension. Artifacts with different dimensions
    /// are not interchangeable, so pick one per deployment and keep it.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Validates category data according to the following rules:
    /// - Must have at least one example
    /// - No example text can be entirely empty
    /// - Category count must stay under the cap
    fn validate_category(
        &self,
        category: &CategoryExamples,
    ) -> Result<(), ClassifierError> {
        if self.category_examples.contains_key(&category.id) {
            return Err(ClassifierError::ValidationError(format!(
                "Category {} was already added",
                category.id
            )));
        }
        if self.category_examples.len() >= MAX_CATEGORIES {
            return Err(ClassifierError::ValidationError(format!(
                "Maximum number of categories ({}) exceeded",
                MAX_CATEGORIES
            )));
        }
        if category.examples.is_empty() {
            return Err(ClassifierError::ValidationError(format!(
                "Category {} must have at least one example",
                category.id
            )));
        }
        if let Some(pos) = category.examples.iter().position(|e| e.trim().is_empty()) {
            return Err(ClassifierError::ValidationError(format!(
                "Example {} of category {} is empty",
                pos + 1,
                category.id
            )));
        }
        Ok(())
    }

    /// Adds a category with its training examples.
    ///
    /// # Returns
    /// * `Result<Self, ClassifierError>` - The builder instance if successful,
    ///   or a `ValidationError` if the category id is a duplicate, has no
    ///   examples, an example is empty, or the category cap is exceeded.
    pub fn add_category(mut self, category: CategoryExamples) -> Result<Self, ClassifierError> {
        self.validate_category(&category)?;

        if let Some(label) = &category.label {
            self.labels.insert(category.id, label.clone());
        }
        self.category_examples.insert(category.id, category.examples);
        Ok(self)
    }

    /// Builds and returns the final Classifier instance.
    ///
    /// Each category's prototype is the normalized average of its example
    /// vectors. Examples that featurize to nothing (punctuation-only text)
    /// are dropped with a warning; a category whose examples all drop out
    /// fails the build.
    pub fn build(self) -> Result<Classifier, ClassifierError> {
        if self.category_examples.is_empty() {
            return Err(ClassifierError::BuildError(
                "At least one category must be added".to_string(),
            ));
        }

        let dimensions = self.dimensions.unwrap_or(DEFAULT_DIMENSIONS);
        let extractor = FeatureExtractor::new(dimensions);

        let mut prototypes = HashMap::new();
        let mut example_counts = HashMap::new();

        for (id, examples) in &self.category_examples {
            debug!("Building prototype for category {}", id);

            let vectors: Vec<Array1<f32>> = examples
                .iter()
                .filter_map(|text| {
                    let v = extractor.vector(text);
                    if v.iter().all(|&x| x == 0.0) {
                        warn!(
                            "Dropping featureless example for category {}: {:?}",
                            id, text
                        );
                        None
                    } else {
                        Some(v)
                    }
                })
                .collect();

            if vectors.is_empty() {
                return Err(ClassifierError::BuildError(format!(
                    "No usable examples for category {}",
                    id
                )));
            }

            let prototype = normalize_vector(&average_vectors(&vectors, dimensions));
            example_counts.insert(*id, vectors.len());
            prototypes.insert(*id, prototype);
        }

        Ok(Classifier {
            extractor,
            prototypes: Arc::new(prototypes),
            labels: Arc::new(self.labels),
            example_counts: Arc::new(example_counts),
            trained_at: Utc::now(),
        })
    }
}
