//! Adaptive transaction categorization: a shared global model answers
//! everyone, per-user personalized models trained from submitted corrections
//! take over as users teach the system.
//!
//! # Basic Usage
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use ledgercat::{CategoryExamples, Classifier};
//!
//! let classifier = Classifier::builder()
//!     .with_dimensions(256)
//!     .add_category(
//!         CategoryExamples::new(3)
//!             .with_label("Mobile")
//!             .with_examples(vec!["Kyivstar", "Vodafone topup"]),
//!     )?
//!     .add_category(
//!         CategoryExamples::new(5)
//!             .with_label("Cafe")
//!             .with_examples(vec!["Starbucks", "Aroma Kava"]),
//!     )?
//!     .build()?;
//!
//! let (category_id, _scores) = classifier.predict("Kyivstar monthly topup")?;
//! assert_eq!(category_id, Some(3));
//! # Ok(())
//! # }
//! ```
//!
//! # Serving
//!
//! The [`Categorizer`] service wires the pieces together: a [`Resolver`]
//! picks the artifact for each request (cached personalized model, freshly
//! loaded one, or the global fallback), a [`CorrectionRecorder`] appends
//! corrections durably, and background workers retrain and atomically
//! republish personalized artifacts.
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use ledgercat::{Categorizer, ClassifyRequest, ServiceConfig};
//!
//! let service = Categorizer::open(ServiceConfig::default())?;
//! let result = service
//!     .classify(ClassifyRequest {
//!         user_id: "u1".to_string(),
//!         description: "Starbucks latte".to_string(),
//!     })
//!     .await?;
//! println!("category: {:?}", result.category_id);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! A loaded [`Classifier`] is immutable and `Send + Sync`; concurrent
//! predict calls need no locking:
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use ledgercat::{CategoryExamples, Classifier};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let classifier = Arc::new(
//!     Classifier::builder()
//!         .add_category(
//!             CategoryExamples::new(5).with_examples(vec!["Starbucks", "Aroma Kava"]),
//!         )?
//!         .build()?,
//! );
//!
//! let mut handles = vec![];
//! for _ in 0..3 {
//!     let classifier = Arc::clone(&classifier);
//!     handles.push(thread::spawn(move || {
//!         classifier.predict("Starbucks latte").unwrap();
//!     }));
//! }
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod classifier;
mod config;
mod corrections;
mod error;
mod identity;
pub mod recorder;
pub mod resolver;
pub mod retrainer;
pub mod service;
pub mod store;

pub use cache::ModelCache;
pub use classifier::{
    CategoryExamples, Classifier, ClassifierBuilder, ClassifierError, ClassifierInfo,
    FeatureExtractor, DEFAULT_DIMENSIONS,
};
pub use config::ServiceConfig;
pub use corrections::{CorrectionLog, CorrectionRecord};
pub use error::ServeError;
pub use identity::UserId;
pub use recorder::CorrectionRecorder;
pub use resolver::{ModelSource, Resolution, Resolver};
pub use retrainer::{RetrainOutcome, Retrainer, RetrainerHandle};
pub use service::{
    Categorizer, ClassifyRequest, ClassifyResult, CorrectionRequest, CorrectionResult,
};
pub use store::{ArtifactStore, StoreError};

pub fn init_logger() {
    env_logger::init();
}
