use std::time::Duration;

use crate::classifier::ClassifierError;
use crate::store::StoreError;

/// Service-level error taxonomy.
///
/// Fallback conditions (no personalized artifact, or one that fails to load)
/// are recovered inside the resolver and never surface here; everything below
/// is reported to the caller or operator verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The user identity failed validation; rejected before any store access
    #[error("Invalid user id: {0}")]
    Validation(String),
    /// A resolved, successfully loaded artifact failed to produce a category
    #[error("Prediction failed: {0}")]
    Prediction(#[from] ClassifierError),
    /// A correction append or artifact publish failed durably
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
    /// The global artifact failed to load; the service must not start
    #[error("Global model unavailable: {0}")]
    Startup(#[source] StoreError),
    /// A classification request exceeded its time budget
    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),
    /// A background task failed in a way that has no better category
    #[error("Internal error: {0}")]
    Internal(String),
}
