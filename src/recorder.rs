use std::sync::Arc;

use log::{debug, warn};

use crate::corrections::{CorrectionLog, CorrectionRecord};
use crate::error::ServeError;
use crate::identity::UserId;
use crate::retrainer::RetrainerHandle;

/// Accepts user corrections: durable append first, retrain trigger second.
///
/// The append is the contract — a failed write surfaces to the caller as a
/// persistence error and is never retried here, since a silently dropped
/// correction corrupts the training signal. Once the record is durable, the
/// trigger policy runs: a retrain is requested after every
/// `retrain_threshold` accumulated corrections (once `min_training_samples`
/// is reached), and hand-off to the background workers never blocks the
/// submitting request.
pub struct CorrectionRecorder {
    log: Arc<CorrectionLog>,
    retrainer: RetrainerHandle,
    retrain_threshold: usize,
    min_training_samples: usize,
}

impl CorrectionRecorder {
    pub fn new(
        log: Arc<CorrectionLog>,
        retrainer: RetrainerHandle,
        retrain_threshold: usize,
        min_training_samples: usize,
    ) -> Self {
        Self {
            log,
            retrainer,
            retrain_threshold: retrain_threshold.max(1),
            min_training_samples,
        }
    }

    /// Appends the correction and evaluates the trigger policy.
    /// Returns whether a retrain was handed off.
    pub fn record(
        &self,
        user_id: &UserId,
        record: CorrectionRecord,
    ) -> Result<bool, ServeError> {
        self.log.append(user_id, &record)?;

        let count = match self.log.count(user_id) {
            Ok(count) => count,
            Err(e) => {
                // The correction itself is durable; only the trigger
                // evaluation failed, which the next correction repeats.
                warn!(
                    "Correction for {} persisted but trigger evaluation failed: {}",
                    user_id, e
                );
                return Ok(false);
            }
        };

        if count >= self.min_training_samples && count % self.retrain_threshold == 0 {
            debug!("{} corrections accumulated for {}; requesting retrain", count, user_id);
            return Ok(self.retrainer.request(user_id.clone()));
        }
        Ok(false)
    }
}
