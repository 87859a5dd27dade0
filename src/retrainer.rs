use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task;

use crate::cache::ModelCache;
use crate::classifier::Classifier;
use crate::config::ServiceConfig;
use crate::corrections::CorrectionLog;
use crate::error::ServeError;
use crate::identity::UserId;
use crate::store::ArtifactStore;

/// Outcome of one retrain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrainOutcome {
    /// Not enough corrections accumulated; nothing changed, not a failure.
    Skipped { have: usize, need: usize },
    /// A fresh personalized artifact was published.
    Published { samples: usize, categories: usize },
}

struct RetrainContext {
    store: Arc<ArtifactStore>,
    log: Arc<CorrectionLog>,
    cache: ModelCache,
    dimensions: usize,
    min_samples: usize,
}

/// Rebuilds personalized artifacts from accumulated corrections.
///
/// Retraining is always from scratch over the user's full correction log;
/// the log is never truncated or marked consumed, so a failed pass loses
/// nothing and the next successful pass absorbs every correction recorded
/// so far. A fit or publish failure leaves the previous artifact untouched.
pub struct Retrainer {
    ctx: Arc<RetrainContext>,
}

impl Retrainer {
    pub fn new(
        store: Arc<ArtifactStore>,
        log: Arc<CorrectionLog>,
        cache: ModelCache,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(RetrainContext {
                store,
                log,
                cache,
                dimensions: config.dimensions,
                min_samples: config.min_training_samples,
            }),
        }
    }

    /// Runs one retrain synchronously. Blocking; background workers call
    /// this off the request path, and the ops binary calls it directly.
    pub fn retrain(&self, user_id: &UserId) -> Result<RetrainOutcome, ServeError> {
        retrain_once(&self.ctx, user_id)
    }

    /// Spawns the background worker pool and returns the handle that feeds
    /// it. Must be called inside a tokio runtime.
    pub fn spawn(&self, workers: usize, timeout: Duration) -> RetrainerHandle {
        let (tx, rx) = mpsc::unbounded_channel::<UserId>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&self.ctx);
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(worker_loop(worker, rx, ctx, in_flight, timeout));
        }

        RetrainerHandle { tx, in_flight }
    }
}

/// Feeds retrain requests to the worker pool.
///
/// At most one retrain per user is queued or running at a time; requests
/// for a user already in flight coalesce into it.
#[derive(Clone)]
pub struct RetrainerHandle {
    tx: mpsc::UnboundedSender<UserId>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RetrainerHandle {
    /// Queues a retrain for the user. Returns false when the request
    /// coalesced into one already pending, or the workers are gone.
    pub fn request(&self, user_id: UserId) -> bool {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(user_id.as_str().to_string()) {
                debug!("Retrain for {} already in flight, coalescing", user_id);
                return false;
            }
        }
        if self.tx.send(user_id.clone()).is_err() {
            self.in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(user_id.as_str());
            warn!("Retrain workers are shut down; dropping request for {}", user_id);
            return false;
        }
        true
    }

    /// Whether a retrain for the user is currently queued or running.
    pub fn is_in_flight(&self, user_id: &UserId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(user_id.as_str())
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<UserId>>>,
    ctx: Arc<RetrainContext>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    timeout: Duration,
) {
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(user_id) = next else {
            debug!("Retrain worker {} shutting down", worker);
            break;
        };
        debug!("Retrain worker {} picked up {}", worker, user_id);

        let blocking_ctx = Arc::clone(&ctx);
        let blocking_user = user_id.clone();
        let outcome = tokio::time::timeout(
            timeout,
            task::spawn_blocking(move || retrain_once(&blocking_ctx, &blocking_user)),
        )
        .await;

        match outcome {
            Err(_) => error!(
                "Retrain for {} exceeded {:?} and was abandoned",
                user_id, timeout
            ),
            Ok(Err(join_err)) => error!("Retrain task for {} died: {}", user_id, join_err),
            Ok(Ok(Err(e))) => error!("Retrain for {} failed: {}", user_id, e),
            Ok(Ok(Ok(RetrainOutcome::Skipped { have, need }))) => debug!(
                "Retrain for {} skipped: {} corrections, need {}",
                user_id, have, need
            ),
            Ok(Ok(Ok(RetrainOutcome::Published {
                samples,
                categories,
            }))) => info!(
                "Retrained {}: {} samples across {} categories",
                user_id, samples, categories
            ),
        }

        in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id.as_str());
    }
}

fn retrain_once(ctx: &RetrainContext, user_id: &UserId) -> Result<RetrainOutcome, ServeError> {
    let records = ctx.log.read_all(user_id)?;
    if records.len() < ctx.min_samples {
        return Ok(RetrainOutcome::Skipped {
            have: records.len(),
            need: ctx.min_samples,
        });
    }

    // Last-write-wins per description: the log is append-ordered, so the
    // newest correction for a given text is the one trained on.
    let mut latest: HashMap<String, u32> = HashMap::new();
    for record in &records {
        latest.insert(record.description.clone(), record.corrected_category_id);
    }
    let samples: Vec<(String, u32)> = latest.into_iter().collect();

    let classifier = Classifier::fit(ctx.dimensions, &samples)
        .map_err(|e| ServeError::Internal(format!("training failed for {}: {}", user_id, e)))?;

    // Invalidate around the publish: drop the stale handle first, then force
    // the next resolve to reload the freshly written file.
    ctx.cache.invalidate(user_id.as_str());
    ctx.store.publish_atomic(user_id, &classifier)?;
    ctx.cache.invalidate(user_id.as_str());

    Ok(RetrainOutcome::Published {
        samples: samples.len(),
        categories: classifier.info().num_categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::CorrectionRecord;
    use chrono::Utc;

    fn correction(user: &str, text: &str, corrected: u32) -> CorrectionRecord {
        CorrectionRecord {
            user_id: user.to_string(),
            description: text.to_string(),
            original_category_id: Some(0),
            corrected_category_id: corrected,
            timestamp: Utc::now(),
        }
    }

    fn setup(min_samples: usize) -> (tempfile::TempDir, Retrainer, Arc<CorrectionLog>, ModelCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()).unwrap());
        let log = Arc::new(CorrectionLog::new(dir.path()).unwrap());
        let cache = ModelCache::new(16);
        let config = ServiceConfig {
            min_training_samples: min_samples,
            dimensions: 256,
            ..ServiceConfig::with_data_dir(dir.path())
        };
        let retrainer = Retrainer::new(store, Arc::clone(&log), cache.clone(), &config);
        (dir, retrainer, log, cache)
    }

    #[test]
    fn below_minimum_is_a_noop() {
        let (_dir, retrainer, log, _cache) = setup(3);
        let user = UserId::new("u1").unwrap();
        log.append(&user, &correction("u1", "Kyivstar", 5)).unwrap();

        let outcome = retrainer.retrain(&user).unwrap();
        assert_eq!(outcome, RetrainOutcome::Skipped { have: 1, need: 3 });
        assert!(!retrainer.ctx.store.exists(&user));
    }

    #[test]
    fn enough_corrections_publish_an_artifact() {
        let (_dir, retrainer, log, _cache) = setup(3);
        let user = UserId::new("u1").unwrap();
        for _ in 0..3 {
            log.append(&user, &correction("u1", "Kyivstar", 5)).unwrap();
        }

        let outcome = retrainer.retrain(&user).unwrap();
        assert_eq!(
            outcome,
            RetrainOutcome::Published {
                samples: 1,
                categories: 1
            }
        );

        let published = retrainer.ctx.store.load(&user).unwrap();
        let (category, _) = published.predict("Kyivstar").unwrap();
        assert_eq!(category, Some(5));
    }

    #[test]
    fn stale_cache_entry_is_invalidated() {
        let (_dir, retrainer, log, cache) = setup(1);
        let user = UserId::new("u1").unwrap();

        let stale = Classifier::builder()
            .with_dimensions(256)
            .add_category(crate::classifier::CategoryExamples::new(1).with_examples(vec!["old"]))
            .unwrap()
            .build()
            .unwrap();
        cache.insert(user.as_str(), Arc::new(stale));

        log.append(&user, &correction("u1", "Kyivstar", 5)).unwrap();
        retrainer.retrain(&user).unwrap();

        assert!(cache.get(user.as_str()).is_none());
    }

    #[test]
    fn later_correction_wins_for_same_description() {
        let (_dir, retrainer, log, _cache) = setup(2);
        let user = UserId::new("u1").unwrap();
        log.append(&user, &correction("u1", "Kyivstar", 5)).unwrap();
        log.append(&user, &correction("u1", "Kyivstar", 8)).unwrap();

        retrainer.retrain(&user).unwrap();
        let published = retrainer.ctx.store.load(&user).unwrap();
        let (category, _) = published.predict("Kyivstar").unwrap();
        assert_eq!(category, Some(8));
    }

    #[test]
    fn failed_fit_leaves_previous_artifact_untouched() {
        let (_dir, retrainer, log, _cache) = setup(1);
        let user = UserId::new("u1").unwrap();

        log.append(&user, &correction("u1", "Kyivstar", 5)).unwrap();
        retrainer.retrain(&user).unwrap();

        // All-featureless training set: the fit fails, the old artifact stays.
        log.append(&user, &correction("u1", "***", 6)).unwrap();
        log.append(&user, &correction("u1", "---", 7)).unwrap();
        let err = retrainer.retrain(&user);
        assert!(err.is_err());

        let survivor = retrainer.ctx.store.load(&user).unwrap();
        let (category, _) = survivor.predict("Kyivstar").unwrap();
        assert_eq!(category, Some(5));
    }

    #[test]
    fn requests_coalesce_per_user() {
        // A handle whose queue nothing consumes, so the first request stays
        // in flight for the duration of the test.
        let (tx, _rx_kept_alive) = mpsc::unbounded_channel();
        let handle = RetrainerHandle {
            tx,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        };

        let user = UserId::new("u1").unwrap();
        assert!(handle.request(user.clone()));
        assert!(!handle.request(user.clone()), "second request coalesces");
        assert!(handle.is_in_flight(&user));
    }

    #[test]
    fn request_fails_cleanly_after_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = RetrainerHandle {
            tx,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        };

        let user = UserId::new("u1").unwrap();
        assert!(!handle.request(user.clone()));
        assert!(!handle.is_in_flight(&user), "failed request leaves no residue");
    }
}
