use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::cache::ModelCache;
use crate::classifier::Classifier;
use crate::error::ServeError;
use crate::identity::UserId;
use crate::store::ArtifactStore;

/// Which artifact answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Personalized,
    Global,
}

/// A resolved prediction together with its provenance.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub category_id: Option<u32>,
    pub scores: HashMap<u32, f32>,
    pub source: ModelSource,
}

/// Decides, per request, which artifact serves a user.
///
/// Cache-aside over the artifact store: a hit serves the cached personalized
/// model; a miss consults the store, and the outcome is an explicit branch —
///
/// * loaded: installed in the cache and used;
/// * absent (`NotFound`): the global artifact answers, and nothing is cached
///   under the user's key, so a personalized artifact published later is
///   picked up by the very next miss without any invalidation handshake;
/// * present but unreadable: logged and degraded to the global artifact,
///   uncached, so the next request retries the load.
///
/// Prediction failures from a successfully resolved artifact are *not*
/// absorbed by the fallback; they propagate to the caller.
pub struct Resolver {
    store: Arc<ArtifactStore>,
    cache: ModelCache,
    global: Arc<Classifier>,
}

impl Resolver {
    pub fn new(store: Arc<ArtifactStore>, cache: ModelCache, global: Arc<Classifier>) -> Self {
        Self {
            store,
            cache,
            global,
        }
    }

    /// The shared fallback artifact loaded at startup.
    pub fn global(&self) -> &Arc<Classifier> {
        &self.global
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn resolve(&self, user_id: &UserId, description: &str) -> Result<Resolution, ServeError> {
        let personalized = self.cache.get_or_load(user_id.as_str(), || {
            match self.store.load(user_id) {
                Ok(classifier) => {
                    debug!("Loaded personalized artifact for {}", user_id);
                    Some(Arc::new(classifier))
                }
                Err(e) if e.is_not_found() => {
                    // Steady state for most users; the global artifact serves.
                    None
                }
                Err(e) => {
                    warn!(
                        "Personalized artifact for {} is unusable, serving global: {}",
                        user_id, e
                    );
                    None
                }
            }
        });

        let (model, source) = match &personalized {
            Some(classifier) => (classifier.as_ref(), ModelSource::Personalized),
            None => (self.global.as_ref(), ModelSource::Global),
        };

        let (category_id, scores) = model.predict(description)?;
        Ok(Resolution {
            category_id,
            scores,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CategoryExamples;

    fn global_model() -> Arc<Classifier> {
        Arc::new(
            Classifier::builder()
                .with_dimensions(256)
                .add_category(
                    CategoryExamples::new(0)
                        .with_label("Other")
                        .with_examples(vec!["misc payment"]),
                )
                .unwrap()
                .add_category(
                    CategoryExamples::new(3)
                        .with_label("Mobile")
                        .with_examples(vec!["Kyivstar", "Vodafone"]),
                )
                .unwrap()
                .build()
                .unwrap(),
        )
    }

    fn setup() -> (tempfile::TempDir, Resolver) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()).unwrap());
        let resolver = Resolver::new(store, ModelCache::new(16), global_model());
        (dir, resolver)
    }

    #[test]
    fn unknown_user_serves_global_uncached() {
        let (_dir, resolver) = setup();
        let user = UserId::new("nobody").unwrap();

        for _ in 0..3 {
            let resolution = resolver.resolve(&user, "Kyivstar").unwrap();
            assert_eq!(resolution.source, ModelSource::Global);
            assert_eq!(resolution.category_id, Some(3));
        }
        resolver.cache().flush();
        assert_eq!(resolver.cache().entry_count(), 0);
    }

    #[test]
    fn personalized_artifact_is_cached_after_first_resolve() {
        let (_dir, resolver) = setup();
        let user = UserId::new("u1").unwrap();

        let personalized = Classifier::builder()
            .with_dimensions(256)
            .add_category(CategoryExamples::new(7).with_examples(vec!["Kyivstar"]))
            .unwrap()
            .build()
            .unwrap();
        resolver.store.publish_atomic(&user, &personalized).unwrap();

        let first = resolver.resolve(&user, "Kyivstar").unwrap();
        assert_eq!(first.source, ModelSource::Personalized);
        assert_eq!(first.category_id, Some(7));

        resolver.cache().flush();
        assert_eq!(resolver.cache().entry_count(), 1);

        let hits_before = resolver.cache().hits();
        let second = resolver.resolve(&user, "Kyivstar").unwrap();
        assert_eq!(second.source, ModelSource::Personalized);
        assert!(resolver.cache().hits() > hits_before);
    }

    #[test]
    fn artifact_published_after_first_miss_is_picked_up() {
        let (_dir, resolver) = setup();
        let user = UserId::new("u2").unwrap();

        let before = resolver.resolve(&user, "Kyivstar").unwrap();
        assert_eq!(before.source, ModelSource::Global);

        let personalized = Classifier::builder()
            .with_dimensions(256)
            .add_category(CategoryExamples::new(9).with_examples(vec!["Kyivstar"]))
            .unwrap()
            .build()
            .unwrap();
        resolver.store.publish_atomic(&user, &personalized).unwrap();

        let after = resolver.resolve(&user, "Kyivstar").unwrap();
        assert_eq!(after.source, ModelSource::Personalized);
        assert_eq!(after.category_id, Some(9));
    }

    #[test]
    fn corrupt_artifact_degrades_to_global_without_error() {
        let (_dir, resolver) = setup();
        let user = UserId::new("u3").unwrap();

        let path = resolver.store.user_model_path(&user);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ truncated garbage").unwrap();

        let resolution = resolver.resolve(&user, "Kyivstar").unwrap();
        assert_eq!(resolution.source, ModelSource::Global);
        assert_eq!(resolution.category_id, Some(3));

        resolver.cache().flush();
        assert_eq!(resolver.cache().entry_count(), 0, "failures are never cached");
    }

    #[test]
    fn empty_description_passes_through_as_unknown() {
        let (_dir, resolver) = setup();
        let user = UserId::new("u4").unwrap();

        let resolution = resolver.resolve(&user, "").unwrap();
        assert_eq!(resolution.category_id, None);
    }
}
