//! Deduplication gate over a shared seen-set.
//!
//! The membership check is only a fast path. The atomic set-add decides who
//! "saw it first", and the document store's unique index is the backstop when
//! the cache is stale or unreachable.

use tracing::{debug, warn};

use jobsink_core::{AdmitOutcome, RecordKey, SkipReason};

use crate::cache::{CacheBackend, CacheError};

/// Default seen-set namespace template.
pub const DEFAULT_NAMESPACE_TEMPLATE: &str = "{source}_seen_ids";

/// Placeholder substituted by [`DedupGate::namespace_for`].
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Decides "first time" vs "already seen" for record keys.
#[derive(Debug, Clone)]
pub struct DedupGate<C> {
    cache: C,
    namespace_template: String,
}

impl<C: CacheBackend> DedupGate<C> {
    pub fn new(cache: C) -> Self {
        Self {
            cache,
            namespace_template: DEFAULT_NAMESPACE_TEMPLATE.to_string(),
        }
    }

    pub fn with_namespace_template(mut self, template: impl Into<String>) -> Self {
        self.namespace_template = template.into();
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Seen-set name for a run/source identifier.
    pub fn namespace_for(&self, source: &str) -> String {
        self.namespace_template.replace(SOURCE_PLACEHOLDER, source)
    }

    /// Admit `key` into `namespace`.
    ///
    /// Never fails: cache problems degrade to `Skipped` and the record passes
    /// through to storage.
    pub async fn admit(&self, namespace: &str, key: Option<&RecordKey>) -> AdmitOutcome {
        let Some(key) = key else {
            debug!(namespace, "record has no key; dedup skipped");
            return AdmitOutcome::Skipped(SkipReason::NoKey);
        };

        match self.check_then_add(namespace, key).await {
            Ok(outcome) => outcome,
            Err(CacheError::Unavailable(e)) => {
                warn!(namespace, key = %key, kind = %e.kind(), error = %e, "cache unavailable; dedup bypassed");
                AdmitOutcome::Skipped(SkipReason::BackendUnavailable)
            }
            Err(e) => {
                warn!(namespace, key = %key, kind = %e.kind(), error = %e, "cache command failed; dedup bypassed");
                AdmitOutcome::Skipped(SkipReason::BackendError)
            }
        }
    }

    async fn check_then_add(&self, namespace: &str, key: &RecordKey) -> Result<AdmitOutcome, CacheError> {
        if self.cache.is_member(namespace, key.as_str()).await? {
            debug!(namespace, key = %key, "key already seen");
            return Ok(AdmitOutcome::Duplicate);
        }

        if self.cache.add_member(namespace, key.as_str()).await? {
            debug!(namespace, key = %key, "key admitted");
            Ok(AdmitOutcome::Admitted)
        } else {
            warn!(namespace, key = %key, "lost seen-set race; treating as duplicate");
            Ok(AdmitOutcome::Duplicate)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use super::*;
    use crate::cache::InMemoryCache;
    use crate::connection::Unavailable;

    /// Cache whose every call fails the same way, or which always loses the
    /// add race.
    enum ScriptedCache {
        Down,
        Broken,
        LosesRace,
    }

    #[async_trait]
    impl CacheBackend for ScriptedCache {
        async fn ping(&self) -> Result<(), CacheError> {
            Ok(())
        }

        async fn is_member(&self, _set: &str, _member: &str) -> Result<bool, CacheError> {
            match self {
                ScriptedCache::Down => Err(Unavailable::new("redis", "connection refused").into()),
                ScriptedCache::Broken => Err(CacheError::Command("WRONGTYPE".to_string())),
                ScriptedCache::LosesRace => Ok(false),
            }
        }

        async fn add_member(&self, _set: &str, _member: &str) -> Result<bool, CacheError> {
            Ok(false)
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str, _expiry: Option<Duration>) -> Result<(), CacheError> {
            Ok(())
        }

        async fn release(&self) {}
    }

    fn key(s: &str) -> RecordKey {
        RecordKey::new(s)
    }

    #[tokio::test]
    async fn second_admission_is_duplicate() {
        let gate = DedupGate::new(InMemoryCache::new());
        let ns = gate.namespace_for("acme");

        assert_eq!(gate.admit(&ns, Some(&key("a"))).await, AdmitOutcome::Admitted);
        assert_eq!(gate.admit(&ns, Some(&key("a"))).await, AdmitOutcome::Duplicate);
        assert_eq!(gate.admit(&ns, Some(&key("b"))).await, AdmitOutcome::Admitted);
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let gate = DedupGate::new(InMemoryCache::new());
        let a = gate.namespace_for("acme");
        let b = gate.namespace_for("globex");

        assert_eq!(gate.admit(&a, Some(&key("x"))).await, AdmitOutcome::Admitted);
        assert_eq!(gate.admit(&b, Some(&key("x"))).await, AdmitOutcome::Admitted);
    }

    #[tokio::test]
    async fn missing_key_is_skipped() {
        let gate = DedupGate::new(InMemoryCache::new());
        assert_eq!(
            gate.admit("ns", None).await,
            AdmitOutcome::Skipped(SkipReason::NoKey)
        );
        assert_eq!(gate.cache().set_len("ns"), 0);
    }

    #[tokio::test]
    async fn cache_failures_fail_open() {
        let down = DedupGate::new(ScriptedCache::Down);
        assert_eq!(
            down.admit("ns", Some(&key("a"))).await,
            AdmitOutcome::Skipped(SkipReason::BackendUnavailable)
        );

        let broken = DedupGate::new(ScriptedCache::Broken);
        assert_eq!(
            broken.admit("ns", Some(&key("a"))).await,
            AdmitOutcome::Skipped(SkipReason::BackendError)
        );
    }

    #[tokio::test]
    async fn lost_add_race_is_duplicate() {
        let gate = DedupGate::new(ScriptedCache::LosesRace);
        assert_eq!(gate.admit("ns", Some(&key("a"))).await, AdmitOutcome::Duplicate);
    }

    #[test]
    fn namespace_template_is_rendered() {
        let gate = DedupGate::new(InMemoryCache::new());
        assert_eq!(gate.namespace_for("acme"), "acme_seen_ids");

        let gate = gate.with_namespace_template("seen:{source}");
        assert_eq!(gate.namespace_for("acme"), "seen:acme");
    }

    proptest! {
        #[test]
        fn admitting_twice_yields_admitted_then_duplicate(k in "\\PC{1,48}", source in "[a-z]{1,12}") {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let gate = DedupGate::new(InMemoryCache::new());
            let ns = gate.namespace_for(&source);
            let k = RecordKey::new(k);

            let (first, second) = rt.block_on(async {
                (gate.admit(&ns, Some(&k)).await, gate.admit(&ns, Some(&k)).await)
            });
            prop_assert_eq!(first, AdmitOutcome::Admitted);
            prop_assert_eq!(second, AdmitOutcome::Duplicate);
        }
    }
}
