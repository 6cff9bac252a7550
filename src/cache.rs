use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::settings::CacheSettings;
use crate::storage::{BodyStore, MetadataStore};

type ErrorHook = Box<dyn Fn(&anyhow::Error) + Send + Sync>;

/// The cache engine: a decision layer over two caller-provided key/value
/// stores. One engine instance assumes exclusive ownership of both stores;
/// callers wanting multi-instance coherence must build it elsewhere.
pub struct HttpCache {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) bodies: Arc<dyn BodyStore>,
    pub(crate) settings: CacheSettings,
    error_hook: ErrorHook,
}

impl std::fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCache")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl HttpCache {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        bodies: Arc<dyn BodyStore>,
        settings: CacheSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            metadata,
            bodies,
            settings,
            error_hook: Box::new(|_| {}),
        })
    }

    /// Replace the no-op error hook. Storage and consumer-misuse failures
    /// on the response path are routed here instead of propagating.
    pub fn with_error_hook(
        mut self,
        hook: impl Fn(&anyhow::Error) + Send + Sync + 'static,
    ) -> Self {
        self.error_hook = Box::new(hook);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub(crate) fn report(&self, err: anyhow::Error) {
        warn!(error = %err, "cache operation failed");
        (self.error_hook)(&err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn construction_validates_settings() {
        let store = Arc::new(MemoryStore::new());
        let settings = CacheSettings {
            max_capture_bytes: 0,
            ..CacheSettings::default()
        };
        assert!(HttpCache::new(store.clone(), store, settings).is_err());
    }

    #[tokio::test]
    async fn error_hook_observes_reported_failures() -> Result<()> {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = Arc::new(MemoryStore::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_hook = seen.clone();
        let cache = HttpCache::new(store.clone(), store, CacheSettings::default())?
            .with_error_hook(move |_| {
                seen_hook.fetch_add(1, Ordering::SeqCst);
            });

        cache.report(anyhow::anyhow!("synthetic failure"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
