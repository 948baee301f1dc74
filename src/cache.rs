//! Bounded LRU caches for parsed templates and pre-parsed expressions.
//!
//! Both caches sit on the shared [Environment](crate::Environment) and may
//! be hit by many concurrent renders, so each cache guards its LRU state
//! with a lock held only for the get/put itself. A configured capacity of
//! zero disables a cache entirely.

use crate::{
    Template,
    expression::{Expression, FilteredExpression, LoopExpression},
    loader::Uptodate,
};
use lru::LruCache;
use parking_lot::Mutex;
use std::{num::NonZeroUsize, sync::Arc};

/// A parsed template plus the loader's staleness probe
#[derive(Clone)]
pub(crate) struct CachedTemplate {
    pub(crate) template: Arc<Template>,
    pub(crate) uptodate: Option<Uptodate>,
}

/// The environment's template cache, keyed by loader-defined template name
pub(crate) struct TemplateCache {
    inner: Option<Mutex<LruCache<String, CachedTemplate>>>,
}

impl TemplateCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity)
                .map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Fetch a cached template. With `auto_reload`, a cached entry whose
    /// `uptodate` probe reports stale is evicted and treated as a miss.
    pub(crate) fn get(
        &self,
        name: &str,
        auto_reload: bool,
    ) -> Option<Arc<Template>> {
        let mut cache = self.inner.as_ref()?.lock();
        let entry = cache.get(name)?.clone();
        if auto_reload
            && let Some(uptodate) = &entry.uptodate
            && !uptodate()
        {
            tracing::debug!(name, "cached template is stale, evicting");
            cache.pop(name);
            return None;
        }
        Some(entry.template)
    }

    pub(crate) fn put(&self, name: String, entry: CachedTemplate) {
        if let Some(cache) = &self.inner {
            cache.lock().put(name, entry);
        }
    }
}

/// Per-flavour LRU caches mapping raw expression text to its parsed form.
/// Cached nodes keep the token offsets of the occurrence that was parsed
/// first; identical expression text parses identically, only error
/// locations can differ, which is the price of the cache.
pub(crate) struct ExpressionCaches {
    filtered: Mutex<LruCache<String, FilteredExpression>>,
    boolean: Mutex<LruCache<String, Expression>>,
    loops: Mutex<LruCache<String, LoopExpression>>,
}

impl ExpressionCaches {
    /// `None` when the configured capacity is zero
    pub(crate) fn new(capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            filtered: Mutex::new(LruCache::new(capacity)),
            boolean: Mutex::new(LruCache::new(capacity)),
            loops: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub(crate) fn get_filtered(
        &self,
        text: &str,
    ) -> Option<FilteredExpression> {
        self.filtered.lock().get(text).cloned()
    }

    pub(crate) fn store_filtered(
        &self,
        text: &str,
        expression: &FilteredExpression,
    ) {
        self.filtered
            .lock()
            .put(text.to_owned(), expression.clone());
    }

    pub(crate) fn get_boolean(&self, text: &str) -> Option<Expression> {
        self.boolean.lock().get(text).cloned()
    }

    pub(crate) fn store_boolean(&self, text: &str, expression: &Expression) {
        self.boolean.lock().put(text.to_owned(), expression.clone());
    }

    pub(crate) fn get_loop(&self, text: &str) -> Option<LoopExpression> {
        self.loops.lock().get(text).cloned()
    }

    pub(crate) fn store_loop(
        &self,
        text: &str,
        expression: &LoopExpression,
    ) {
        self.loops.lock().put(text.to_owned(), expression.clone());
    }
}
