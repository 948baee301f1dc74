//! Template loaders: how `include`, `render` and `extends` find template
//! source by name.
//!
//! Loaders are synchronous at heart; the async variant defaults to the
//! sync implementation so simple loaders write one method. Loaders backed
//! by genuinely asynchronous sources (a database, an object store)
//! override `get_source_async`, which is the engine's suspension point.

use crate::{
    context::RenderContext, environment::Environment, error::Error,
};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};

/// Checks whether previously loaded source is still current. Consulted on
/// cache hits when `auto_reload` is enabled, so it must be cheap and
/// side-effect free.
pub type Uptodate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Source text for one template, as returned by a loader
pub struct TemplateSource {
    pub source: String,
    /// The name templates will see in error messages; usually the lookup
    /// name, possibly qualified with a path
    pub name: String,
    pub uptodate: Option<Uptodate>,
}

impl TemplateSource {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            uptodate: None,
        }
    }
}

// Manual impl: the uptodate probe is an opaque closure
impl std::fmt::Debug for TemplateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSource")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("uptodate", &self.uptodate.is_some())
            .finish()
    }
}

/// Resolves template names to source text
#[async_trait]
pub trait Loader: Send + Sync {
    fn get_source(
        &self,
        env: &Environment,
        name: &str,
    ) -> Result<TemplateSource, Error>;

    async fn get_source_async(
        &self,
        env: &Environment,
        name: &str,
    ) -> Result<TemplateSource, Error> {
        self.get_source(env, name)
    }

    /// Variant for loaders that resolve names relative to the active
    /// render, e.g. per-tenant template sets. The default ignores the
    /// context.
    fn get_source_with_context(
        &self,
        ctx: &RenderContext<'_>,
        name: &str,
    ) -> Result<TemplateSource, Error> {
        self.get_source(ctx.env(), name)
    }
}

/// An in-memory loader over a fixed name → source mapping. The loader of
/// choice for tests and embedded template sets.
#[derive(Debug, Default)]
pub struct DictLoader {
    templates: HashMap<String, String>,
}

impl DictLoader {
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }
}

impl<K, V> FromIterator<(K, V)> for DictLoader
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            templates: iter
                .into_iter()
                .map(|(name, source)| (name.into(), source.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl Loader for DictLoader {
    fn get_source(
        &self,
        _env: &Environment,
        name: &str,
    ) -> Result<TemplateSource, Error> {
        self.templates
            .get(name)
            .map(|source| TemplateSource::new(source, name))
            .ok_or_else(|| Error::TemplateNotFound {
                name: name.to_owned(),
                location: None,
            })
    }
}
