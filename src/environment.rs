//! Shared configuration templates are parsed and rendered against.
//!
//! An [Environment] is built once, optionally customized with filters,
//! tags, globals and a loader, and is then immutable: concurrent renders
//! share it freely. The only interior mutability lives in its caches,
//! which take a short lock per get/put.

use crate::{
    Template,
    cache::{CachedTemplate, ExpressionCaches, TemplateCache},
    error::Error,
    filter::{self, Filter, FilterRegistry},
    loader::{DictLoader, Loader, TemplateSource},
    tag::{self, Tag, TagRegistry},
    value::{Object, Value},
};
use std::sync::Arc;

/// How tolerant rendering is of recoverable errors (unknown filters, type
/// errors and the like). Resource-limit violations and cancellation are
/// always fatal regardless of mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Mode {
    /// Raise every render-time error
    #[default]
    Strict,
    /// Log a warning and elide the offending output
    Warn,
    /// Silently elide the offending output
    Lax,
}

/// How undefined values behave when used
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UndefinedMode {
    /// Undefined values are falsy and render as nothing
    #[default]
    Plain,
    /// Like `Plain`, but rendering an undefined value writes a diagnostic
    /// instead of nothing
    Debug,
    /// The first use of an undefined value (output, truthiness test,
    /// comparison or filter input) is an error
    Strict,
}

pub struct Environment {
    pub(crate) tag_start: String,
    pub(crate) tag_end: String,
    pub(crate) output_start: String,
    pub(crate) output_end: String,
    pub(crate) comment_start: String,
    pub(crate) comment_end: String,
    pub(crate) template_comments: bool,
    pub(crate) mode: Mode,
    pub(crate) undefined: UndefinedMode,
    pub(crate) strict_filters: bool,
    pub(crate) autoescape: bool,
    pub(crate) auto_reload: bool,
    pub(crate) keyword_assignment: bool,
    pub(crate) logical_parens: bool,
    pub(crate) context_depth_limit: usize,
    pub(crate) loop_iteration_limit: Option<usize>,
    pub(crate) local_namespace_limit: Option<usize>,
    pub(crate) output_stream_limit: Option<usize>,
    pub(crate) globals: Object,
    pub(crate) filters: FilterRegistry,
    pub(crate) tags: TagRegistry,
    pub(crate) loader: Arc<dyn Loader>,
    pub(crate) template_cache: TemplateCache,
    pub(crate) expression_cache: Option<ExpressionCaches>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Parse template source into an anonymous template
    pub fn parse(&self, source: &str) -> Result<Template, Error> {
        self.parse_source(None, source)
    }

    /// Parse template source under a name, as the loader path does. The
    /// name shows up in error messages.
    pub fn parse_named(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Template, Error> {
        self.parse_source(Some(name.to_owned()), source)
    }

    fn parse_source(
        &self,
        name: Option<String>,
        source: &str,
    ) -> Result<Template, Error> {
        let source: Arc<str> = source.into();
        let nodes =
            crate::parser::parse(self, &source).map_err(|error| {
                match &name {
                    Some(name) => error.with_template_name(name),
                    None => error,
                }
            })?;
        Ok(Template {
            nodes,
            source,
            name,
        })
    }

    /// Load and parse a template by name, through the template cache
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>, Error> {
        if let Some(hit) = self.template_cache.get(name, self.auto_reload) {
            tracing::trace!(name, "template cache hit");
            return Ok(hit);
        }
        let source = self.loader.get_source(self, name)?;
        self.parse_and_cache(name, source)
    }

    /// Async variant of [Self::get_template]; the loader call is the
    /// suspension point
    pub async fn get_template_async(
        &self,
        name: &str,
    ) -> Result<Arc<Template>, Error> {
        if let Some(hit) = self.template_cache.get(name, self.auto_reload) {
            tracing::trace!(name, "template cache hit");
            return Ok(hit);
        }
        let source = self.loader.get_source_async(self, name).await?;
        self.parse_and_cache(name, source)
    }

    fn parse_and_cache(
        &self,
        name: &str,
        source: TemplateSource,
    ) -> Result<Arc<Template>, Error> {
        tracing::debug!(name, "parsing loaded template");
        let template =
            Arc::new(self.parse_named(&source.name, &source.source)?);
        self.template_cache.put(
            name.to_owned(),
            CachedTemplate {
                template: Arc::clone(&template),
                uptodate: source.uptodate,
            },
        );
        Ok(template)
    }
}

/// Configures and builds an [Environment]. Options not set keep Liquid's
/// conventional defaults.
pub struct EnvironmentBuilder {
    tag_start: String,
    tag_end: String,
    output_start: String,
    output_end: String,
    comment_start: String,
    comment_end: String,
    template_comments: bool,
    mode: Mode,
    undefined: UndefinedMode,
    strict_filters: bool,
    autoescape: bool,
    auto_reload: bool,
    keyword_assignment: bool,
    logical_parens: bool,
    context_depth_limit: usize,
    loop_iteration_limit: Option<usize>,
    local_namespace_limit: Option<usize>,
    output_stream_limit: Option<usize>,
    cache_size: usize,
    expression_cache_size: usize,
    globals: Object,
    filters: FilterRegistry,
    tags: TagRegistry,
    loader: Arc<dyn Loader>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self {
            tag_start: "{%".to_owned(),
            tag_end: "%}".to_owned(),
            output_start: "{{".to_owned(),
            output_end: "}}".to_owned(),
            comment_start: "{#".to_owned(),
            comment_end: "#}".to_owned(),
            template_comments: false,
            mode: Mode::default(),
            undefined: UndefinedMode::default(),
            strict_filters: true,
            autoescape: false,
            auto_reload: true,
            keyword_assignment: false,
            logical_parens: false,
            context_depth_limit: 30,
            loop_iteration_limit: None,
            local_namespace_limit: None,
            output_stream_limit: None,
            cache_size: 300,
            expression_cache_size: 0,
            globals: Object::new(),
            filters: filter::standard_registry(),
            tags: tag::standard_registry(),
            loader: Arc::new(DictLoader::default()),
        }
    }
}

impl EnvironmentBuilder {
    /// Override the tag and output delimiters
    #[must_use]
    pub fn delimiters(
        mut self,
        tag_start: &str,
        tag_end: &str,
        output_start: &str,
        output_end: &str,
    ) -> Self {
        self.tag_start = tag_start.to_owned();
        self.tag_end = tag_end.to_owned();
        self.output_start = output_start.to_owned();
        self.output_end = output_end.to_owned();
        self
    }

    /// Enable `{# … #}` shorthand comments
    #[must_use]
    pub fn template_comments(mut self, enabled: bool) -> Self {
        self.template_comments = enabled;
        self
    }

    /// Override the shorthand comment delimiters (implies enabling them)
    #[must_use]
    pub fn comment_delimiters(mut self, start: &str, end: &str) -> Self {
        self.comment_start = start.to_owned();
        self.comment_end = end.to_owned();
        self.template_comments = true;
        self
    }

    /// Tolerance for recoverable render-time errors
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Behavior of undefined values
    #[must_use]
    pub fn undefined(mut self, undefined: UndefinedMode) -> Self {
        self.undefined = undefined;
        self
    }

    /// Whether an unknown filter is an error (true) or silently skipped
    #[must_use]
    pub fn strict_filters(mut self, strict: bool) -> Self {
        self.strict_filters = strict;
        self
    }

    /// HTML-escape dynamic output
    #[must_use]
    pub fn autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }

    /// Consult loader `uptodate` probes on template cache hits
    #[must_use]
    pub fn auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }

    /// Accept `=` in addition to `:` as the keyword argument separator
    #[must_use]
    pub fn keyword_assignment(mut self, enabled: bool) -> Self {
        self.keyword_assignment = enabled;
        self
    }

    /// Enable the non-standard boolean dialect: `not` and grouping parens
    #[must_use]
    pub fn logical_parens(mut self, enabled: bool) -> Self {
        self.logical_parens = enabled;
        self
    }

    /// Maximum nested `include`/`render`/inheritance depth
    #[must_use]
    pub fn context_depth_limit(mut self, limit: usize) -> Self {
        self.context_depth_limit = limit;
        self
    }

    /// Maximum total loop iterations per render
    #[must_use]
    pub fn loop_iteration_limit(mut self, limit: usize) -> Self {
        self.loop_iteration_limit = Some(limit);
        self
    }

    /// Maximum bytes of values assigned to a render's local namespace
    #[must_use]
    pub fn local_namespace_limit(mut self, limit: usize) -> Self {
        self.local_namespace_limit = Some(limit);
        self
    }

    /// Maximum bytes written to the output sink per render
    #[must_use]
    pub fn output_stream_limit(mut self, limit: usize) -> Self {
        self.output_stream_limit = Some(limit);
        self
    }

    /// Template cache capacity; 0 disables the cache
    #[must_use]
    pub fn cache_size(mut self, capacity: usize) -> Self {
        self.cache_size = capacity;
        self
    }

    /// Expression cache capacity per expression flavour; 0 (the default)
    /// disables expression caching
    #[must_use]
    pub fn expression_cache_size(mut self, capacity: usize) -> Self {
        self.expression_cache_size = capacity;
        self
    }

    /// Merge a mapping into every render's globals
    #[must_use]
    pub fn globals(mut self, globals: Object) -> Self {
        self.globals.extend(globals);
        self
    }

    /// Set one global value
    #[must_use]
    pub fn global(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Register a filter, replacing any standard filter of the same name
    #[must_use]
    pub fn filter(
        mut self,
        name: impl Into<String>,
        filter: Arc<dyn Filter>,
    ) -> Self {
        self.filters.insert(name.into(), filter);
        self
    }

    /// Register a tag, replacing any standard tag of the same name
    #[must_use]
    pub fn tag(mut self, tag: Arc<dyn Tag>) -> Self {
        self.tags.insert(tag.name().to_owned(), tag);
        self
    }

    /// Set the template loader
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn build(self) -> Environment {
        Environment {
            tag_start: self.tag_start,
            tag_end: self.tag_end,
            output_start: self.output_start,
            output_end: self.output_end,
            comment_start: self.comment_start,
            comment_end: self.comment_end,
            template_comments: self.template_comments,
            mode: self.mode,
            undefined: self.undefined,
            strict_filters: self.strict_filters,
            autoescape: self.autoescape,
            auto_reload: self.auto_reload,
            keyword_assignment: self.keyword_assignment,
            logical_parens: self.logical_parens,
            context_depth_limit: self.context_depth_limit,
            loop_iteration_limit: self.loop_iteration_limit,
            local_namespace_limit: self.local_namespace_limit,
            output_stream_limit: self.output_stream_limit,
            globals: self.globals,
            filters: self.filters,
            tags: self.tags,
            loader: self.loader,
            template_cache: TemplateCache::new(self.cache_size),
            expression_cache: ExpressionCaches::new(
                self.expression_cache_size,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::FilterArgs, loader::Uptodate, test_util::assert_err,
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// A loader that counts how many times it is asked for source
    struct CountingLoader {
        loads: AtomicUsize,
        fresh: Arc<AtomicBool>,
    }

    impl Loader for CountingLoader {
        fn get_source(
            &self,
            _env: &Environment,
            name: &str,
        ) -> Result<TemplateSource, Error> {
            self.loads.fetch_add(1, Ordering::Relaxed);
            let fresh = Arc::clone(&self.fresh);
            Ok(TemplateSource {
                source: format!("template {name}"),
                name: name.to_owned(),
                uptodate: Some(Arc::new(move || {
                    fresh.load(Ordering::Relaxed)
                }) as Uptodate),
            })
        }
    }

    #[test]
    fn test_get_template_caches() {
        let fresh = Arc::new(AtomicBool::new(true));
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            fresh: Arc::clone(&fresh),
        });
        let env = Environment::builder()
            .loader(Arc::clone(&loader) as Arc<dyn Loader>)
            .build();

        env.get_template("a").unwrap();
        env.get_template("a").unwrap();
        assert_eq!(loader.loads.load(Ordering::Relaxed), 1);

        // Marking the source stale forces a reload on the next hit
        fresh.store(false, Ordering::Relaxed);
        env.get_template("a").unwrap();
        assert_eq!(loader.loads.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_auto_reload_disabled_skips_uptodate() {
        let fresh = Arc::new(AtomicBool::new(false));
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            fresh,
        });
        let env = Environment::builder()
            .loader(Arc::clone(&loader) as Arc<dyn Loader>)
            .auto_reload(false)
            .build();

        env.get_template("a").unwrap();
        env.get_template("a").unwrap();
        assert_eq!(loader.loads.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_get_template_async() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            fresh: Arc::new(AtomicBool::new(true)),
        });
        let env = Environment::builder()
            .loader(Arc::clone(&loader) as Arc<dyn Loader>)
            .build();
        let template = env.get_template_async("pages/home").await.unwrap();
        assert_eq!(template.name(), Some("pages/home"));
        env.get_template_async("pages/home").await.unwrap();
        assert_eq!(loader.loads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_custom_filter_registration() {
        fn shout(
            input: &crate::Value,
            args: &mut FilterArgs<'_>,
        ) -> Result<crate::Value, Error> {
            args.ensure_consumed()?;
            Ok(format!("{}!!", input.render_string()).into())
        }
        let env = Environment::builder()
            .filter("shout", Arc::new(crate::filter::FilterFn(shout)))
            .global("name", "sal")
            .build();
        let template = env.parse("{{ name | shout }}").unwrap();
        assert_eq!(template.render(&env, Object::new()).unwrap(), "sal!!");
    }

    #[test]
    fn test_lenient_filters() {
        let env = Environment::builder().strict_filters(false).build();
        let template = env.parse("{{ 'hi' | nope | upcase }}").unwrap();
        // The unknown filter passes its input through
        assert_eq!(template.render(&env, Object::new()).unwrap(), "HI");
    }

    #[test]
    fn test_tolerance_modes() {
        // Comparing incomparable types is a recoverable render error
        let source = "a{% if 1 < 'x' %}b{% endif %}c";

        let strict = Environment::builder().mode(Mode::Strict).build();
        assert_err!(
            strict.parse(source).unwrap().render(&strict, Object::new()),
            "'<' and '>' are not supported"
        );

        for mode in [Mode::Warn, Mode::Lax] {
            let env = Environment::builder().mode(mode).build();
            let template = env.parse(source).unwrap();
            assert_eq!(
                template.render(&env, Object::new()).unwrap(),
                "ac",
                "{mode:?}"
            );
        }
    }

    #[test]
    fn test_limits_are_fatal_in_lax_mode() {
        let env = Environment::builder()
            .mode(Mode::Lax)
            .output_stream_limit(4)
            .build();
        let template = env.parse("{{ 'too much output' }}").unwrap();
        assert_err!(
            template.render(&env, Object::new()),
            "output stream limit reached (4 bytes)"
        );
    }

    #[test]
    fn test_custom_delimiters() {
        let env = Environment::builder()
            .delimiters("<%", "%>", "<<", ">>")
            .build();
        let template = env
            .parse("<% assign x = 2 %><< x >>{{ not parsed }}")
            .unwrap();
        assert_eq!(
            template.render(&env, Object::new()).unwrap(),
            "2{{ not parsed }}"
        );
    }

    #[test]
    fn test_autoescape() {
        let env = Environment::builder().autoescape(true).build();
        let template = env.parse("<b>{{ payload }}</b>").unwrap();
        let globals: Object = [(
            "payload".to_owned(),
            crate::Value::from("<script>alert(1)</script>"),
        )]
        .into_iter()
        .collect();
        assert_eq!(
            template.render(&env, globals).unwrap(),
            "<b>&lt;script&gt;alert(1)&lt;/script&gt;</b>"
        );
    }

    #[test]
    fn test_environment_globals_merge_with_render_globals() {
        let env = Environment::builder()
            .global("site", "Ebb")
            .global("shadowed", "env")
            .build();
        let template =
            env.parse("{{ site }}/{{ shadowed }}/{{ local }}").unwrap();
        let globals: Object = [
            ("shadowed".to_owned(), crate::Value::from("render")),
            ("local".to_owned(), crate::Value::from("l")),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            template.render(&env, globals).unwrap(),
            "Ebb/render/l"
        );
    }
}
