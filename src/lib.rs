//! A safe, sandboxed Liquid templating engine.
//!
//! Templates are mostly-static text interleaved with output statements
//! (`{{ … }}`), control and iteration tags (`{% if %}`, `{% for %}`, …)
//! and value-transforming filters (`value | filter: arg`). Parsing builds
//! an immutable statement tree that any number of concurrent renders can
//! share; all per-render state lives in a render context created for each
//! call.
//!
//! ```
//! use eddy::{Environment, Object, Value};
//!
//! let env = Environment::default();
//! let template = env.parse("Hello, {{ name | upcase }}!")?;
//!
//! let mut globals = Object::new();
//! globals.insert("name".into(), Value::from("world"));
//! assert_eq!(template.render(&env, globals)?, "Hello, WORLD!");
//! # Ok::<(), eddy::Error>(())
//! ```
//!
//! Configuration (delimiters, tolerance mode, resource limits, loaders,
//! extra filters and tags) hangs off the [Environment], built once with
//! [Environment::builder] and shared by reference. Rendering comes in
//! synchronous and async flavours that walk the same tree; the async walk
//! suspends only where data may be fetched, i.e. in template loaders.

pub mod expression;
pub mod filter;
pub mod loader;
pub mod tag;
pub mod token;
pub mod value;

mod cache;
mod cereal;
mod context;
mod environment;
mod error;
mod lexer;
mod parser;
#[cfg(test)]
mod test_util;
#[cfg(test)]
mod tests;

pub use crate::{
    context::RenderContext,
    environment::{Environment, EnvironmentBuilder, Mode, UndefinedMode},
    error::{Error, SourceLocation},
    filter::{Filter, FilterArgs, FilterFn},
    loader::{DictLoader, Loader, TemplateSource},
    parser::TemplateParser,
    tag::{Statement, Tag},
    token::{Token, TokenKind},
    value::{Object, ObjectDrop, RangeValue, Value},
};
/// Re-exported for cancellable renders; see [Template::render_cancellable]
pub use tokio_util::sync::CancellationToken;

use crate::{
    context::Output,
    tag::{Flow, render_block},
};
use futures::{FutureExt, future::BoxFuture};
use std::sync::Arc;

/// A parsed template: an immutable statement tree plus the source it was
/// parsed from. Constructed by [Environment::parse] or a loader via
/// [Environment::get_template]; render as many times as needed, from as
/// many threads as needed.
#[derive(Clone, Debug)]
pub struct Template {
    pub(crate) nodes: Vec<Statement>,
    pub(crate) source: Arc<str>,
    pub(crate) name: Option<String>,
}

impl Template {
    /// The loader-defined name, when this template was loaded by name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The source text this template was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The top-level statements, for static analysis
    pub fn statements(&self) -> &[Statement] {
        &self.nodes
    }

    /// Render synchronously. Equivalent to driving [Self::render_async]
    /// to completion; guaranteed not to suspend because synchronous
    /// loaders never do.
    pub fn render(
        &self,
        env: &Environment,
        globals: Object,
    ) -> Result<String, Error> {
        futures::executor::block_on(self.render_async(env, globals))
    }

    /// Render cooperatively, suspending wherever a loader fetches
    /// template source
    pub async fn render_async(
        &self,
        env: &Environment,
        globals: Object,
    ) -> Result<String, Error> {
        self.render_cancellable(env, globals, &CancellationToken::new())
            .await
    }

    /// Render with a cancellation token. Cancellation is observed at
    /// statement boundaries and surfaces as [Error::Cancelled]; partial
    /// output is discarded.
    pub async fn render_cancellable(
        &self,
        env: &Environment,
        globals: Object,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let mut ctx = RenderContext::new(
            env,
            globals,
            cancel.clone(),
            self.name.clone(),
        );
        let mut out = Output::new(env.output_stream_limit);
        self.render_nested(&mut ctx, &mut out).await?;
        Ok(out.into_string())
    }

    /// Render into an existing context and sink. This is the entry point
    /// used by `include`/`render`/inheritance as well as the public render
    /// methods; it owns inheritance resolution and tags errors with this
    /// template's name.
    pub(crate) fn render_nested<'a>(
        &'a self,
        ctx: &'a mut RenderContext<'_>,
        out: &'a mut Output,
    ) -> BoxFuture<'a, Result<Flow, Error>> {
        async move {
            self.render_body(ctx, out).await.map_err(|error| {
                match &self.name {
                    Some(name) => error.with_template_name(name),
                    None => error,
                }
            })
        }
        .boxed()
    }

    async fn render_body(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let mut extends_tags =
            self.nodes.iter().filter_map(Statement::as_extends);
        let Some(extends) = extends_tags.next() else {
            return render_block(&self.nodes, ctx, out).await;
        };
        if let Some(second) = extends_tags.next() {
            return Err(Error::Inheritance {
                message: "a template may only extend one parent".to_owned(),
                location: Some(second.token.location()),
            });
        }

        // This template contributes its blocks and renders its parent in
        // its place. Walking up the chain registers childmost blocks
        // first, so they win.
        tag::collect_blocks(&self.nodes, ctx)?;
        ctx.enter_nested(&extends.token)?;
        let parent = ctx
            .env()
            .get_template_async(&extends.name)
            .await
            .map_err(|error| error.or_location(extends.token.location()))?;
        let flow = parent.render_nested(ctx, out).await?;
        ctx.exit_nested();
        Ok(flow)
    }
}
