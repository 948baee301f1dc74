//! Statement nodes and the tag registry.
//!
//! [Statement] is a tagged variant per node type rather than a class
//! hierarchy; rendering is one pattern match, and [Statement::children]
//! exposes nested bodies for static analysis. Statements are built once by
//! the parser and never mutated; all render-time state lives in the
//! [RenderContext].
//!
//! Rendering is async so that tags which fetch templates (`include`,
//! `render`, `extends`) can suspend in the loader. Recursion through nested
//! bodies goes through boxed futures, the only await points are statement
//! boundaries, and output writes stay in source order.

mod assign;
mod comment;
mod control;
mod include;
mod inherit;
mod iterate;

pub use assign::{
    AssignTag, CaptureTag, DecrementTag, EchoTag, IncrementTag,
};
pub use comment::{CommentTag, DocTag};
pub use control::{CaseTag, ConditionalBranch, ConditionalTag, WhenBranch};
pub use include::{Bind, BindKind, IncludeTag, RenderTag};
pub use inherit::{BlockTag, ExtendsTag};
pub(crate) use inherit::collect_blocks;
pub use iterate::{BreakTag, ContinueTag, CycleTag, ForTag, TableRowTag};

use crate::{
    context::{Output, RenderContext},
    environment::UndefinedMode,
    error::Error,
    expression::FilteredExpression,
    parser::TemplateParser,
    token::Token,
    value::Value,
};
use futures::{FutureExt, future::BoxFuture};
use std::{collections::HashMap, sync::Arc};

/// How rendering a statement leaves the control flow. `break` and
/// `continue` propagate upward until the nearest enclosing loop consumes
/// them; at the template root they are no-ops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
}

/// A parsed template statement
#[derive(Clone, Debug)]
pub enum Statement {
    /// Literal template text, including the collapsed body of
    /// `{% raw %}` blocks
    Content { text: String },
    /// An output statement: `{{ expression }}`
    Output(OutputStatement),
    Assign(AssignTag),
    Capture(CaptureTag),
    Echo(EchoTag),
    Increment(IncrementTag),
    Decrement(DecrementTag),
    /// `if` and `unless`, which share a shape
    Conditional(ConditionalTag),
    Case(CaseTag),
    For(ForTag),
    TableRow(TableRowTag),
    Break(BreakTag),
    Continue(ContinueTag),
    Cycle(CycleTag),
    Doc(DocTag),
    Comment(CommentTag),
    Include(IncludeTag),
    Render(RenderTag),
    Extends(ExtendsTag),
    Block(BlockTag),
}

impl Statement {
    pub(crate) fn render<'a>(
        &'a self,
        ctx: &'a mut RenderContext<'_>,
        out: &'a mut Output,
    ) -> BoxFuture<'a, Result<Flow, Error>> {
        async move {
            // Statement boundaries double as cancellation points
            ctx.check_cancelled()?;
            match self {
                Self::Content { text } => {
                    out.write(text)?;
                    Ok(Flow::Normal)
                }
                Self::Output(output) => output.render(ctx, out),
                Self::Assign(tag) => tag.render(ctx),
                Self::Capture(tag) => tag.render(ctx).await,
                Self::Echo(tag) => tag.render(ctx, out),
                Self::Increment(tag) => tag.render(ctx, out),
                Self::Decrement(tag) => tag.render(ctx, out),
                Self::Conditional(tag) => tag.render(ctx, out).await,
                Self::Case(tag) => tag.render(ctx, out).await,
                Self::For(tag) => tag.render(ctx, out).await,
                Self::TableRow(tag) => tag.render(ctx, out).await,
                Self::Break(_) => Ok(Flow::Break),
                Self::Continue(_) => Ok(Flow::Continue),
                Self::Cycle(tag) => tag.render(ctx, out),
                // Docs and comments render nothing; `extends` is handled
                // at the template level and is inert mid-body
                Self::Doc(_) | Self::Comment(_) | Self::Extends(_) => {
                    Ok(Flow::Normal)
                }
                Self::Include(tag) => tag.render(ctx, out).await,
                Self::Render(tag) => tag.render(ctx, out).await,
                Self::Block(tag) => tag.render(ctx, out).await,
            }
        }
        .boxed()
    }

    /// Nested statement bodies, for static analysis
    pub fn children(&self) -> Vec<&[Statement]> {
        match self {
            Self::Content { .. }
            | Self::Output(_)
            | Self::Assign(_)
            | Self::Echo(_)
            | Self::Increment(_)
            | Self::Decrement(_)
            | Self::Break(_)
            | Self::Continue(_)
            | Self::Cycle(_)
            | Self::Doc(_)
            | Self::Comment(_)
            | Self::Include(_)
            | Self::Render(_)
            | Self::Extends(_) => Vec::new(),
            Self::Capture(tag) => vec![tag.body.as_slice()],
            Self::Conditional(tag) => {
                let mut bodies: Vec<&[Statement]> = tag
                    .branches
                    .iter()
                    .map(|branch| branch.body.as_slice())
                    .collect();
                if let Some(else_body) = &tag.else_body {
                    bodies.push(else_body);
                }
                bodies
            }
            Self::Case(tag) => {
                let mut bodies: Vec<&[Statement]> = tag
                    .whens
                    .iter()
                    .map(|when| when.body.as_slice())
                    .collect();
                if let Some(else_body) = &tag.else_body {
                    bodies.push(else_body);
                }
                bodies
            }
            Self::For(tag) => {
                let mut bodies = vec![tag.body.as_slice()];
                if let Some(else_body) = &tag.else_body {
                    bodies.push(else_body);
                }
                bodies
            }
            Self::TableRow(tag) => vec![tag.body.as_slice()],
            Self::Block(tag) => vec![tag.body.as_slice()],
        }
    }

    pub(crate) fn as_extends(&self) -> Option<&ExtendsTag> {
        match self {
            Self::Extends(tag) => Some(tag),
            _ => None,
        }
    }
}

/// Render a sequence of statements, applying the environment's tolerance
/// mode at each statement boundary. Recoverable errors elide the offending
/// statement's output in WARN/LAX modes; everything else aborts.
pub(crate) async fn render_block(
    statements: &[Statement],
    ctx: &mut RenderContext<'_>,
    out: &mut Output,
) -> Result<Flow, Error> {
    for statement in statements {
        match statement.render(ctx, out).await {
            Ok(Flow::Normal) => {}
            Ok(flow) => return Ok(flow),
            Err(error) => ctx.handle_error(error)?,
        }
    }
    Ok(Flow::Normal)
}

/// An output statement: evaluate, stringify, write
#[derive(Clone, Debug)]
pub struct OutputStatement {
    pub token: Token,
    pub expression: FilteredExpression,
}

impl OutputStatement {
    fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let value = self.expression.evaluate(ctx)?;
        write_value(&value, ctx, &self.token, out)?;
        Ok(Flow::Normal)
    }
}

/// Write a value's output form to the sink, honoring the undefined mode
/// and auto-escaping
pub(crate) fn write_value(
    value: &Value,
    ctx: &RenderContext<'_>,
    token: &Token,
    out: &mut Output,
) -> Result<(), Error> {
    // Output is a use of an undefined value: strict mode errors here
    ctx.assert_defined(value, token)?;

    let rendered = match (value, ctx.env().undefined) {
        (Value::Undefined(name), UndefinedMode::Debug) => {
            if name.is_empty() {
                "value is undefined".to_owned()
            } else {
                format!("'{name}' is undefined")
            }
        }
        _ => value.render_string(),
    };
    if ctx.env().autoescape {
        out.write(&html_escape::encode_text(&rendered))?;
    } else {
        out.write(&rendered)?;
    }
    Ok(())
}

/// A tag: a parser for one `{% name … %}` construct. Registered on the
/// environment during setup; the registry is read-only once parsing
/// starts.
pub trait Tag: Send + Sync {
    /// The name this tag answers to, e.g. `"if"`
    fn name(&self) -> &'static str;

    /// Parse this tag's statement. `token` is the already-consumed TAG
    /// token; the parser is positioned on whatever follows it (usually an
    /// EXPRESSION token). Block tags consume through their end tag via
    /// [TemplateParser::parse_block].
    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error>;
}

/// Name → tag mapping
pub type TagRegistry = HashMap<String, Arc<dyn Tag>>;

/// The built-in tag set every environment starts with
pub(crate) fn standard_registry() -> TagRegistry {
    let tags: Vec<Arc<dyn Tag>> = vec![
        Arc::new(assign::Assign),
        Arc::new(assign::Capture),
        Arc::new(assign::Echo),
        Arc::new(assign::Increment),
        Arc::new(assign::Decrement),
        Arc::new(comment::Comment),
        Arc::new(comment::InlineComment),
        Arc::new(control::If),
        Arc::new(control::Unless),
        Arc::new(control::Case),
        Arc::new(include::Include),
        Arc::new(include::Render),
        Arc::new(inherit::Block),
        Arc::new(inherit::Extends),
        Arc::new(iterate::For),
        Arc::new(iterate::TableRow),
        Arc::new(iterate::Break),
        Arc::new(iterate::Continue),
        Arc::new(iterate::Cycle),
    ];
    tags.into_iter()
        .map(|tag| (tag.name().to_owned(), tag))
        .collect()
}

/// Look up a property used by tags that read structured arguments, e.g.
/// the template name stem for `include … with`
pub(crate) fn template_stem(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.split('.').next().unwrap_or(base)
}
