//! Per-render state: the scope chain, counters, resource limits and the
//! output sink.
//!
//! A [RenderContext] is owned by exactly one rendering and never shared.
//! The parsed template it walks is immutable, so all mutation during a
//! render happens here.

use crate::{
    environment::{Environment, Mode, UndefinedMode},
    error::Error,
    expression::ResolvedSegment,
    filter::{Filter, FilterRegistry},
    tag::Statement,
    token::Token,
    value::{Object, Value},
};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;

pub struct RenderContext<'env> {
    env: &'env Environment,
    /// The scope chain, innermost scope last. Index 0 holds globals (the
    /// environment's plus the caller's), index 1 the template-local
    /// namespace that `assign` and `capture` write to. Frames above that
    /// are pushed by `for`, `include` and friends.
    scopes: Vec<Object>,
    /// `increment`/`decrement` counters, a namespace of their own
    counters: HashMap<String, i64>,
    /// Next index per `cycle` key
    cycles: HashMap<String, usize>,
    /// Stop indexes recorded by finished loops, for `offset: continue`
    stop_indexes: HashMap<String, usize>,
    /// Nesting depth from `include`/`render`/inheritance
    depth: usize,
    /// Total loop iterations so far, summed across nested and included
    /// loops
    loop_count: usize,
    cancel: CancellationToken,
    template_name: Option<String>,
    /// Filters available to this render only, layered over the
    /// environment's registry
    extra_filters: FilterRegistry,
    /// Block bodies collected from child templates during inheritance;
    /// the childmost override wins
    block_overrides: HashMap<String, Arc<Vec<Statement>>>,
}

impl<'env> RenderContext<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        globals: Object,
        cancel: CancellationToken,
        template_name: Option<String>,
    ) -> Self {
        let mut root = env.globals.clone();
        root.extend(globals);
        Self {
            env,
            scopes: vec![root, Object::new()],
            counters: HashMap::new(),
            cycles: HashMap::new(),
            stop_indexes: HashMap::new(),
            depth: 0,
            loop_count: 0,
            cancel,
            template_name,
            extra_filters: FilterRegistry::new(),
            block_overrides: HashMap::new(),
        }
    }

    pub fn env(&self) -> &'env Environment {
        self.env
    }

    /// Resolve a path against the scope chain. Lookups never fail; a miss
    /// at any point produces an `undefined` carrying the path text, and
    /// the strict-undefined mode decides later whether using it is an
    /// error.
    pub(crate) fn get(
        &self,
        segments: &[ResolvedSegment],
        _token: &Token,
    ) -> Value {
        let undefined =
            || Value::Undefined(display_segments(segments));

        let Some(ResolvedSegment::Key(first)) = segments.first() else {
            return undefined();
        };
        let Some(mut value) = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(first))
            .cloned()
        else {
            return undefined();
        };

        for segment in &segments[1..] {
            match descend(&value, segment) {
                Some(next) => value = next,
                None => return undefined(),
            }
        }
        value
    }

    /// Look up a plain name in the scope chain
    pub(crate) fn resolve(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Truthiness of a value, erroring on strict-undefined use
    pub(crate) fn truthy(
        &self,
        value: &Value,
        token: &Token,
    ) -> Result<bool, Error> {
        self.assert_defined(value, token)?;
        Ok(value.is_truthy())
    }

    /// In strict-undefined mode, using an undefined value is an error
    pub(crate) fn assert_defined(
        &self,
        value: &Value,
        token: &Token,
    ) -> Result<(), Error> {
        if self.env.undefined == UndefinedMode::Strict
            && let Value::Undefined(name) = value
        {
            let subject = if name.is_empty() {
                "value".to_owned()
            } else {
                format!("'{name}'")
            };
            return Err(Error::type_error(
                format!("{subject} is undefined"),
                Some(token.location()),
            ));
        }
        Ok(())
    }

    /// Write to the template-local namespace, as `assign` and `capture`
    /// do, then enforce the namespace byte limit
    pub(crate) fn assign(
        &mut self,
        name: &str,
        value: Value,
    ) -> Result<(), Error> {
        self.scopes[1].insert(name.to_owned(), value);
        self.check_namespace_limit()
    }

    fn check_namespace_limit(&self) -> Result<(), Error> {
        let Some(limit) = self.env.local_namespace_limit else {
            return Ok(());
        };
        let used: usize = self.scopes[1]
            .values()
            .map(Value::size_estimate)
            .sum();
        if used > limit {
            Err(Error::LocalNamespaceLimit { limit })
        } else {
            Ok(())
        }
    }

    pub(crate) fn push_scope(&mut self, scope: Object) {
        self.scopes.push(scope);
    }

    pub(crate) fn pop_scope(&mut self) {
        // The global and template-local scopes are permanent
        if self.scopes.len() > 2 {
            self.scopes.pop();
        }
    }

    /// Write into the innermost scope, e.g. a loop variable update
    pub(crate) fn set_local(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), value);
        }
    }

    /// Current value of an `increment` counter: returns the value before
    /// incrementing, starting at zero
    pub(crate) fn increment(&mut self, name: &str) -> i64 {
        let counter = self.counters.entry(name.to_owned()).or_insert(0);
        let value = *counter;
        *counter += 1;
        value
    }

    /// `decrement` steps down first, so the first call yields -1
    pub(crate) fn decrement(&mut self, name: &str) -> i64 {
        let counter = self.counters.entry(name.to_owned()).or_insert(0);
        *counter -= 1;
        *counter
    }

    /// Next index in the cycle identified by `key`
    pub(crate) fn cycle(&mut self, key: &str, length: usize) -> usize {
        let counter = self.cycles.entry(key.to_owned()).or_insert(0);
        let index = *counter % length.max(1);
        *counter += 1;
        index
    }

    pub(crate) fn stop_index(&self, key: &str) -> usize {
        self.stop_indexes.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn set_stop_index(&mut self, key: &str, index: usize) {
        self.stop_indexes.insert(key.to_owned(), index);
    }

    /// Record one loop iteration and enforce the per-render iteration
    /// limit
    pub(crate) fn tick_loop(&mut self) -> Result<(), Error> {
        self.loop_count += 1;
        match self.env.loop_iteration_limit {
            Some(limit) if self.loop_count > limit => {
                Err(Error::LoopIterationLimit { limit })
            }
            _ => Ok(()),
        }
    }

    /// Error if the render's cancellation token has fired. Checked at
    /// statement boundaries, which are also the suspension points of the
    /// async walker.
    pub(crate) fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Step into a nested template (`include` or inheritance), enforcing
    /// the context depth limit. Pair with [Self::exit_nested].
    pub(crate) fn enter_nested(&mut self, token: &Token) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > self.env.context_depth_limit {
            return Err(Error::ContextDepth {
                limit: self.env.context_depth_limit,
                location: Some(token.location()),
            });
        }
        Ok(())
    }

    pub(crate) fn exit_nested(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Build the isolated context used by the `render` tag: globals only,
    /// fresh counters and locals, but depth and the loop-iteration total
    /// carry over. The caller copies the loop total back with
    /// [Self::absorb_child] afterwards.
    pub(crate) fn isolated(
        &self,
        token: &Token,
        template_name: Option<String>,
    ) -> Result<RenderContext<'env>, Error> {
        if self.depth + 1 > self.env.context_depth_limit {
            return Err(Error::ContextDepth {
                limit: self.env.context_depth_limit,
                location: Some(token.location()),
            });
        }
        Ok(RenderContext {
            env: self.env,
            scopes: vec![self.scopes[0].clone(), Object::new()],
            counters: HashMap::new(),
            cycles: HashMap::new(),
            stop_indexes: HashMap::new(),
            depth: self.depth + 1,
            loop_count: self.loop_count,
            cancel: self.cancel.clone(),
            template_name,
            extra_filters: FilterRegistry::new(),
            block_overrides: HashMap::new(),
        })
    }

    /// Copy accumulated resource counts back from an isolated child
    /// context
    pub(crate) fn absorb_child(&mut self, child: &RenderContext<'_>) {
        self.loop_count = child.loop_count;
    }

    /// Look up a filter: render-scoped additions first, then the
    /// environment registry
    pub(crate) fn filter(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.extra_filters
            .get(name)
            .or_else(|| self.env.filters.get(name))
            .map(Arc::clone)
    }

    /// Register a filter for this render only
    pub fn add_filter(
        &mut self,
        name: impl Into<String>,
        filter: Arc<dyn Filter>,
    ) {
        self.extra_filters.insert(name.into(), filter);
    }

    /// Apply the environment's tolerance mode to a render-time error.
    /// `Ok(())` means the offending output should be elided and rendering
    /// continues.
    pub(crate) fn handle_error(&self, error: Error) -> Result<(), Error> {
        if !error.is_recoverable() {
            return Err(error);
        }
        match self.env.mode {
            Mode::Strict => Err(error),
            Mode::Warn => {
                tracing::warn!(
                    template = self.template_name.as_deref(),
                    "{}",
                    error.detail()
                );
                Ok(())
            }
            Mode::Lax => Ok(()),
        }
    }

    /// The block body that overrides `name`, if a child template supplied
    /// one
    pub(crate) fn block_override(
        &self,
        name: &str,
    ) -> Option<Arc<Vec<Statement>>> {
        self.block_overrides.get(name).map(Arc::clone)
    }

    /// Record a child template's blocks. Existing entries are kept: the
    /// childmost template registered first and wins.
    pub(crate) fn add_block_override(
        &mut self,
        name: String,
        body: Arc<Vec<Statement>>,
    ) {
        self.block_overrides.entry(name).or_insert(body);
    }
}

/// Descend one segment into a value. `None` means the lookup missed.
fn descend(value: &Value, segment: &ResolvedSegment) -> Option<Value> {
    match (value, segment) {
        (Value::Object(object), ResolvedSegment::Key(key)) => {
            object.get(key).cloned().or_else(|| {
                special_sequence_name(value, key)
            })
        }
        // Integer segments address mappings whose keys happen to be
        // numeric strings
        (Value::Object(object), ResolvedSegment::Index(index)) => {
            object.get(&index.to_string()).cloned()
        }
        (Value::Array(items), ResolvedSegment::Index(index)) => {
            let index = normalize_index(*index, items.len())?;
            items.get(index).cloned()
        }
        (Value::Array(_) | Value::String(_) | Value::Range(_), ResolvedSegment::Key(key)) => {
            special_sequence_name(value, key)
        }
        (Value::Drop(drop), ResolvedSegment::Key(key)) => {
            drop.get(key).or_else(|| {
                (key == "size").then(|| drop.size().map(Value::Int)).flatten()
            })
        }
        (Value::Drop(drop), ResolvedSegment::Index(index)) => {
            drop.get(&index.to_string())
        }
        _ => None,
    }
}

/// The special `first`/`last`/`size` names honored on sequence-like values
fn special_sequence_name(value: &Value, name: &str) -> Option<Value> {
    match name {
        "size" => value.size().map(Value::Int),
        "first" => match value {
            Value::Array(items) => items.first().cloned(),
            Value::Range(range) if !range.is_empty() => {
                Some(Value::Int(range.start))
            }
            _ => None,
        },
        "last" => match value {
            Value::Array(items) => items.last().cloned(),
            Value::Range(range) if !range.is_empty() => {
                Some(Value::Int(range.stop))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Map a possibly negative index onto a sequence of the given length
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    if index < 0 {
        len.checked_sub(index.unsigned_abs() as usize)
    } else {
        Some(index as usize)
    }
}

fn display_segments(segments: &[ResolvedSegment]) -> String {
    use std::fmt::Write;

    let mut buf = String::new();
    for (i, segment) in segments.iter().enumerate() {
        match segment {
            ResolvedSegment::Key(key) if i == 0 => buf.push_str(key),
            ResolvedSegment::Key(key) => {
                buf.push('.');
                buf.push_str(key);
            }
            ResolvedSegment::Index(index) => {
                let _ = write!(buf, "[{index}]");
            }
        }
    }
    buf
}

/// The render output sink: an in-memory buffer enforcing the environment's
/// output byte limit. A write that would exceed the limit fails without
/// appending, so at most `limit` bytes are ever produced.
#[derive(Debug)]
pub(crate) struct Output {
    buf: String,
    limit: Option<usize>,
}

impl Output {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    /// An unlimited buffer for `capture` bodies; captured text counts
    /// against the namespace limit on assignment instead
    pub(crate) fn unlimited() -> Self {
        Self::new(None)
    }

    pub(crate) fn write(&mut self, s: &str) -> Result<(), Error> {
        if let Some(limit) = self.limit
            && self.buf.len() + s.len() > limit
        {
            return Err(Error::OutputStreamLimit { limit });
        }
        self.buf.push_str(s);
        Ok(())
    }

    pub(crate) fn into_string(self) -> String {
        self.buf
    }
}
