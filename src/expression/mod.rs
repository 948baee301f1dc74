//! Expression syntax trees and their evaluation.
//!
//! Expressions use tagged variants rather than a node class hierarchy:
//! evaluation is one pattern match per node, and [Expression::children]
//! exposes child nodes for static analysis without walking concrete types.

pub(crate) mod lexer;
pub(crate) mod parser;

use crate::{
    context::RenderContext,
    error::Error,
    filter,
    token::Token,
    value::{RangeValue, Value, format_float},
};
use itertools::Itertools;
use std::fmt;

/// A word paired with the token it was parsed from, used for loop
/// variables, assignment targets and tag arguments
#[derive(Clone, Debug)]
pub struct Identifier {
    pub token: Token,
    pub name: String,
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A literal primitive value appearing in expression source
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Nil,
    Empty,
    Blank,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Literal {
    fn to_value(&self) -> Value {
        match self {
            Self::Nil => Value::Nil,
            Self::Empty => Value::Empty,
            Self::Blank => Value::Blank,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(f) => Value::Float(*f),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Empty => f.write_str("empty"),
            Self::Blank => f.write_str("blank"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(float) => f.write_str(&format_float(*float)),
            Self::String(s) => write!(f, "'{s}'"),
        }
    }
}

/// A comparison or membership operator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "contains",
        })
    }
}

/// One segment of a [Path]. Nested segments are full paths evaluated at
/// render time, e.g. the `b.c` in `a[b.c]`.
#[derive(Clone, Debug)]
pub enum Segment {
    Key(String),
    Index(i64),
    Nested(Path),
}

/// A nested-path segment after evaluation
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ResolvedSegment {
    Key(String),
    Index(i64),
}

/// A chain of segments resolving a value from the scope chain, e.g.
/// `product.images[0]["alt"]`
#[derive(Clone, Debug)]
pub struct Path {
    pub token: Token,
    pub segments: Vec<Segment>,
}

impl Path {
    pub(crate) fn evaluate(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Value, Error> {
        let mut resolved = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            resolved.push(match segment {
                Segment::Key(key) => ResolvedSegment::Key(key.clone()),
                Segment::Index(index) => ResolvedSegment::Index(*index),
                Segment::Nested(path) => {
                    match path.evaluate(ctx)? {
                        Value::String(key) => ResolvedSegment::Key(key),
                        Value::Int(index) => ResolvedSegment::Index(index),
                        value => {
                            return Err(Error::type_error(
                                format!(
                                    "path segments must be strings or \
                                     integers, found {}",
                                    value.type_name()
                                ),
                                Some(path.token.location()),
                            ));
                        }
                    }
                }
            });
        }
        Ok(ctx.get(&resolved, &self.token))
    }

    pub fn children(&self) -> Vec<&Expression> {
        Vec::new()
    }
}

/// Paths display in shorthand notation where possible: `a.b[0]['k k']`
impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{key}")?,
                Segment::Key(key) if is_shorthand_property(key) => {
                    write!(f, ".{key}")?;
                }
                Segment::Key(key) => write!(f, "['{key}']")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Nested(path) => write!(f, "[{path}]")?,
            }
        }
        Ok(())
    }
}

/// Can this key be displayed with dotted shorthand?
fn is_shorthand_property(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// A primitive, logical or comparison expression
#[derive(Clone, Debug)]
pub enum Expression {
    Literal {
        token: Token,
        value: Literal,
    },
    Path(Path),
    Range {
        token: Token,
        start: Box<Expression>,
        stop: Box<Expression>,
    },
    Not {
        token: Token,
        right: Box<Expression>,
    },
    And {
        token: Token,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Or {
        token: Token,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Compare {
        token: Token,
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    /// The token this expression was parsed from, used to locate errors
    pub fn token(&self) -> &Token {
        match self {
            Self::Literal { token, .. }
            | Self::Range { token, .. }
            | Self::Not { token, .. }
            | Self::And { token, .. }
            | Self::Or { token, .. }
            | Self::Compare { token, .. } => token,
            Self::Path(path) => &path.token,
        }
    }

    /// Child expressions, for static analysis
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Self::Literal { .. } | Self::Path(_) => Vec::new(),
            Self::Range { start, stop, .. } => vec![start, stop],
            Self::Not { right, .. } => vec![right],
            Self::And { left, right, .. }
            | Self::Or { left, right, .. }
            | Self::Compare { left, right, .. } => vec![left, right],
        }
    }

    pub(crate) fn evaluate(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Value, Error> {
        match self {
            Self::Literal { value, .. } => Ok(value.to_value()),
            Self::Path(path) => path.evaluate(ctx),
            Self::Range { start, stop, .. } => {
                // Range endpoints use the lenient integer coercion: parse
                // failures become 0 rather than errors
                let start = start.evaluate(ctx)?.to_int_lenient();
                let stop = stop.evaluate(ctx)?.to_int_lenient();
                Ok(Value::Range(RangeValue { start, stop }))
            }
            Self::Not { token, right } => {
                let right = right.evaluate(ctx)?;
                Ok(Value::Bool(!ctx.truthy(&right, token)?))
            }
            Self::And { token, left, right } => {
                let left = left.evaluate(ctx)?;
                let result = ctx.truthy(&left, token)? && {
                    let right = right.evaluate(ctx)?;
                    ctx.truthy(&right, token)?
                };
                Ok(Value::Bool(result))
            }
            Self::Or { token, left, right } => {
                let left = left.evaluate(ctx)?;
                let result = ctx.truthy(&left, token)? || {
                    let right = right.evaluate(ctx)?;
                    ctx.truthy(&right, token)?
                };
                Ok(Value::Bool(result))
            }
            Self::Compare {
                token,
                op,
                left,
                right,
            } => {
                let left = left.evaluate(ctx)?;
                let right = right.evaluate(ctx)?;
                evaluate_comparison(ctx, token, *op, &left, &right)
                    .map(Value::Bool)
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value, .. } => write!(f, "{value}"),
            Self::Path(path) => write!(f, "{path}"),
            Self::Range { start, stop, .. } => {
                write!(f, "({start}..{stop})")
            }
            Self::Not { right, .. } => write!(f, "not {right}"),
            Self::And { left, right, .. } => {
                write!(f, "{left} and {right}")
            }
            Self::Or { left, right, .. } => write!(f, "{left} or {right}"),
            Self::Compare {
                op, left, right, ..
            } => write!(f, "{left} {op} {right}"),
        }
    }
}

fn evaluate_comparison(
    ctx: &RenderContext<'_>,
    token: &Token,
    op: CompareOp,
    left: &Value,
    right: &Value,
) -> Result<bool, Error> {
    // A comparison counts as a use of an undefined value
    ctx.assert_defined(left, token)?;
    ctx.assert_defined(right, token)?;
    match op {
        CompareOp::Eq => Ok(left == right),
        CompareOp::Ne => Ok(left != right),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = left.try_compare(right).ok_or_else(|| {
                Error::type_error(
                    format!(
                        "'<' and '>' are not supported between '{}' and '{}'",
                        left.type_name(),
                        right.type_name()
                    ),
                    Some(token.location()),
                )
            })?;
            Ok(match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                _ => unreachable!("checked by the outer match"),
            })
        }
        CompareOp::Contains => left.contains(right).ok_or_else(|| {
            Error::type_error(
                format!(
                    "'contains' is not supported between '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ),
                Some(token.location()),
            )
        }),
    }
}

/// A filter applied in an expression: name plus unevaluated arguments
#[derive(Clone, Debug)]
pub struct FilterCall {
    pub token: Token,
    pub name: String,
    pub args: Vec<FilterArg>,
}

impl FilterCall {
    pub fn children(&self) -> Vec<&Expression> {
        self.args.iter().map(FilterArg::value).collect()
    }
}

impl fmt::Display for FilterCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(
                f,
                "{}: {}",
                self.name,
                self.args.iter().format(", ")
            )
        }
    }
}

/// A positional or keyword argument to a filter or tag
#[derive(Clone, Debug)]
pub enum FilterArg {
    Positional(Expression),
    Keyword {
        token: Token,
        name: String,
        value: Expression,
    },
}

impl FilterArg {
    /// The argument's value expression
    pub fn value(&self) -> &Expression {
        match self {
            Self::Positional(value) | Self::Keyword { value, .. } => value,
        }
    }

    /// The argument's keyword name, if it has one
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Positional(_) => None,
            Self::Keyword { name, .. } => Some(name),
        }
    }
}

impl fmt::Display for FilterArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positional(value) => write!(f, "{value}"),
            Self::Keyword { name, value, .. } => {
                write!(f, "{name}: {value}")
            }
        }
    }
}

/// The expression form used by output statements, `echo` and `assign`: a
/// primitive passed through a filter chain, optionally followed by a
/// ternary tail.
#[derive(Clone, Debug)]
pub struct FilteredExpression {
    pub left: Expression,
    pub filters: Vec<FilterCall>,
    pub ternary: Option<TernaryTail>,
}

/// The `if cond (else alt |filters)* (|| tail-filters)*` tail of a
/// conditional filtered expression
#[derive(Clone, Debug)]
pub struct TernaryTail {
    pub token: Token,
    pub condition: Expression,
    pub alternative: Option<Expression>,
    /// Filters applied only when the alternative is selected
    pub alternative_filters: Vec<FilterCall>,
    /// Filters after `||`, applied to whichever branch was selected
    pub tail_filters: Vec<FilterCall>,
}

impl FilteredExpression {
    pub(crate) fn evaluate(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Value, Error> {
        let Some(ternary) = &self.ternary else {
            let left = self.left.evaluate(ctx)?;
            return filter::apply(left, &self.filters, ctx);
        };

        let condition = ternary.condition.evaluate(ctx)?;
        let chosen = if ctx.truthy(&condition, &ternary.token)? {
            let left = self.left.evaluate(ctx)?;
            filter::apply(left, &self.filters, ctx)?
        } else {
            match &ternary.alternative {
                Some(alternative) => {
                    let value = alternative.evaluate(ctx)?;
                    filter::apply(value, &ternary.alternative_filters, ctx)?
                }
                None => Value::Undefined(String::new()),
            }
        };
        filter::apply(chosen, &ternary.tail_filters, ctx)
    }

    pub fn children(&self) -> Vec<&Expression> {
        let mut children = vec![&self.left];
        for filter in &self.filters {
            children.extend(filter.children());
        }
        if let Some(ternary) = &self.ternary {
            children.push(&ternary.condition);
            if let Some(alternative) = &ternary.alternative {
                children.push(alternative);
            }
            for filter in &ternary.alternative_filters {
                children.extend(filter.children());
            }
            for filter in &ternary.tail_filters {
                children.extend(filter.children());
            }
        }
        children
    }
}

impl fmt::Display for FilteredExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.left)?;
        for filter in &self.filters {
            write!(f, " | {filter}")?;
        }
        if let Some(ternary) = &self.ternary {
            write!(f, " if {}", ternary.condition)?;
            if let Some(alternative) = &ternary.alternative {
                write!(f, " else {alternative}")?;
                for filter in &ternary.alternative_filters {
                    write!(f, " | {filter}")?;
                }
            }
            if !ternary.tail_filters.is_empty() {
                write!(
                    f,
                    " || {}",
                    ternary.tail_filters.iter().format(" | ")
                )?;
            }
        }
        Ok(())
    }
}

/// The `name in iterable (limit/offset/cols/reversed)*` expression used by
/// `for` and `tablerow`
#[derive(Clone, Debug)]
pub struct LoopExpression {
    pub variable: Identifier,
    pub iterable: Expression,
    pub limit: Option<Expression>,
    pub offset: Option<LoopOffset>,
    pub cols: Option<Expression>,
    pub reversed: bool,
}

/// The `offset:` argument: an expression, or the special `continue` that
/// resumes from the previous loop over the same iterable
#[derive(Clone, Debug)]
pub enum LoopOffset {
    Expression(Expression),
    Continue,
}

impl LoopExpression {
    /// The stable identity key used to record and look up this loop's
    /// stop index for `offset: continue`
    pub(crate) fn identity_key(&self) -> String {
        format!("{}:{}", self.variable.name, self.iterable)
    }

    pub fn children(&self) -> Vec<&Expression> {
        let mut children = vec![&self.iterable];
        if let Some(limit) = &self.limit {
            children.push(limit);
        }
        if let Some(LoopOffset::Expression(offset)) = &self.offset {
            children.push(offset);
        }
        if let Some(cols) = &self.cols {
            children.push(cols);
        }
        children
    }
}

impl fmt::Display for LoopExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.variable, self.iterable)?;
        if let Some(limit) = &self.limit {
            write!(f, " limit: {limit}")?;
        }
        match &self.offset {
            Some(LoopOffset::Expression(offset)) => {
                write!(f, " offset: {offset}")?;
            }
            Some(LoopOffset::Continue) => write!(f, " offset: continue")?,
            None => {}
        }
        if let Some(cols) = &self.cols {
            write!(f, " cols: {cols}")?;
        }
        if self.reversed {
            write!(f, " reversed")?;
        }
        Ok(())
    }
}
