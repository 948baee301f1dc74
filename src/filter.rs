//! Filter invocation: the [Filter] trait, the typed argument helper handed
//! to implementations, and the standard filter library every environment
//! starts with.
//!
//! A filter receives its input by reference and pulls its arguments out of
//! a [FilterArgs] with the typed `pop` methods, then calls
//! [FilterArgs::ensure_consumed] so extra arguments surface as errors
//! instead of being ignored.

use crate::{
    context::RenderContext,
    environment::Environment,
    error::Error,
    expression::{FilterArg, FilterCall},
    token::Token,
    value::Value,
};
use indexmap::IndexMap;
use std::{cmp::Ordering, collections::HashMap, collections::VecDeque, sync::Arc};

/// A value-to-value transformation applied with `|` in an expression.
///
/// Implement directly for stateful filters, or wrap a plain function or
/// closure in [FilterFn].
pub trait Filter: Send + Sync {
    fn call(
        &self,
        input: &Value,
        args: &mut FilterArgs<'_>,
    ) -> Result<Value, Error>;

    /// Static argument validation, run at parse time once the filter name
    /// resolves. The default accepts anything.
    fn validate(
        &self,
        _env: &Environment,
        _token: &Token,
        _name: &str,
        _args: &[FilterArg],
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Adapter implementing [Filter] for a plain function or closure
pub struct FilterFn<F>(pub F);

impl<F> Filter for FilterFn<F>
where
    F: Fn(&Value, &mut FilterArgs<'_>) -> Result<Value, Error>
        + Send
        + Sync,
{
    fn call(
        &self,
        input: &Value,
        args: &mut FilterArgs<'_>,
    ) -> Result<Value, Error> {
        (self.0)(input, args)
    }
}

/// Name → filter mapping. Mutated during environment setup only; read-only
/// while rendering.
pub type FilterRegistry = HashMap<String, Arc<dyn Filter>>;

/// Evaluated arguments for one filter invocation, plus access to the
/// render context for filters that need it. Arguments are evaluated exactly
/// once, before the filter runs.
pub struct FilterArgs<'a> {
    filter: &'a str,
    token: &'a Token,
    ctx: &'a RenderContext<'a>,
    position: VecDeque<Value>,
    keyword: IndexMap<String, Value>,
    num_popped: usize,
}

impl<'a> FilterArgs<'a> {
    /// The environment this render draws configuration from
    pub fn env(&self) -> &Environment {
        self.ctx.env()
    }

    /// The active render context
    pub fn context(&self) -> &RenderContext<'a> {
        self.ctx
    }

    /// Pop the next required positional argument, converting it with `T`'s
    /// [FromValue] implementation
    pub fn pop<T: FromValue>(&mut self) -> Result<T, Error> {
        let index = self.num_popped;
        let value = self
            .position
            .pop_front()
            .ok_or_else(|| self.error("missing required argument"))?;
        self.num_popped += 1;
        T::from_value(value).map_err(|expected| {
            self.error(format!("argument {index}: expected {expected}"))
        })
    }

    /// Pop the next positional argument if one was given
    pub fn pop_optional<T: FromValue>(&mut self) -> Result<Option<T>, Error> {
        if self.position.is_empty() {
            return Ok(None);
        }
        self.pop().map(Some)
    }

    /// Remove a keyword argument by name, if it was given
    pub fn pop_keyword<T: FromValue>(
        &mut self,
        name: &str,
    ) -> Result<Option<T>, Error> {
        match self.keyword.shift_remove(name) {
            Some(value) => T::from_value(value)
                .map_err(|expected| {
                    self.error(format!("'{name}': expected {expected}"))
                })
                .map(Some),
            None => Ok(None),
        }
    }

    /// Error unless every provided argument was consumed
    pub fn ensure_consumed(&mut self) -> Result<(), Error> {
        if self.position.is_empty() && self.keyword.is_empty() {
            Ok(())
        } else {
            let extra = self.position.len() + self.keyword.len();
            Err(self.error(format!("too many arguments ({extra} extra)")))
        }
    }

    /// Build an argument error carrying this filter's name and location
    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::FilterArgument {
            filter: self.filter.to_owned(),
            message: message.into(),
            location: Some(self.token.location()),
        }
    }
}

/// Convert an evaluated [Value] into the static type a filter
/// implementation wants. Conversions are liquid-lenient: numbers accept
/// numeric strings, strings accept anything stringifiable.
pub trait FromValue: Sized {
    /// On failure, return a description of what was expected
    fn from_value(value: Value) -> Result<Self, String>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, String> {
        Ok(value)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, String> {
        Ok(value.render_string())
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, String> {
        Ok(value.is_truthy())
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, String> {
        value.to_int().map_err(|()| "an integer".to_owned())
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Int(i) => Ok(i as f64),
            Value::Float(f) => Ok(f),
            Value::String(s) => {
                s.trim().parse().map_err(|_| "a number".to_owned())
            }
            _ => Err("a number".to_owned()),
        }
    }
}

/// Run `value` through a filter chain, left to right
pub(crate) fn apply(
    mut value: Value,
    filters: &[FilterCall],
    ctx: &RenderContext<'_>,
) -> Result<Value, Error> {
    for call in filters {
        value = invoke(value, call, ctx)?;
    }
    Ok(value)
}

fn invoke(
    value: Value,
    call: &FilterCall,
    ctx: &RenderContext<'_>,
) -> Result<Value, Error> {
    let Some(filter) = ctx.filter(&call.name) else {
        if ctx.env().strict_filters {
            return Err(Error::UnknownFilter {
                name: call.name.clone(),
                location: Some(call.token.location()),
            });
        }
        // Unknown filters pass the input through untouched in lenient mode
        tracing::trace!(filter = %call.name, "skipping unknown filter");
        return Ok(value);
    };

    // Filter input counts as a use of an undefined value
    ctx.assert_defined(&value, &call.token)?;

    // Evaluate each argument exactly once, partitioned into positional and
    // keyword sets
    let mut position = VecDeque::new();
    let mut keyword = IndexMap::new();
    for arg in &call.args {
        let evaluated = arg.value().evaluate(ctx)?;
        match arg.name() {
            Some(name) => {
                keyword.insert(name.to_owned(), evaluated);
            }
            None => position.push_back(evaluated),
        }
    }

    let mut args = FilterArgs {
        filter: &call.name,
        token: &call.token,
        ctx,
        position,
        keyword,
        num_popped: 0,
    };
    filter
        .call(&value, &mut args)
        .map_err(|error| error.or_location(call.token.location()))
}

/// The standard filter library, registered into every new environment
pub(crate) fn standard_registry() -> FilterRegistry {
    fn add<F>(registry: &mut FilterRegistry, name: &str, filter: F)
    where
        F: Fn(&Value, &mut FilterArgs<'_>) -> Result<Value, Error>
            + Send
            + Sync
            + 'static,
    {
        registry.insert(name.to_owned(), Arc::new(FilterFn(filter)));
    }

    let mut registry = FilterRegistry::new();
    add(&mut registry, "abs", abs);
    add(&mut registry, "append", append);
    add(&mut registry, "capitalize", capitalize);
    add(&mut registry, "ceil", ceil);
    add(&mut registry, "compact", compact);
    add(&mut registry, "default", default);
    add(&mut registry, "divided_by", divided_by);
    add(&mut registry, "downcase", downcase);
    add(&mut registry, "escape", escape);
    add(&mut registry, "first", first);
    add(&mut registry, "floor", floor);
    add(&mut registry, "join", join);
    add(&mut registry, "last", last);
    add(&mut registry, "lstrip", lstrip);
    add(&mut registry, "map", map);
    add(&mut registry, "minus", minus);
    add(&mut registry, "modulo", modulo);
    add(&mut registry, "plus", plus);
    add(&mut registry, "prepend", prepend);
    add(&mut registry, "remove", remove);
    add(&mut registry, "replace", replace);
    add(&mut registry, "reverse", reverse);
    add(&mut registry, "round", round);
    add(&mut registry, "rstrip", rstrip);
    add(&mut registry, "size", size);
    add(&mut registry, "slice", slice);
    add(&mut registry, "sort", sort);
    add(&mut registry, "split", split);
    add(&mut registry, "strip", strip);
    add(&mut registry, "strip_newlines", strip_newlines);
    add(&mut registry, "sum", sum);
    add(&mut registry, "times", times);
    add(&mut registry, "uniq", uniq);
    add(&mut registry, "upcase", upcase);
    add(&mut registry, "where", where_);
    registry
}

/// A number in liquid's arithmetic model: ints stay ints until a float
/// enters the computation
#[derive(Clone, Copy, Debug)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// Lenient numeric coercion: numeric strings parse, anything else is 0
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(*f),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>().map(Self::Int).unwrap_or_else(|_| {
                    s.parse::<f64>().map(Self::Float).unwrap_or(Self::Int(0))
                })
            }
            _ => Self::Int(0),
        }
    }

    fn to_value(self) -> Value {
        match self {
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

/// Apply an int/float pair of operations with liquid's type promotion
fn arithmetic(
    left: &Value,
    right: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Value {
    match (Number::from_value(left), Number::from_value(right)) {
        (Number::Int(a), Number::Int(b)) => Value::Int(int_op(a, b)),
        (a, b) => Value::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

fn plus(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let right: Value = args.pop()?;
    args.ensure_consumed()?;
    Ok(arithmetic(input, &right, i64::wrapping_add, |a, b| a + b))
}

fn minus(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let right: Value = args.pop()?;
    args.ensure_consumed()?;
    Ok(arithmetic(input, &right, i64::wrapping_sub, |a, b| a - b))
}

fn times(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let right: Value = args.pop()?;
    args.ensure_consumed()?;
    Ok(arithmetic(input, &right, i64::wrapping_mul, |a, b| a * b))
}

fn divided_by(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    let right: Value = args.pop()?;
    args.ensure_consumed()?;
    match (Number::from_value(input), Number::from_value(&right)) {
        (_, Number::Int(0)) => Err(args.error("can't divide by zero")),
        // Integer division floors, like Ruby
        (Number::Int(a), Number::Int(b)) => Ok(Value::Int(a.div_euclid(b))),
        (a, b) => {
            let b = b.as_f64();
            if b == 0.0 {
                Err(args.error("can't divide by zero"))
            } else {
                Ok(Value::Float(a.as_f64() / b))
            }
        }
    }
}

fn modulo(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let right: Value = args.pop()?;
    args.ensure_consumed()?;
    match (Number::from_value(input), Number::from_value(&right)) {
        (_, Number::Int(0)) => Err(args.error("can't divide by zero")),
        (Number::Int(a), Number::Int(b)) => Ok(Value::Int(a.rem_euclid(b))),
        (a, b) => {
            let b = b.as_f64();
            if b == 0.0 {
                Err(args.error("can't divide by zero"))
            } else {
                Ok(Value::Float(a.as_f64().rem_euclid(b)))
            }
        }
    }
}

fn abs(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(match Number::from_value(input) {
        Number::Int(i) => Value::Int(i.wrapping_abs()),
        Number::Float(f) => Value::Float(f.abs()),
    })
}

fn ceil(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(Value::Int(Number::from_value(input).as_f64().ceil() as i64))
}

fn floor(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(Value::Int(Number::from_value(input).as_f64().floor() as i64))
}

fn round(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let digits: Option<i64> = args.pop_optional()?;
    args.ensure_consumed()?;
    let number = Number::from_value(input).as_f64();
    Ok(match digits {
        None | Some(0) => Value::Int(number.round() as i64),
        Some(digits) => {
            let factor = 10_f64.powi(digits as i32);
            Value::Float((number * factor).round() / factor)
        }
    })
}

fn upcase(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(input.render_string().to_uppercase().into())
}

fn downcase(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(input.render_string().to_lowercase().into())
}

fn capitalize(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    args.ensure_consumed()?;
    let s = input.render_string();
    let mut chars = s.chars();
    let capitalized = match chars.next() {
        Some(c) => {
            c.to_uppercase().collect::<String>()
                + &chars.as_str().to_lowercase()
        }
        None => String::new(),
    };
    Ok(capitalized.into())
}

fn append(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let suffix: String = args.pop()?;
    args.ensure_consumed()?;
    Ok((input.render_string() + &suffix).into())
}

fn prepend(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    let prefix: String = args.pop()?;
    args.ensure_consumed()?;
    Ok((prefix + &input.render_string()).into())
}

fn strip(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(input.render_string().trim().into())
}

fn lstrip(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(input.render_string().trim_start().into())
}

fn rstrip(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(input.render_string().trim_end().into())
}

fn strip_newlines(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    args.ensure_consumed()?;
    let stripped: String = input
        .render_string()
        .chars()
        .filter(|&c| c != '\n' && c != '\r')
        .collect();
    Ok(stripped.into())
}

fn replace(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    let from: String = args.pop()?;
    let to: String = args.pop()?;
    args.ensure_consumed()?;
    Ok(input.render_string().replace(&from, &to).into())
}

fn remove(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let needle: String = args.pop()?;
    args.ensure_consumed()?;
    Ok(input.render_string().replace(&needle, "").into())
}

fn split(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let separator: String = args.pop()?;
    args.ensure_consumed()?;
    let s = input.render_string();
    if s.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let parts: Vec<Value> = if separator.is_empty() {
        s.chars().map(|c| c.to_string().into()).collect()
    } else {
        s.split(&separator).map(Value::from).collect()
    };
    Ok(Value::Array(parts))
}

fn escape(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(
        html_escape::encode_double_quoted_attribute(&input.render_string())
            .into_owned()
            .into(),
    )
}

fn size(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(Value::Int(input.size().unwrap_or(0)))
}

fn first(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(match input {
        Value::Array(items) => items.first().cloned().unwrap_or_default(),
        Value::String(s) => s
            .chars()
            .next()
            .map(|c| c.to_string().into())
            .unwrap_or_default(),
        Value::Range(range) if !range.is_empty() => Value::Int(range.start),
        _ => Value::Nil,
    })
}

fn last(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    Ok(match input {
        Value::Array(items) => items.last().cloned().unwrap_or_default(),
        Value::String(s) => s
            .chars()
            .next_back()
            .map(|c| c.to_string().into())
            .unwrap_or_default(),
        Value::Range(range) if !range.is_empty() => Value::Int(range.stop),
        _ => Value::Nil,
    })
}

fn join(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let separator: Option<String> = args.pop_optional()?;
    args.ensure_consumed()?;
    let separator = separator.unwrap_or_else(|| " ".to_owned());
    let joined = match input.iter_items() {
        Some(items) => items
            .iter()
            .map(Value::render_string)
            .collect::<Vec<_>>()
            .join(&separator),
        None => input.render_string(),
    };
    Ok(joined.into())
}

fn reverse(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    args.ensure_consumed()?;
    match input {
        Value::Array(items) => {
            Ok(Value::Array(items.iter().rev().cloned().collect()))
        }
        Value::Range(range) => {
            Ok(Value::Array(range.iter().rev().map(Value::Int).collect()))
        }
        _ => Ok(input.clone()),
    }
}

fn sort(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let key: Option<String> = args.pop_optional()?;
    args.ensure_consumed()?;
    let Some(mut items) = input.iter_items() else {
        return Ok(input.clone());
    };
    items.sort_by(|a, b| {
        let (a, b) = match &key {
            Some(key) => (property(a, key), property(b, key)),
            None => (a.clone(), b.clone()),
        };
        a.try_compare(&b).unwrap_or(Ordering::Equal)
    });
    Ok(Value::Array(items))
}

fn uniq(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    args.ensure_consumed()?;
    let Some(items) = input.iter_items() else {
        return Ok(input.clone());
    };
    let mut unique: Vec<Value> = Vec::new();
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    Ok(Value::Array(unique))
}

fn compact(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    args.ensure_consumed()?;
    let Some(items) = input.iter_items() else {
        return Ok(input.clone());
    };
    Ok(Value::Array(
        items
            .into_iter()
            .filter(|item| {
                !matches!(item, Value::Nil | Value::Undefined(_))
            })
            .collect(),
    ))
}

fn map(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let key: String = args.pop()?;
    args.ensure_consumed()?;
    let items = input
        .iter_items()
        .ok_or_else(|| args.error("input is not a sequence"))?;
    Ok(Value::Array(
        items.iter().map(|item| property(item, &key)).collect(),
    ))
}

fn where_(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let key: String = args.pop()?;
    let expected: Option<Value> = args.pop_optional()?;
    args.ensure_consumed()?;
    let items = input
        .iter_items()
        .ok_or_else(|| args.error("input is not a sequence"))?;
    Ok(Value::Array(
        items
            .into_iter()
            .filter(|item| {
                let actual = property(item, &key);
                match &expected {
                    Some(expected) => &actual == expected,
                    None => actual.is_truthy(),
                }
            })
            .collect(),
    ))
}

fn sum(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let key: Option<String> = args.pop_optional()?;
    args.ensure_consumed()?;
    let items = input
        .iter_items()
        .ok_or_else(|| args.error("input is not a sequence"))?;
    let mut total = Number::Int(0);
    for item in &items {
        let value = match &key {
            Some(key) => property(item, key),
            None => item.clone(),
        };
        total = match (total, Number::from_value(&value)) {
            (Number::Int(a), Number::Int(b)) => {
                Number::Int(a.wrapping_add(b))
            }
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        };
    }
    Ok(total.to_value())
}

fn slice(input: &Value, args: &mut FilterArgs<'_>) -> Result<Value, Error> {
    let offset: i64 = args.pop()?;
    let length: Option<i64> = args.pop_optional()?;
    args.ensure_consumed()?;
    let length = length.unwrap_or(1).max(0) as usize;

    fn bounds(offset: i64, length: usize, len: usize) -> (usize, usize) {
        let start = if offset < 0 {
            len.saturating_sub(offset.unsigned_abs() as usize)
        } else {
            (offset as usize).min(len)
        };
        (start, (start + length).min(len))
    }

    match input {
        Value::Array(items) => {
            let (start, end) = bounds(offset, length, items.len());
            Ok(Value::Array(items[start..end].to_vec()))
        }
        _ => {
            let chars: Vec<char> = input.render_string().chars().collect();
            let (start, end) = bounds(offset, length, chars.len());
            Ok(chars[start..end].iter().collect::<String>().into())
        }
    }
}

fn default(
    input: &Value,
    args: &mut FilterArgs<'_>,
) -> Result<Value, Error> {
    let fallback: Value = args.pop()?;
    let allow_false =
        args.pop_keyword::<bool>("allow_false")?.unwrap_or(false);
    args.ensure_consumed()?;
    let use_fallback = match input {
        Value::Nil | Value::Undefined(_) => true,
        Value::Bool(false) => !allow_false,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(object) => object.is_empty(),
        _ => false,
    };
    Ok(if use_fallback {
        fallback
    } else {
        input.clone()
    })
}

/// Resolve a property by name on a mapping or drop, for the array filters
/// that project over object sequences
fn property(item: &Value, key: &str) -> Value {
    match item {
        Value::Object(object) => object.get(key).cloned().unwrap_or_default(),
        Value::Drop(drop) => drop.get(key).unwrap_or_default(),
        _ => Value::Nil,
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::{assert_err, render};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::plus_ints("{{ 1 | plus: 2 }}", "3")]
    #[case::plus_float("{{ 1 | plus: 2.5 }}", "3.5")]
    #[case::plus_string_coercion("{{ '3' | plus: '4' }}", "7")]
    #[case::minus("{{ 10 | minus: 2 }}", "8")]
    #[case::times("{{ 3 | times: 4 }}", "12")]
    #[case::divided_by_int("{{ 7 | divided_by: 2 }}", "3")]
    #[case::divided_by_negative("{{ -7 | divided_by: 2 }}", "-4")]
    #[case::divided_by_float("{{ 7 | divided_by: 2.0 }}", "3.5")]
    #[case::modulo("{{ 7 | modulo: 3 }}", "1")]
    #[case::modulo_negative("{{ -7 | modulo: 3 }}", "2")]
    #[case::abs("{{ -5 | abs }}", "5")]
    #[case::ceil("{{ 1.2 | ceil }}", "2")]
    #[case::floor("{{ 1.8 | floor }}", "1")]
    #[case::round("{{ 2.7 | round }}", "3")]
    #[case::round_digits("{{ 2.7156 | round: 2 }}", "2.72")]
    #[case::nonsense_is_zero("{{ 'banana' | plus: 1 }}", "1")]
    fn test_math_filters(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(render(template, json!({})).unwrap(), expected);
    }

    #[rstest]
    #[case::upcase("{{ 'hello' | upcase }}", "HELLO")]
    #[case::downcase("{{ 'HELLO' | downcase }}", "hello")]
    #[case::capitalize("{{ 'hello WORLD' | capitalize }}", "Hello world")]
    #[case::append("{{ 'foo' | append: 'bar' }}", "foobar")]
    #[case::append_coerces("{{ 5 | append: '!' }}", "5!")]
    #[case::prepend("{{ 'bar' | prepend: 'foo' }}", "foobar")]
    #[case::strip("{{ '  x  ' | strip }}", "x")]
    #[case::lstrip("{{ '  x  ' | lstrip }}", "x  ")]
    #[case::rstrip("{{ '  x  ' | rstrip }}", "  x")]
    #[case::strip_newlines("{{ 'a\nb\r\nc' | strip_newlines }}", "abc")]
    #[case::replace("{{ 'aXbX' | replace: 'X', '-' }}", "a-b-")]
    #[case::remove("{{ 'aXbX' | remove: 'X' }}", "ab")]
    #[case::escape(
        "{{ '<a href=\"x\">' | escape }}",
        "&lt;a href=&quot;x&quot;&gt;"
    )]
    #[case::slice_string("{{ 'liquid' | slice: 2, 3 }}", "qui")]
    #[case::slice_negative("{{ 'liquid' | slice: -2, 2 }}", "id")]
    fn test_string_filters(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(render(template, json!({})).unwrap(), expected);
    }

    #[rstest]
    #[case::size_array("{{ a | size }}", "4")]
    #[case::first("{{ a | first }}", "3")]
    #[case::last("{{ a | last }}", "2")]
    #[case::join("{{ a | join: '-' }}", "3-1-8-2")]
    #[case::join_default_separator("{{ a | join }}", "3 1 8 2")]
    #[case::reverse("{{ a | reverse | join: ',' }}", "2,8,1,3")]
    #[case::sort("{{ a | sort | join: ',' }}", "1,2,3,8")]
    #[case::slice_array("{{ a | slice: 1, 2 | join: ',' }}", "1,8")]
    #[case::sum("{{ a | sum }}", "14")]
    fn test_array_filters(#[case] template: &str, #[case] expected: &str) {
        let globals = json!({"a": [3, 1, 8, 2]});
        assert_eq!(render(template, globals).unwrap(), expected);
    }

    #[test]
    fn test_split_and_chars() {
        assert_eq!(
            render("{{ 'a,b,c' | split: ',' | join: '|' }}", json!({}))
                .unwrap(),
            "a|b|c"
        );
        assert_eq!(
            render("{{ 'abc' | split: '' | join: '-' }}", json!({}))
                .unwrap(),
            "a-b-c"
        );
        assert_eq!(
            render("{{ '' | split: ',' | size }}", json!({})).unwrap(),
            "0"
        );
    }

    #[test]
    fn test_object_sequence_filters() {
        let globals = json!({"products": [
            {"title": "Shirt", "available": true, "price": 20},
            {"title": "Mug", "available": false, "price": 10},
            {"title": "Hat", "available": true, "price": 15},
        ]});
        assert_eq!(
            render(
                "{{ products | map: 'title' | join: ', ' }}",
                globals.clone()
            )
            .unwrap(),
            "Shirt, Mug, Hat"
        );
        assert_eq!(
            render(
                "{{ products | where: 'available' | map: 'title' \
                 | join: ', ' }}",
                globals.clone()
            )
            .unwrap(),
            "Shirt, Hat"
        );
        assert_eq!(
            render(
                "{{ products | where: 'title', 'Mug' | map: 'price' }}",
                globals.clone()
            )
            .unwrap(),
            "10"
        );
        assert_eq!(
            render(
                "{{ products | sort: 'price' | map: 'title' | join: ',' }}",
                globals
            )
            .unwrap(),
            "Mug,Hat,Shirt"
        );
    }

    #[test]
    fn test_uniq_and_compact() {
        assert_eq!(
            render("{{ a | uniq | join: ',' }}", json!({"a": [1, 2, 1, 3, 2]}))
                .unwrap(),
            "1,2,3"
        );
        assert_eq!(
            render(
                "{{ a | compact | join: ',' }}",
                json!({"a": [1, null, 2, null]})
            )
            .unwrap(),
            "1,2"
        );
    }

    #[rstest]
    #[case::nil_input("{{ missing | default: 'fallback' }}", "fallback")]
    #[case::empty_string("{{ '' | default: 'fallback' }}", "fallback")]
    #[case::false_input("{{ false | default: 'fallback' }}", "fallback")]
    #[case::false_allowed(
        "{{ false | default: 'fallback', allow_false: true }}",
        "false"
    )]
    #[case::present_value("{{ 'here' | default: 'fallback' }}", "here")]
    #[case::zero_is_present("{{ 0 | default: 'fallback' }}", "0")]
    fn test_default_filter(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(render(template, json!({})).unwrap(), expected);
    }

    #[rstest]
    #[case::missing_argument(
        "{{ 'a' | append }}",
        "append: missing required argument"
    )]
    #[case::too_many_arguments(
        "{{ 'a' | upcase: 1 }}",
        "upcase: too many arguments"
    )]
    #[case::divide_by_zero(
        "{{ 1 | divided_by: 0 }}",
        "divided_by: can't divide by zero"
    )]
    #[case::map_non_sequence(
        "{{ 5 | map: 'title' }}",
        "map: input is not a sequence"
    )]
    fn test_filter_argument_errors(
        #[case] template: &str,
        #[case] expected: &str,
    ) {
        assert_err!(render(template, json!({})), expected);
    }

    #[test]
    fn test_unknown_filter_is_an_error_by_default() {
        assert_err!(
            render("{{ 'a' | nope }}", json!({})),
            "unknown filter 'nope'"
        );
    }
}
