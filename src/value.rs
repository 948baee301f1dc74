//! Runtime template values and the comparison rules between them

use derive_more::From;
use indexmap::IndexMap;
use std::{borrow::Cow, cmp::Ordering, fmt, fmt::Debug, sync::Arc};

/// Mapping values preserve the order keys were inserted in, so iterating an
/// object in a `for` loop matches authoring order
pub type Object = IndexMap<String, Value>;

/// Maximum recursion depth for equality and stringification, guarding
/// against cyclic values built from self-referencing drops. Beyond the cap
/// equality falls back to identity (i.e. not equal) and stringification
/// produces an ellipsis.
const MAX_DEPTH: usize = 64;

/// A host-provided object exposed to templates through a narrow, safe
/// surface. Every capability is optional; the default implementation is an
/// opaque value that renders as nothing and has no attributes.
pub trait ObjectDrop: Debug + Send + Sync {
    /// Reduce this drop to a plain value. Equality and truthiness call this
    /// once before comparing.
    fn coerce(&self) -> Option<Value> {
        None
    }

    /// Resolve an attribute by name
    fn get(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Number of elements, honored by the special `size` attribute and the
    /// `size` filter
    fn size(&self) -> Option<i64> {
        None
    }

    /// Expand to a sequence for iteration by `for`/`tablerow`
    fn iterate(&self) -> Option<Vec<Value>> {
        None
    }
}

/// An inclusive integer range produced by a range literal such as `(1..5)`.
/// A range whose start is greater than its stop is empty.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        if self.start > self.stop {
            0
        } else {
            (self.stop - self.start + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.stop
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<i64> {
        self.start..=self.stop
    }
}

/// A runtime template value: the union of everything an expression can
/// evaluate to.
///
/// Equality between values follows Liquid's rules rather than Rust's
/// structural defaults: `nil` equals `undefined`, `empty` equals any empty
/// string/sequence/mapping, booleans never equal numbers, and `1 == 1.0`.
/// See the `PartialEq` impl.
#[derive(Clone, Debug, Default, From)]
pub enum Value {
    #[default]
    Nil,
    /// The result of a failed lookup. Carries the path that missed, for
    /// error messages and debug output.
    #[from(skip)]
    Undefined(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Range(RangeValue),
    #[from(skip)]
    Array(Vec<Value>),
    #[from(skip)]
    Object(Object),
    /// The `empty` sentinel
    Empty,
    /// The `blank` sentinel
    Blank,
    #[from(skip)]
    Drop(Arc<dyn ObjectDrop>),
}

impl Value {
    /// A short name for this value's type, used in type-error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Undefined(_) => "undefined",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Range(_) => "range",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Empty => "empty",
            Self::Blank => "blank",
            Self::Drop(_) => "drop",
        }
    }

    /// Apply drop coercion: if this is a drop with a coercion hook, the
    /// coerced value, otherwise the value itself. Called once before
    /// equality and truthiness tests.
    fn coerced(&self) -> Cow<'_, Self> {
        if let Self::Drop(drop) = self
            && let Some(value) = drop.coerce()
        {
            return Cow::Owned(value);
        }
        Cow::Borrowed(self)
    }

    /// Liquid truthiness: everything is truthy except `false`, `nil` and
    /// `undefined`. Zero, empty strings and empty collections are all
    /// truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(
            &*self.coerced(),
            Self::Bool(false) | Self::Nil | Self::Undefined(_)
        )
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined(_))
    }

    /// Total ordering per Liquid's `<`/`>` rules: strings compare
    /// lexicographically, numbers compare numerically across int/float.
    /// `None` for any other combination, including booleans.
    pub fn try_compare(&self, other: &Self) -> Option<Ordering> {
        let left = self.coerced();
        let right = other.coerced();
        match (&*left, &*right) {
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (a, b) => {
                let a = a.as_number()?;
                let b = b.as_number()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// Membership test per Liquid's `contains` operator. Strings test for a
    /// substring (the right side is stringified first); sequences test
    /// membership under Liquid equality. `None` for anything else,
    /// including mappings and ranges.
    pub fn contains(&self, other: &Self) -> Option<bool> {
        match self {
            Self::String(s) => Some(s.contains(&other.render_string())),
            Self::Array(items) => Some(items.iter().any(|item| item == other)),
            Self::Drop(drop) => {
                let items = drop.iterate()?;
                Some(items.iter().any(|item| item == other))
            }
            _ => None,
        }
    }

    /// Numeric view of this value, if it is a number
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Strict integer coercion: integers pass through, floats truncate
    /// toward zero, strings parse as decimal integers.
    pub fn to_int(&self) -> Result<i64, ()> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
            Self::String(s) => s.trim().parse().map_err(|_| ()),
            _ => Err(()),
        }
    }

    /// Lenient integer coercion used for range endpoints: 0 on failure
    pub fn to_int_lenient(&self) -> i64 {
        self.to_int().unwrap_or(0)
    }

    /// Element count honored by the special `size` attribute and the `size`
    /// filter. `None` for types without a size.
    pub fn size(&self) -> Option<i64> {
        match self {
            Self::String(s) => Some(s.chars().count() as i64),
            Self::Array(items) => Some(items.len() as i64),
            Self::Object(object) => Some(object.len() as i64),
            Self::Range(range) => Some(range.len() as i64),
            Self::Drop(drop) => drop.size(),
            _ => None,
        }
    }

    /// The string written to the output sink when this value is rendered by
    /// an output statement or `echo`. `nil`, `undefined` and the sentinels
    /// render as nothing; sequences concatenate their elements.
    pub fn render_string(&self) -> String {
        self.render_at(0)
    }

    fn render_at(&self, depth: usize) -> String {
        if depth > MAX_DEPTH {
            return "...".to_owned();
        }
        match self {
            Self::Nil | Self::Undefined(_) | Self::Empty | Self::Blank => {
                String::new()
            }
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::String(s) => s.clone(),
            Self::Range(range) => format!("{}..{}", range.start, range.stop),
            Self::Array(items) => items
                .iter()
                .map(|item| item.render_at(depth + 1))
                .collect(),
            Self::Object(_) => self.to_string(),
            Self::Drop(drop) => drop
                .coerce()
                .map(|value| value.render_at(depth + 1))
                .unwrap_or_default(),
        }
    }

    /// Expand this value to a sequence of items for iteration. Mappings
    /// yield `[key, value]` pairs; a string is a single-item sequence.
    /// `None` means the value is not iterable. Ranges are handled lazily by
    /// the caller and deliberately excluded here.
    pub(crate) fn iter_items(&self) -> Option<Vec<Value>> {
        match self {
            Self::Array(items) => Some(items.clone()),
            Self::Object(object) => Some(
                object
                    .iter()
                    .map(|(key, value)| {
                        Value::Array(vec![
                            Value::String(key.clone()),
                            value.clone(),
                        ])
                    })
                    .collect(),
            ),
            Self::String(s) => Some(vec![Value::String(s.clone())]),
            Self::Nil | Self::Undefined(_) => Some(Vec::new()),
            Self::Drop(drop) => drop.iterate(),
            _ => None,
        }
    }

    /// Rough byte size of this value, accumulated against the local
    /// namespace limit when assigned
    pub(crate) fn size_estimate(&self) -> usize {
        match self {
            Self::Nil | Self::Undefined(_) | Self::Empty | Self::Blank => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 8,
            Self::Range(_) => 16,
            Self::String(s) => s.len(),
            Self::Array(items) => {
                items.iter().map(Self::size_estimate).sum::<usize>() + 8
            }
            Self::Object(object) => {
                object
                    .iter()
                    .map(|(key, value)| key.len() + value.size_estimate())
                    .sum::<usize>()
                    + 8
            }
            Self::Drop(_) => 8,
        }
    }

    fn eq_at(&self, other: &Self, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return false;
        }
        let left = self.coerced();
        let right = other.coerced();
        let (mut left, mut right) = (&*left, &*right);

        // Normalize sentinel comparisons so the sentinel is on the left
        if matches!(right, Self::Empty | Self::Blank) {
            std::mem::swap(&mut left, &mut right);
        }
        match (left, right) {
            (Self::Empty, other) => other.is_empty_like(),
            (Self::Blank, other) => other.is_blank_like(),
            // Booleans only ever equal booleans
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Bool(_), _) | (_, Self::Bool(_)) => false,
            (
                Self::Nil | Self::Undefined(_),
                Self::Nil | Self::Undefined(_),
            ) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            // Numeric cross-type equality: 1 == 1.0
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                left.as_number() == right.as_number()
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| x.eq_at(y, depth + 1))
            }
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.get(key)
                            .is_some_and(|other| value.eq_at(other, depth + 1))
                    })
            }
            // Coercion already ran, so both sides are opaque: identity
            (Self::Drop(a), Self::Drop(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Does `empty` compare equal to this value?
    fn is_empty_like(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::String(s) => s.is_empty(),
            Self::Array(items) => items.is_empty(),
            Self::Object(object) => object.is_empty(),
            _ => false,
        }
    }

    /// Does `blank` compare equal to this value?
    fn is_blank_like(&self) -> bool {
        match self {
            Self::Blank => true,
            Self::String(s) => s.chars().all(char::is_whitespace),
            Self::Array(items) => items.is_empty(),
            Self::Object(object) => object.is_empty(),
            _ => false,
        }
    }
}

/// Liquid equality, not structural equality. Symmetric by construction:
/// every rule either swaps operands into a canonical order or treats both
/// sides alike.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_at(other, 0)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl<T> From<Vec<T>> for Value
where
    Value: From<T>,
{
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Self::from).collect())
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Self::Object(value)
    }
}

impl From<Arc<dyn ObjectDrop>> for Value {
    fn from(value: Arc<dyn ObjectDrop>) -> Self {
        Self::Drop(value)
    }
}

impl<K, V> From<Vec<(K, V)>> for Value
where
    String: From<K>,
    Value: From<V>,
{
    fn from(value: Vec<(K, V)>) -> Self {
        Self::Object(
            value
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::Array(Vec::from_iter(iter))
    }
}

/// The canonical display form, used when a mapping appears in template
/// output and in debug messages. Not the output form: see
/// [Value::render_string] for what output statements write.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_at(f, 0)
    }
}

impl Value {
    fn fmt_at(
        &self,
        f: &mut fmt::Formatter<'_>,
        depth: usize,
    ) -> fmt::Result {
        if depth > MAX_DEPTH {
            return f.write_str("...");
        }
        match self {
            Self::Nil | Self::Undefined(_) => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(float) => f.write_str(&format_float(*float)),
            Self::String(s) => write!(f, "'{s}'"),
            Self::Range(range) => {
                write!(f, "({}..{})", range.start, range.stop)
            }
            Self::Empty => f.write_str("empty"),
            Self::Blank => f.write_str("blank"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_at(f, depth + 1)?;
                }
                f.write_str("]")
            }
            Self::Object(object) => {
                f.write_str("{")?;
                for (i, (key, value)) in object.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{key}': ")?;
                    value.fmt_at(f, depth + 1)?;
                }
                f.write_str("}")
            }
            Self::Drop(drop) => match drop.coerce() {
                Some(value) => value.fmt_at(f, depth + 1),
                None => write!(f, "{drop:?}"),
            },
        }
    }
}

/// Format a float the way Liquid output expects: whole-number floats keep
/// their trailing `.0`
pub(crate) fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}
