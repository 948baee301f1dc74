//! Error types for template parsing and rendering

use std::{fmt, sync::Arc};
use thiserror::Error;

/// Any error that can occur while parsing or rendering a template.
///
/// Errors always hold owned data so they can be detached from the lifetime of
/// the template and environment. Variants that originate from a specific spot
/// in template source carry a [SourceLocation] pointing back at it; use
/// [Error::detail] to get a multi-line message with a source snippet.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed template or expression. Parsing errors are always fatal; no
    /// partial syntax tree is ever returned.
    #[error("liquid syntax error: {message}{loc}", loc = DisplayLocation(.location.as_ref()))]
    Syntax {
        message: String,
        location: Option<SourceLocation>,
    },

    /// An operation was applied to values of unsupported types at render time
    #[error("liquid type error: {message}{loc}", loc = DisplayLocation(.location.as_ref()))]
    Type {
        message: String,
        location: Option<SourceLocation>,
    },

    /// A filter name was not found in the filter registry
    #[error("unknown filter '{name}'{loc}", loc = DisplayLocation(.location.as_ref()))]
    UnknownFilter {
        name: String,
        location: Option<SourceLocation>,
    },

    /// A filter was called with the wrong number or type of arguments
    #[error("{filter}: {message}{loc}", loc = DisplayLocation(.location.as_ref()))]
    FilterArgument {
        filter: String,
        message: String,
        location: Option<SourceLocation>,
    },

    /// The configured loader could not find a template by name
    #[error("template not found '{name}'{loc}", loc = DisplayLocation(.location.as_ref()))]
    TemplateNotFound {
        name: String,
        location: Option<SourceLocation>,
    },

    /// `extends`/`block` misuse, such as duplicate block names
    #[error("template inheritance error: {message}{loc}", loc = DisplayLocation(.location.as_ref()))]
    Inheritance {
        message: String,
        location: Option<SourceLocation>,
    },

    /// Nested `include`/`render`/inheritance exceeded the configured depth
    #[error("maximum context depth reached ({limit}){loc}", loc = DisplayLocation(.location.as_ref()))]
    ContextDepth {
        limit: usize,
        location: Option<SourceLocation>,
    },

    /// Total loop iterations for this render exceeded the configured limit
    #[error("loop iteration limit reached ({limit})")]
    LoopIterationLimit { limit: usize },

    /// Values assigned to the local namespace exceeded the configured byte
    /// limit
    #[error("local namespace limit reached ({limit} bytes)")]
    LocalNamespaceLimit { limit: usize },

    /// Bytes written to the output sink exceeded the configured limit
    #[error("output stream limit reached ({limit} bytes)")]
    OutputStreamLimit { limit: usize },

    /// The render was cancelled through its cancellation token
    #[error("render cancelled")]
    Cancelled,

    /// A bug in the engine. Never raised on well-formed input.
    #[error("internal liquid error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn syntax(
        message: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self::Syntax {
            message: message.into(),
            location: Some(location),
        }
    }

    pub(crate) fn type_error(
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) -> Self {
        Self::Type {
            message: message.into(),
            location,
        }
    }

    /// The location in template source this error points at, if known
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Syntax { location, .. }
            | Self::Type { location, .. }
            | Self::UnknownFilter { location, .. }
            | Self::FilterArgument { location, .. }
            | Self::TemplateNotFound { location, .. }
            | Self::Inheritance { location, .. }
            | Self::ContextDepth { location, .. } => location.as_ref(),
            Self::LoopIterationLimit { .. }
            | Self::LocalNamespaceLimit { .. }
            | Self::OutputStreamLimit { .. }
            | Self::Cancelled
            | Self::Internal(_) => None,
        }
    }

    fn location_mut(&mut self) -> Option<&mut Option<SourceLocation>> {
        match self {
            Self::Syntax { location, .. }
            | Self::Type { location, .. }
            | Self::UnknownFilter { location, .. }
            | Self::FilterArgument { location, .. }
            | Self::TemplateNotFound { location, .. }
            | Self::Inheritance { location, .. }
            | Self::ContextDepth { location, .. } => Some(location),
            Self::LoopIterationLimit { .. }
            | Self::LocalNamespaceLimit { .. }
            | Self::OutputStreamLimit { .. }
            | Self::Cancelled
            | Self::Internal(_) => None,
        }
    }

    /// Fill in the template name on this error's location, if the error has a
    /// location and no name was recorded yet. Templates attach their own name
    /// as errors bubble out of nested renders.
    #[must_use]
    pub(crate) fn with_template_name(mut self, name: &str) -> Self {
        if let Some(Some(location)) = self.location_mut()
            && location.template_name.is_none()
        {
            location.template_name = Some(name.to_owned());
        }
        self
    }

    /// Attach a location to this error if it doesn't already carry one
    #[must_use]
    pub(crate) fn or_location(mut self, location: SourceLocation) -> Self {
        if let Some(slot @ None) = self.location_mut() {
            *slot = Some(location);
        }
        self
    }

    /// Can this error be suppressed by the WARN/LAX tolerance modes?
    /// Resource-limit violations and cancellation are always fatal, as are
    /// syntax errors from nested templates and engine bugs.
    pub(crate) fn is_recoverable(&self) -> bool {
        match self {
            Self::Type { .. }
            | Self::UnknownFilter { .. }
            | Self::FilterArgument { .. }
            | Self::TemplateNotFound { .. } => true,
            Self::Syntax { .. }
            | Self::Inheritance { .. }
            | Self::ContextDepth { .. }
            | Self::LoopIterationLimit { .. }
            | Self::LocalNamespaceLimit { .. }
            | Self::OutputStreamLimit { .. }
            | Self::Cancelled
            | Self::Internal(_) => false,
        }
    }

    /// A multi-line version of the error message that includes a source
    /// snippet with a caret pointing at the offending spot, when the error
    /// carries a location.
    pub fn detail(&self) -> String {
        match self.location() {
            Some(location) => {
                format!("{self}\n{}", location.snippet())
            }
            None => self.to_string(),
        }
    }
}

/// A position within the source text of a template, kept alongside errors so
/// messages can point at the offending line. Holds a shared reference to the
/// full source rather than a pre-rendered snippet; snippets are derived on
/// demand.
#[derive(Clone)]
pub struct SourceLocation {
    pub(crate) source: Arc<str>,
    pub(crate) template_name: Option<String>,
    pub(crate) start: usize,
}

impl SourceLocation {
    pub(crate) fn new(source: Arc<str>, start: usize) -> Self {
        Self {
            source,
            template_name: None,
            start,
        }
    }

    /// Name of the template this location belongs to, when it was loaded by
    /// name
    pub fn template_name(&self) -> Option<&str> {
        self.template_name.as_deref()
    }

    /// Byte offset into the template source
    pub fn start(&self) -> usize {
        self.start
    }

    /// 1-based line and column of this location
    pub fn line_col(&self) -> (usize, usize) {
        let start = self.start.min(self.source.len());
        let prefix = &self.source[..start];
        let line = prefix.matches('\n').count() + 1;
        let line_start = prefix.rfind('\n').map_or(0, |i| i + 1);
        let column = prefix[line_start..].chars().count() + 1;
        (line, column)
    }

    /// The source line this location points at, with a caret marker line
    /// underneath
    pub fn snippet(&self) -> String {
        let start = self.start.min(self.source.len());
        let line_start = self.source[..start].rfind('\n').map_or(0, |i| i + 1);
        let line_end = self.source[start..]
            .find('\n')
            .map_or(self.source.len(), |i| start + i);
        let line = &self.source[line_start..line_end];
        let caret_pad = self.source[line_start..start].chars().count();
        format!("  {line}\n  {}^", " ".repeat(caret_pad))
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (line, column) = self.line_col();
        let name = self.template_name.as_deref().unwrap_or("<string>");
        write!(f, "{name}:{line}:{column}")
    }
}

// The referenced source can be arbitrarily large; don't dump it into debug
// output
impl fmt::Debug for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceLocation")
            .field("template_name", &self.template_name)
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

/// Format helper so thiserror messages can append " (name:line:col)" only
/// when a location is present
struct DisplayLocation<'a>(Option<&'a SourceLocation>);

impl fmt::Display for DisplayLocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(location) => write!(f, " ({location})"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn location(source: &str, start: usize) -> SourceLocation {
        SourceLocation::new(source.into(), start)
    }

    #[test]
    fn test_line_col() {
        let loc = location("hello\nworld {{ x }}\n", 12);
        assert_eq!(loc.line_col(), (2, 7));
    }

    #[test]
    fn test_line_col_first_line() {
        let loc = location("{{ x }}", 3);
        assert_eq!(loc.line_col(), (1, 4));
    }

    #[test]
    fn test_snippet_caret() {
        let loc = location("a\nbb {{ nope }}\n", 5);
        assert_eq!(loc.snippet(), "  bb {{ nope }}\n     ^");
    }

    #[test]
    fn test_display_with_name() {
        let mut loc = location("{{ x }}", 0);
        loc.template_name = Some("index.liquid".to_owned());
        let error = Error::syntax("expected '}}'", loc);
        assert_eq!(
            error.to_string(),
            "liquid syntax error: expected '}}' (index.liquid:1:1)"
        );
    }

    #[test]
    fn test_with_template_name_does_not_overwrite() {
        let mut loc = location("{{ x }}", 0);
        loc.template_name = Some("a.liquid".to_owned());
        let error =
            Error::syntax("boom", loc).with_template_name("b.liquid");
        assert_eq!(
            error.location().unwrap().template_name(),
            Some("a.liquid")
        );
    }
}
