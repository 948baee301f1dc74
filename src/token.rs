//! Token model shared by the template lexer and the expression lexer, plus
//! the cursor used by the parsers.
//!
//! Both lexers emit the same [Token] shape: a kind, a lexeme (or the
//! semantic value derived from it, e.g. the unquoted text of a string
//! literal), a byte offset into the owning source and a shared reference to
//! that source. Carrying the source on every token keeps error reporting
//! cheap; no re-scanning is ever needed to point at the offending line.

use crate::error::{Error, SourceLocation};
use std::{collections::VecDeque, fmt, sync::Arc};

/// The kind of a [Token]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TokenKind {
    // Template level
    Content,
    Output,
    Tag,
    Expression,
    Doc,
    Comment,
    Eof,

    // Words and literals
    Word,
    String,
    Integer,
    Float,
    True,
    False,
    Nil,
    Null,
    Empty,
    Blank,

    // Keywords
    And,
    Or,
    Not,
    Contains,
    In,
    If,
    Else,
    With,
    For,
    As,
    By,
    Limit,
    Offset,
    Reversed,
    Cols,
    Continue,
    Required,

    // Operators and punctuation
    Eq,
    Ne,
    /// The `<>` spelling of not-equal
    Lg,
    Lt,
    Le,
    Gt,
    Ge,
    Pipe,
    DoublePipe,
    Colon,
    Comma,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    /// The `..` inside a range literal
    Range,
    /// Synthetic token for a `(` that opens a range literal rather than a
    /// grouping paren
    RangeLiteral,
    /// The `=` used by `assign` and non-standard keyword arguments
    Assign,
    /// A bracketed integer path segment, e.g. `[0]` or `[-1]`
    IdentIndex,
    /// A bracketed quoted path segment, e.g. `["foo bar"]`
    IdentString,

    /// A character matching no lexer rule. Never leaves the lexer; it exists
    /// so the resulting syntax error can carry a token.
    Illegal,
}

impl TokenKind {
    /// A human-readable description used in "expected X, found Y" messages.
    /// Operators describe themselves by their lexeme.
    pub fn description(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Output => "output statement",
            Self::Tag => "tag",
            Self::Expression => "expression",
            Self::Doc => "doc block",
            Self::Comment => "comment",
            Self::Eof => "end of expression",
            Self::Word => "word",
            Self::String => "string literal",
            Self::Integer => "integer literal",
            Self::Float => "float literal",
            Self::True => "'true'",
            Self::False => "'false'",
            Self::Nil => "'nil'",
            Self::Null => "'null'",
            Self::Empty => "'empty'",
            Self::Blank => "'blank'",
            Self::And => "'and'",
            Self::Or => "'or'",
            Self::Not => "'not'",
            Self::Contains => "'contains'",
            Self::In => "'in'",
            Self::If => "'if'",
            Self::Else => "'else'",
            Self::With => "'with'",
            Self::For => "'for'",
            Self::As => "'as'",
            Self::By => "'by'",
            Self::Limit => "'limit'",
            Self::Offset => "'offset'",
            Self::Reversed => "'reversed'",
            Self::Cols => "'cols'",
            Self::Continue => "'continue'",
            Self::Required => "'required'",
            Self::Eq => "'=='",
            Self::Ne => "'!='",
            Self::Lg => "'<>'",
            Self::Lt => "'<'",
            Self::Le => "'<='",
            Self::Gt => "'>'",
            Self::Ge => "'>='",
            Self::Pipe => "'|'",
            Self::DoublePipe => "'||'",
            Self::Colon => "':'",
            Self::Comma => "','",
            Self::Dot => "'.'",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::Range => "'..'",
            Self::RangeLiteral => "range literal",
            Self::Assign => "'='",
            Self::IdentIndex => "bracketed index",
            Self::IdentString => "bracketed name",
            Self::Illegal => "illegal character",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// An immutable token produced by one of the lexers
#[derive(Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// The lexeme, or the semantic value derived from it. Tag tokens hold
    /// the tag name; string tokens hold the unquoted text.
    pub value: String,
    /// Byte offset of the lexeme within `source`
    pub start: usize,
    /// The template source this token was scanned from
    pub source: Arc<str>,
}

impl Token {
    pub(crate) fn new(
        kind: TokenKind,
        value: impl Into<String>,
        start: usize,
        source: &Arc<str>,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            start,
            source: Arc::clone(source),
        }
    }

    /// Build an end-of-stream sentinel pointing one past the end of `source`
    pub(crate) fn eof(start: usize, source: &Arc<str>) -> Self {
        Self::new(TokenKind::Eof, "", start, source)
    }

    /// Is this a tag token with the given name?
    pub fn is_tag(&self, name: &str) -> bool {
        self.kind == TokenKind::Tag && self.value == name
    }

    /// The location of this token, for error reporting
    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(Arc::clone(&self.source), self.start)
    }

    /// A syntax error pointing at this token
    pub(crate) fn syntax_error(&self, message: impl Into<String>) -> Error {
        Error::syntax(message, self.location())
    }

    /// How this token describes itself in error messages. Words and literals
    /// quote their lexeme; everything else uses the kind description.
    fn describe(&self) -> String {
        match self.kind {
            TokenKind::Word
            | TokenKind::String
            | TokenKind::Integer
            | TokenKind::Float
            | TokenKind::Illegal => format!("'{}'", self.value),
            kind => kind.description().to_owned(),
        }
    }
}

// Don't debug-print the whole source text
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.value == other.value
            && self.start == other.start
    }
}

/// A cursor over a sequence of tokens with one-token lookahead and
/// push-back. Once the underlying tokens are exhausted the stream yields EOF
/// sentinels indefinitely.
#[derive(Debug)]
pub struct TokenStream {
    tokens: std::vec::IntoIter<Token>,
    /// Tokens pushed back onto the stream, consumed before `tokens`
    pushed: VecDeque<Token>,
    current: Token,
    eof: Token,
}

impl TokenStream {
    /// Create a stream over `tokens`. `end` is the offset reported by the
    /// EOF sentinel, typically one past the last byte of the expression.
    pub(crate) fn new(
        tokens: Vec<Token>,
        source: &Arc<str>,
        end: usize,
    ) -> Self {
        let eof = Token::eof(end, source);
        let mut stream = Self {
            tokens: tokens.into_iter(),
            pushed: VecDeque::new(),
            current: eof.clone(),
            eof,
        };
        stream.advance();
        stream
    }

    fn advance(&mut self) {
        self.current = self
            .pushed
            .pop_front()
            .or_else(|| self.tokens.next())
            .unwrap_or_else(|| self.eof.clone());
    }

    /// The token under the cursor
    pub fn current(&self) -> &Token {
        &self.current
    }

    /// Return the current token and step the cursor forward
    pub fn next(&mut self) -> Token {
        let token = self.current.clone();
        self.advance();
        token
    }

    /// Look at the token after the current one without consuming anything
    pub fn peek(&mut self) -> &Token {
        if self.pushed.is_empty() {
            let next = self.tokens.next().unwrap_or_else(|| self.eof.clone());
            self.pushed.push_back(next);
        }
        &self.pushed[0]
    }

    /// Push a token back onto the stream. It becomes the current token and
    /// the old current token is queued behind it.
    pub fn push(&mut self, token: Token) {
        let current = std::mem::replace(&mut self.current, token);
        self.pushed.push_front(current);
    }

    /// Error unless the current token has the given kind
    pub fn expect(&self, kind: TokenKind) -> Result<(), Error> {
        if self.current.kind == kind {
            Ok(())
        } else {
            Err(self.current.syntax_error(format!(
                "expected {}, found {}",
                kind.description(),
                self.current.describe()
            )))
        }
    }

    /// Error unless the token after the current one has the given kind
    pub fn expect_peek(&mut self, kind: TokenKind) -> Result<(), Error> {
        let peeked = self.peek();
        if peeked.kind == kind {
            Ok(())
        } else {
            let message = format!(
                "expected {}, found {}",
                kind.description(),
                peeked.describe()
            );
            Err(self.peek().syntax_error(message))
        }
    }

    /// Consume and return the current token, erroring unless it has the
    /// given kind
    pub fn eat(&mut self, kind: TokenKind) -> Result<Token, Error> {
        self.expect(kind)?;
        Ok(self.next())
    }
}
