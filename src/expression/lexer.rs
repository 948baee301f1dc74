//! The expression-level lexer: the inner of the two scanning passes.
//!
//! Tokenizes the text carried by an EXPRESSION token. All expression
//! flavours (filtered, boolean, loop, argument lists) share one token
//! vocabulary and one scanner; the parsers differ, not the lexer. Offsets
//! are absolute into the owning template source, so errors raised from deep
//! inside an expression still point at the right template byte.
//!
//! Bracketed path fragments (`["key"]`, `[0]`) are scanned as single
//! IDENTSTRING/IDENTINDEX tokens so the path parser needs no sub-grammar for
//! quoted keys, mirroring the rule table of the reference lexer.

use crate::{
    error::{Error, SourceLocation},
    token::{Token, TokenKind},
};
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// `[0]`, `[-1]` and friends, as one token
static IDENT_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\s*(-?\d+)\s*\]").unwrap());

/// `["key"]` / `['key']`, as one token
static IDENT_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\[\s*(?:"([^"]*)"|'([^']*)')\s*\]"#).unwrap()
});

/// Identifier shape. The trailing `?` is part of the word in expression
/// positions; assignment targets reject it at parse time.
static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w[\w-]*\??").unwrap());

/// Tokenize expression text. `start` is the absolute byte offset of `text`
/// within `source`.
pub(crate) fn tokenize(
    text: &str,
    start: usize,
    source: &Arc<str>,
) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let rest = &text[pos..];
        let c = rest.chars().next().unwrap_or_default();
        let at = start + pos;
        let mut push = |kind, value: &str| {
            tokens.push(Token::new(kind, value, at, source));
        };

        if c.is_whitespace() {
            pos += rest.len() - rest.trim_start().len();
            continue;
        }

        let consumed = match c {
            '[' => {
                if let Some(captures) = IDENT_INDEX.captures(rest) {
                    push(TokenKind::IdentIndex, &captures[1]);
                    captures[0].len()
                } else if let Some(captures) = IDENT_STRING.captures(rest) {
                    let inner = captures
                        .get(1)
                        .or_else(|| captures.get(2))
                        .map_or("", |m| m.as_str());
                    push(TokenKind::IdentString, inner);
                    captures[0].len()
                } else {
                    push(TokenKind::LBracket, "[");
                    1
                }
            }
            '"' | '\'' => {
                let Some(close) = rest[1..].find(c) else {
                    return Err(Error::syntax(
                        "unclosed string literal",
                        SourceLocation::new(Arc::clone(source), at),
                    ));
                };
                push(TokenKind::String, &rest[1..=close]);
                close + 2
            }
            '.' => {
                if rest.starts_with("..") {
                    push(TokenKind::Range, "..");
                    2
                } else {
                    push(TokenKind::Dot, ".");
                    1
                }
            }
            '(' => {
                // Lookahead to distinguish a range literal from a grouping
                // paren: a `..` before the first `)` means this paren opens
                // a range
                let dots = rest.find("..");
                let close = rest.find(')');
                let is_range = match (dots, close) {
                    (Some(dots), Some(close)) => dots < close,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if is_range {
                    push(TokenKind::RangeLiteral, "(");
                } else {
                    push(TokenKind::LParen, "(");
                }
                1
            }
            ')' => {
                push(TokenKind::RParen, ")");
                1
            }
            ']' => {
                push(TokenKind::RBracket, "]");
                1
            }
            ':' => {
                push(TokenKind::Colon, ":");
                1
            }
            ',' => {
                push(TokenKind::Comma, ",");
                1
            }
            '|' => {
                if rest.starts_with("||") {
                    push(TokenKind::DoublePipe, "||");
                    2
                } else {
                    push(TokenKind::Pipe, "|");
                    1
                }
            }
            '=' | '!' | '<' | '>' => {
                scan_operator(rest, at, source, &mut push)?
            }
            _ if c.is_ascii_digit()
                || (c == '-'
                    && rest[1..]
                        .chars()
                        .next()
                        .is_some_and(|d| d.is_ascii_digit())) =>
            {
                scan_number(rest, &mut push)
            }
            _ => match WORD.find(rest) {
                Some(word) => {
                    let lexeme = word.as_str();
                    push(keyword_kind(lexeme), lexeme);
                    lexeme.len()
                }
                None => {
                    let illegal = Token::new(
                        TokenKind::Illegal,
                        c.to_string(),
                        at,
                        source,
                    );
                    return Err(
                        illegal.syntax_error(format!("unexpected '{c}'"))
                    );
                }
            },
        };
        pos += consumed;
    }

    Ok(tokens)
}

/// Scan a `[!=<>]{1,2}` operator and map it through the operator table
fn scan_operator(
    rest: &str,
    at: usize,
    source: &Arc<str>,
    push: &mut impl FnMut(TokenKind, &str),
) -> Result<usize, Error> {
    let is_op_char = |c: char| matches!(c, '=' | '!' | '<' | '>');
    let len = rest.chars().take(2).take_while(|&c| is_op_char(c)).count();
    let lexeme = &rest[..len];
    let kind = match lexeme {
        "==" => Some(TokenKind::Eq),
        "!=" => Some(TokenKind::Ne),
        "<>" => Some(TokenKind::Lg),
        "<=" => Some(TokenKind::Le),
        ">=" => Some(TokenKind::Ge),
        "<" => Some(TokenKind::Lt),
        ">" => Some(TokenKind::Gt),
        "=" => Some(TokenKind::Assign),
        _ => None,
    };
    match kind {
        Some(kind) => {
            push(kind, lexeme);
            Ok(len)
        }
        None => Err(Error::syntax(
            format!("unknown operator '{lexeme}'"),
            SourceLocation::new(Arc::clone(source), at),
        )),
    }
}

/// Scan an integer or float literal. Signed numbers are tokenized whole; a
/// `.` not followed by another `.` puts us in a float. A digit run flowing
/// directly into word characters is a word (`1st`), matching the reference
/// lexer's identifier laxness.
fn scan_number(rest: &str, push: &mut impl FnMut(TokenKind, &str)) -> usize {
    let mut len = usize::from(rest.starts_with('-'));
    len += digit_run(&rest[len..]);
    let mut kind = TokenKind::Integer;
    let after = &rest[len..];
    if after.starts_with('.') && !after.starts_with("..") {
        kind = TokenKind::Float;
        len += 1;
        len += digit_run(&rest[len..]);
    }
    // A trailing word character means this was never a number
    if kind == TokenKind::Integer
        && !rest.starts_with('-')
        && rest[len..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        && let Some(m) = WORD.find(rest)
    {
        push(TokenKind::Word, m.as_str());
        return m.as_str().len();
    }
    push(kind, &rest[..len]);
    len
}

fn digit_run(s: &str) -> usize {
    s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len())
}

/// Map a word to its keyword token kind, or WORD if it isn't a keyword
fn keyword_kind(word: &str) -> TokenKind {
    match word {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" => TokenKind::Nil,
        "null" => TokenKind::Null,
        "empty" => TokenKind::Empty,
        "blank" => TokenKind::Blank,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "contains" => TokenKind::Contains,
        "in" => TokenKind::In,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "with" => TokenKind::With,
        "for" => TokenKind::For,
        "as" => TokenKind::As,
        "limit" => TokenKind::Limit,
        "offset" => TokenKind::Offset,
        "reversed" => TokenKind::Reversed,
        "cols" => TokenKind::Cols,
        "continue" => TokenKind::Continue,
        "required" => TokenKind::Required,
        _ => TokenKind::Word,
    }
}
