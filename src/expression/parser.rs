//! Recursive-descent parsers for the expression grammar family: filtered
//! expressions, boolean expressions (both dialects), loop expressions,
//! argument lists, paths and primitives.
//!
//! Every parser consumes from a [TokenStream] produced by the expression
//! lexer and leaves the cursor just past what it parsed. Parsers that own a
//! whole expression (filtered, loop) also consume the trailing EOF.

use crate::{
    environment::{Environment, Mode},
    error::Error,
    expression::{
        CompareOp, Expression, FilterArg, FilterCall, FilteredExpression,
        Identifier, Literal, LoopExpression, LoopOffset, Path, Segment,
        TernaryTail,
    },
    token::{Token, TokenKind, TokenStream},
};

// Operator precedence, lowest binds loosest. `and`/`or` share one level and
// associate to the right, matching the reference implementation.
const PRECEDENCE_LOWEST: u8 = 1;
const PRECEDENCE_LOGICAL_RIGHT: u8 = 3;
const PRECEDENCE_RELATIONAL: u8 = 5;
const PRECEDENCE_MEMBERSHIP: u8 = 6;
const PRECEDENCE_PREFIX: u8 = 7;

/// Parse a filtered expression with an optional ternary tail, consuming the
/// whole stream. The left side admits comparisons and logical operators,
/// so `{{ '' == blank }}` renders a boolean.
pub(crate) fn parse_filtered(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<FilteredExpression, Error> {
    let left = parse_boolean(env, tokens)?;
    let filters = parse_filters(env, tokens, false)?;

    let ternary = if tokens.current().kind == TokenKind::If {
        let token = tokens.next();
        let condition = parse_boolean(env, tokens)?;
        let mut alternative = None;
        let mut alternative_filters = Vec::new();
        if tokens.current().kind == TokenKind::Else {
            tokens.next();
            alternative = Some(parse_primitive(env, tokens)?);
            if tokens.current().kind == TokenKind::Pipe {
                alternative_filters = parse_filters(env, tokens, false)?;
            }
        }
        let tail_filters = if tokens.current().kind == TokenKind::DoublePipe
        {
            parse_filters(env, tokens, true)?
        } else {
            Vec::new()
        };
        Some(TernaryTail {
            token,
            condition,
            alternative,
            alternative_filters,
            tail_filters,
        })
    } else {
        None
    };

    tokens.eat(TokenKind::Eof)?;
    Ok(FilteredExpression {
        left,
        filters,
        ternary,
    })
}

/// Parse a boolean expression. Does not consume the trailing EOF; `if`-like
/// tags expect end-of-expression afterwards, while ternary tails continue
/// with `else`/`||`.
pub(crate) fn parse_boolean(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Expression, Error> {
    parse_boolean_at(env, tokens, PRECEDENCE_LOWEST)
}

fn parse_boolean_at(
    env: &Environment,
    tokens: &mut TokenStream,
    precedence: u8,
) -> Result<Expression, Error> {
    let mut left = parse_boolean_primary(env, tokens)?;
    loop {
        let kind = tokens.current().kind;
        let Some(op_precedence) = binary_precedence(kind) else {
            break;
        };
        if op_precedence < precedence {
            break;
        }
        let token = tokens.next();
        // Relational and membership operators associate to the left, so
        // their right operand parses at one level tighter
        let right_precedence = if op_precedence == PRECEDENCE_LOGICAL_RIGHT {
            op_precedence
        } else {
            op_precedence + 1
        };
        let right = parse_boolean_at(env, tokens, right_precedence)?;
        left = infix(token, kind, left, right);
    }
    Ok(left)
}

fn parse_boolean_primary(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Expression, Error> {
    // `not` and grouping parens belong to the non-standard dialect only
    if env.logical_parens {
        match tokens.current().kind {
            TokenKind::Not => {
                let token = tokens.next();
                let right =
                    parse_boolean_at(env, tokens, PRECEDENCE_PREFIX)?;
                return Ok(Expression::Not {
                    token,
                    right: Box::new(right),
                });
            }
            TokenKind::LParen => {
                tokens.next();
                let inner =
                    parse_boolean_at(env, tokens, PRECEDENCE_LOWEST)?;
                tokens.eat(TokenKind::RParen)?;
                return Ok(inner);
            }
            _ => {}
        }
    }
    parse_primitive(env, tokens)
}

fn binary_precedence(kind: TokenKind) -> Option<u8> {
    match kind {
        TokenKind::And | TokenKind::Or => Some(PRECEDENCE_LOGICAL_RIGHT),
        TokenKind::Eq
        | TokenKind::Ne
        | TokenKind::Lg
        | TokenKind::Lt
        | TokenKind::Le
        | TokenKind::Gt
        | TokenKind::Ge => Some(PRECEDENCE_RELATIONAL),
        TokenKind::Contains => Some(PRECEDENCE_MEMBERSHIP),
        _ => None,
    }
}

fn infix(
    token: Token,
    kind: TokenKind,
    left: Expression,
    right: Expression,
) -> Expression {
    let (left, right) = (Box::new(left), Box::new(right));
    let op = match kind {
        TokenKind::And => {
            return Expression::And { token, left, right };
        }
        TokenKind::Or => {
            return Expression::Or { token, left, right };
        }
        TokenKind::Eq => CompareOp::Eq,
        // `<>` is an alternate spelling of `!=`
        TokenKind::Ne | TokenKind::Lg => CompareOp::Ne,
        TokenKind::Lt => CompareOp::Lt,
        TokenKind::Le => CompareOp::Le,
        TokenKind::Gt => CompareOp::Gt,
        TokenKind::Ge => CompareOp::Ge,
        TokenKind::Contains => CompareOp::Contains,
        _ => unreachable!("checked by binary_precedence"),
    };
    Expression::Compare {
        token,
        op,
        left,
        right,
    }
}

/// Parse a loop expression: `name in iterable (limit/offset/cols/reversed)*`
pub(crate) fn parse_loop(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<LoopExpression, Error> {
    let variable = parse_identifier(env, tokens, true)?;
    tokens.eat(TokenKind::In)?;

    let iterable = match tokens.current().kind {
        TokenKind::Word | TokenKind::IdentString | TokenKind::LBracket => {
            Expression::Path(parse_path(env, tokens)?)
        }
        TokenKind::String | TokenKind::RangeLiteral => {
            parse_primitive(env, tokens)?
        }
        _ => {
            return Err(tokens
                .current()
                .syntax_error("invalid loop expression"));
        }
    };

    let mut limit = None;
    let mut offset = None;
    let mut cols = None;
    let mut reversed = false;
    loop {
        match tokens.current().kind {
            TokenKind::Eof => break,
            TokenKind::Comma => {
                tokens.next();
            }
            TokenKind::Limit => {
                tokens.next();
                tokens.eat(TokenKind::Colon)?;
                limit = Some(parse_loop_argument(env, tokens)?);
            }
            TokenKind::Offset => {
                tokens.next();
                tokens.eat(TokenKind::Colon)?;
                offset = Some(
                    if tokens.current().kind == TokenKind::Continue {
                        tokens.next();
                        LoopOffset::Continue
                    } else {
                        LoopOffset::Expression(parse_loop_argument(
                            env, tokens,
                        )?)
                    },
                );
            }
            TokenKind::Cols => {
                tokens.next();
                tokens.eat(TokenKind::Colon)?;
                cols = Some(parse_loop_argument(env, tokens)?);
            }
            TokenKind::Reversed => {
                tokens.next();
                reversed = true;
            }
            _ => {
                return Err(tokens.current().syntax_error(format!(
                    "unexpected '{}'",
                    tokens.current().value
                )));
            }
        }
    }
    tokens.eat(TokenKind::Eof)?;

    Ok(LoopExpression {
        variable,
        iterable,
        limit,
        offset,
        cols,
        reversed,
    })
}

/// Parse a `limit:`/`offset:`/`cols:` argument. String literals are parsed
/// as integers eagerly, so `limit: '2'` fails at parse time rather than
/// render time.
fn parse_loop_argument(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Expression, Error> {
    match tokens.current().kind {
        TokenKind::Word | TokenKind::IdentString | TokenKind::LBracket => {
            Ok(Expression::Path(parse_path(env, tokens)?))
        }
        TokenKind::Integer | TokenKind::Float => parse_primitive(env, tokens),
        TokenKind::String => {
            let token = tokens.next();
            let value = token.value.trim().parse::<i64>().map_err(|_| {
                token.syntax_error(format!(
                    "invalid integer argument '{}'",
                    token.value
                ))
            })?;
            Ok(Expression::Literal {
                token,
                value: Literal::Int(value),
            })
        }
        _ => Err(tokens.current().syntax_error(format!(
            "unexpected '{}'",
            tokens.current().value
        ))),
    }
}

/// Parse a primitive expression: a literal, a range literal or a path
pub(crate) fn parse_primitive(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Expression, Error> {
    let token = tokens.current().clone();
    match token.kind {
        TokenKind::True => literal(tokens, Literal::Bool(true)),
        TokenKind::False => literal(tokens, Literal::Bool(false)),
        TokenKind::Nil | TokenKind::Null => literal(tokens, Literal::Nil),
        TokenKind::Empty => literal(tokens, Literal::Empty),
        TokenKind::Blank => literal(tokens, Literal::Blank),
        TokenKind::Integer => {
            let value = token.value.parse().map_err(|_| {
                token.syntax_error(format!(
                    "integer literal '{}' is out of range",
                    token.value
                ))
            })?;
            literal(tokens, Literal::Int(value))
        }
        TokenKind::Float => {
            let value = token.value.parse().map_err(|_| {
                token.syntax_error(format!(
                    "invalid float literal '{}'",
                    token.value
                ))
            })?;
            literal(tokens, Literal::Float(value))
        }
        TokenKind::String => {
            let token = tokens.next();
            let value = Literal::String(token.value.clone());
            Ok(Expression::Literal { token, value })
        }
        TokenKind::RangeLiteral => parse_range(env, tokens),
        TokenKind::Word
        | TokenKind::IdentString
        | TokenKind::LBracket => Ok(Expression::Path(parse_path(env, tokens)?)),
        _ => Err(token.syntax_error(format!(
            "expected a primitive expression, found {}",
            token.kind
        ))),
    }
}

fn literal(
    tokens: &mut TokenStream,
    value: Literal,
) -> Result<Expression, Error> {
    let token = tokens.next();
    Ok(Expression::Literal { token, value })
}

/// Parse `( start .. stop )`. The opening paren arrives as the synthetic
/// RANGE_LITERAL token, so there is no ambiguity with grouping parens here.
fn parse_range(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Expression, Error> {
    let token = tokens.eat(TokenKind::RangeLiteral)?;
    let start = parse_primitive(env, tokens)?;
    tokens.eat(TokenKind::Range)?;
    let stop = parse_primitive(env, tokens)?;
    tokens.eat(TokenKind::RParen)?;
    Ok(Expression::Range {
        token,
        start: Box::new(start),
        stop: Box::new(stop),
    })
}

/// Parse a path: `WORD | IDENTSTRING | [nested]` followed by any number of
/// `.WORD`, `IDENTSTRING`, `IDENTINDEX` or `[nested]` segments
pub(crate) fn parse_path(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Path, Error> {
    let token = tokens.current().clone();
    let mut segments = Vec::new();

    match token.kind {
        TokenKind::Word | TokenKind::IdentString => {
            segments.push(Segment::Key(tokens.next().value));
        }
        TokenKind::LBracket => {
            tokens.next();
            segments.push(Segment::Nested(parse_path(env, tokens)?));
            tokens.eat(TokenKind::RBracket)?;
        }
        _ => {
            return Err(token.syntax_error(format!(
                "expected a path, found {}",
                token.kind
            )));
        }
    }

    loop {
        match tokens.current().kind {
            TokenKind::Dot => {
                tokens.next();
                let word = tokens.eat(TokenKind::Word)?;
                segments.push(Segment::Key(word.value));
            }
            TokenKind::IdentString => {
                segments.push(Segment::Key(tokens.next().value));
            }
            TokenKind::IdentIndex => {
                let token = tokens.next();
                let index = token.value.parse().map_err(|_| {
                    token.syntax_error(format!(
                        "index '{}' is out of range",
                        token.value
                    ))
                })?;
                segments.push(Segment::Index(index));
            }
            TokenKind::LBracket => {
                tokens.next();
                segments.push(Segment::Nested(parse_path(env, tokens)?));
                tokens.eat(TokenKind::RBracket)?;
            }
            _ => break,
        }
    }

    Ok(Path { token, segments })
}

/// Parse a single word that might otherwise be a one-segment path. Used for
/// loop variables and assignment targets; the latter forbid a trailing `?`.
pub(crate) fn parse_identifier(
    env: &Environment,
    tokens: &mut TokenStream,
    allow_trailing_question: bool,
) -> Result<Identifier, Error> {
    let expression = parse_primitive(env, tokens)?;
    let token = expression.token().clone();
    let name = match &expression {
        Expression::Literal {
            value: Literal::Int(i),
            ..
        } => i.to_string(),
        Expression::Path(path) => match path.segments.as_slice() {
            [Segment::Key(name)] => name.clone(),
            _ => {
                return Err(token.syntax_error(
                    "expected an identifier, found a path with multiple \
                     segments",
                ));
            }
        },
        _ => {
            return Err(token.syntax_error(format!(
                "expected an identifier, found {}",
                token.kind
            )));
        }
    };
    if !allow_trailing_question && name.ends_with('?') {
        return Err(token.syntax_error("invalid identifier"));
    }
    Ok(Identifier { token, name })
}

/// Parse a quoted or unquoted name, e.g. a `cycle` group or `capture`
/// target
pub(crate) fn parse_name(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Identifier, Error> {
    let expression = parse_primitive(env, tokens)?;
    let token = expression.token().clone();
    match &expression {
        Expression::Literal {
            value: Literal::String(name),
            ..
        } => Ok(Identifier {
            name: name.clone(),
            token,
        }),
        Expression::Path(path) => match path.segments.as_slice() {
            [Segment::Key(name)] => Ok(Identifier {
                name: name.clone(),
                token,
            }),
            _ => Err(token.syntax_error(
                "expected a name, found a path with multiple segments",
            )),
        },
        _ => Err(token.syntax_error(format!(
            "expected a name, found {}",
            token.kind
        ))),
    }
}

/// Parse a string literal or a path to a string variable. Used for
/// `include`/`render` template names.
pub(crate) fn parse_string_or_path(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Expression, Error> {
    let expression = parse_primitive(env, tokens)?;
    match &expression {
        Expression::Literal {
            value: Literal::String(_),
            ..
        }
        | Expression::Path(_) => Ok(expression),
        _ => Err(expression.token().syntax_error(format!(
            "expected a string or variable, found {}",
            expression.token().kind
        ))),
    }
}

/// Parse a mixed argument list (positional and `name: value` keywords) up
/// to the end of the stream, leaving the EOF for the caller
pub(crate) fn parse_arguments(
    env: &Environment,
    tokens: &mut TokenStream,
) -> Result<Vec<FilterArg>, Error> {
    let mut args = Vec::new();
    loop {
        let current_kind = tokens.current().kind;
        match current_kind {
            TokenKind::Eof => break,
            TokenKind::Comma => {
                tokens.next();
            }
            TokenKind::Word
                if is_keyword_separator(env, tokens.peek().kind) =>
            {
                let token = tokens.next();
                tokens.next(); // : or =
                let value = parse_primitive(env, tokens)?;
                args.push(FilterArg::Keyword {
                    name: token.value.clone(),
                    token,
                    value,
                });
            }
            _ => {
                args.push(FilterArg::Positional(parse_primitive(
                    env, tokens,
                )?));
            }
        }
    }
    Ok(args)
}

fn is_keyword_separator(env: &Environment, kind: TokenKind) -> bool {
    kind == TokenKind::Colon
        || (env.keyword_assignment && kind == TokenKind::Assign)
}

/// Can this token begin a filter argument? Used to detect missing commas.
fn is_filter_token(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Integer
            | TokenKind::Float
            | TokenKind::String
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Nil
            | TokenKind::Null
            | TokenKind::RangeLiteral
            | TokenKind::LBracket
            | TokenKind::LParen
            | TokenKind::Word
    )
}

/// Parse a `| name (: args)?` filter chain. With `with_double_pipe`, `||`
/// also continues the chain (the tail filters of a ternary expression).
fn parse_filters(
    env: &Environment,
    tokens: &mut TokenStream,
    with_double_pipe: bool,
) -> Result<Vec<FilterCall>, Error> {
    let mut filters = Vec::new();

    while tokens.current().kind == TokenKind::Pipe
        || (with_double_pipe
            && tokens.current().kind == TokenKind::DoublePipe)
    {
        tokens.next();
        let token = tokens.eat(TokenKind::Word)?;
        let name = token.value.clone();
        let mut args = Vec::new();

        if tokens.current().kind != TokenKind::Colon {
            filters.push(FilterCall { token, name, args });
            continue;
        }
        tokens.eat(TokenKind::Colon)?;

        loop {
            let current = tokens.current().clone();
            match current.kind {
                TokenKind::Word
                    if is_keyword_separator(env, tokens.peek().kind) =>
                {
                    let keyword = tokens.next();
                    tokens.next(); // : or =
                    let value = parse_primitive(env, tokens)?;
                    args.push(FilterArg::Keyword {
                        name: keyword.value.clone(),
                        token: keyword,
                        value,
                    });
                    expect_comma_between_arguments(tokens)?;
                }
                kind if is_filter_token(kind) => {
                    args.push(FilterArg::Positional(parse_primitive(
                        env, tokens,
                    )?));
                    expect_comma_between_arguments(tokens)?;
                }
                TokenKind::Comma => {
                    // Two consecutive commas are a syntax error in strict
                    // mode; trailing commas are always permitted
                    if env.mode == Mode::Strict
                        && tokens.peek().kind == TokenKind::Comma
                    {
                        return Err(tokens.peek().syntax_error(
                            "expected a comma separated list of arguments, \
                             found ','",
                        ));
                    }
                    tokens.next();
                }
                _ => break,
            }
        }
        filters.push(FilterCall { token, name, args });
    }

    Ok(filters)
}

fn expect_comma_between_arguments(
    tokens: &mut TokenStream,
) -> Result<(), Error> {
    if is_filter_token(tokens.current().kind) {
        return Err(tokens.current().syntax_error(format!(
            "expected a comma separated list of arguments, found {}",
            tokens.current().kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{expression::lexer, test_util::assert_err};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::Arc;

    fn stream(text: &str) -> TokenStream {
        let source: Arc<str> = text.into();
        let tokens = lexer::tokenize(text, 0, &source).unwrap();
        TokenStream::new(tokens, &source, text.len())
    }

    fn env() -> Environment {
        Environment::default()
    }

    fn parens_env() -> Environment {
        Environment::builder().logical_parens(true).build()
    }

    /// Parse a filtered expression and check its canonical display form.
    /// Displaying exercises the whole parsed tree, so this covers structure
    /// without enumerating node shapes.
    #[rstest]
    #[case::word("name", "name")]
    #[case::string_literal("'s'", "'s'")]
    #[case::integer("42", "42")]
    #[case::negative_float("-1.5", "-1.5")]
    #[case::nil_keyword("nil", "nil")]
    #[case::null_is_nil("null", "nil")]
    #[case::path_dotted("a.b.c", "a.b.c")]
    #[case::path_index("a[0].b", "a[0].b")]
    #[case::path_negative_index("a[-1]", "a[-1]")]
    #[case::path_quoted("a[\"b c\"]", "a['b c']")]
    #[case::path_nested("a[b.c]", "a[b.c]")]
    #[case::path_bracket_root("[\"a b\"].c", "a b.c")]
    #[case::range("(1..5)", "(1..5)")]
    #[case::range_paths("(a..b.c)", "(a..b.c)")]
    #[case::single_filter("name | upcase", "name | upcase")]
    #[case::filter_args(
        "name | append: '!', 5",
        "name | append: '!', 5"
    )]
    #[case::filter_keyword_args(
        "a | slice: offset_by: 2, length: 3",
        "a | slice: offset_by: 2, length: 3"
    )]
    #[case::filter_chain(
        "name | strip | upcase | append: '!'",
        "name | strip | upcase | append: '!'"
    )]
    #[case::trailing_comma("a | join: ', ',", "a | join: ', '")]
    #[case::ternary("'foo' if x else 'bar'", "'foo' if x else 'bar'")]
    #[case::ternary_no_else("'foo' if x", "'foo' if x")]
    #[case::ternary_condition(
        "a if b == 1 and c",
        "a if b == 1 and c"
    )]
    #[case::ternary_tail_filters(
        "'foo' if x else 'bar' || upcase | append: '!'",
        "'foo' if x else 'bar' || upcase | append: '!'"
    )]
    #[case::ternary_alternative_filters(
        "a if x else b | upcase || downcase",
        "a if x else b | upcase || downcase"
    )]
    fn test_parse_filtered(#[case] text: &str, #[case] expected: &str) {
        let parsed = parse_filtered(&env(), &mut stream(text)).unwrap();
        assert_eq!(parsed.to_string(), expected);
    }

    #[rstest]
    #[case::lone_pipe("a |", "expected word, found end of expression")]
    #[case::missing_expression("| upcase", "expected a primitive")]
    #[case::missing_comma(
        "a | append: 'x' 'y'",
        "expected a comma separated list of arguments"
    )]
    #[case::double_comma(
        "a | append: 'x',, 'y'",
        "expected a comma separated list of arguments"
    )]
    #[case::unbalanced_range("(1..3", "expected ')'")]
    #[case::trailing_garbage("a b", "expected end of expression")]
    fn test_parse_filtered_errors(
        #[case] text: &str,
        #[case] expected: &str,
    ) {
        assert_err!(parse_filtered(&env(), &mut stream(text)), expected);
    }

    #[rstest]
    #[case::comparison("a == 1", "a == 1")]
    #[case::diamond_is_ne("a <> 1", "a != 1")]
    #[case::membership("a contains 'x'", "a contains 'x'")]
    #[case::logical_right_associative(
        "a and b or c",
        "a and b or c"
    )]
    #[case::relational_binds_tighter(
        "a == 1 and b > 2",
        "a == 1 and b > 2"
    )]
    fn test_parse_boolean(#[case] text: &str, #[case] expected: &str) {
        let mut tokens = stream(text);
        let parsed = parse_boolean(&env(), &mut tokens).unwrap();
        tokens.eat(TokenKind::Eof).unwrap();
        assert_eq!(parsed.to_string(), expected);
    }

    /// `and`/`or` associate to the right
    #[test]
    fn test_logical_associativity() {
        let parsed =
            parse_boolean(&env(), &mut stream("a and b and c")).unwrap();
        let Expression::And { left, right, .. } = parsed else {
            panic!("expected top-level and, got {parsed}");
        };
        assert_eq!(left.to_string(), "a");
        assert_eq!(right.to_string(), "b and c");
    }

    #[test]
    fn test_not_requires_nonstandard_dialect() {
        assert_err!(
            parse_boolean(&env(), &mut stream("not a")),
            "expected a primitive expression"
        );
        let parsed =
            parse_boolean(&parens_env(), &mut stream("not a")).unwrap();
        assert_eq!(parsed.to_string(), "not a");
    }

    #[test]
    fn test_grouping_parens() {
        let parsed = parse_boolean(
            &parens_env(),
            &mut stream("(a or b) and c"),
        )
        .unwrap();
        let Expression::And { left, right, .. } = parsed else {
            panic!("expected top-level and");
        };
        assert_eq!(left.to_string(), "a or b");
        assert_eq!(right.to_string(), "c");
    }

    /// In the non-standard dialect a parenthesized range literal must still
    /// parse as a range, not as a grouping paren
    #[test]
    fn test_range_literal_in_boolean_dialect() {
        let parsed = parse_boolean(
            &parens_env(),
            &mut stream("(1..3) contains 2"),
        )
        .unwrap();
        assert_eq!(parsed.to_string(), "(1..3) contains 2");
    }

    #[rstest]
    #[case::plain("x in items", "x in items")]
    #[case::range("i in (1..4)", "i in (1..4)")]
    #[case::limit_offset(
        "item in items limit: 2 offset: 1",
        "item in items limit: 2 offset: 1"
    )]
    #[case::offset_continue(
        "item in items offset: continue",
        "item in items offset: continue"
    )]
    #[case::reversed("x in items reversed", "x in items reversed")]
    #[case::comma_separated(
        "x in items, limit: 2, reversed",
        "x in items limit: 2 reversed"
    )]
    #[case::cols("x in items cols: 3", "x in items cols: 3")]
    #[case::string_limit("x in items limit: '2'", "x in items limit: 2")]
    fn test_parse_loop(#[case] text: &str, #[case] expected: &str) {
        let parsed = parse_loop(&env(), &mut stream(text)).unwrap();
        assert_eq!(parsed.to_string(), expected);
    }

    #[rstest]
    #[case::missing_in("x items", "expected 'in'")]
    #[case::integer_iterable("x in 5", "invalid loop expression")]
    #[case::bad_string_limit(
        "x in items limit: 'two'",
        "invalid integer argument 'two'"
    )]
    #[case::unexpected_word("x in items banana", "unexpected 'banana'")]
    fn test_parse_loop_errors(#[case] text: &str, #[case] expected: &str) {
        assert_err!(parse_loop(&env(), &mut stream(text)), expected);
    }

    #[test]
    fn test_loop_identity_key() {
        let parsed =
            parse_loop(&env(), &mut stream("x in a.b limit: 2")).unwrap();
        assert_eq!(parsed.identity_key(), "x:a.b");
    }

    #[test]
    fn test_parse_identifier_rejects_question_mark_targets() {
        let mut tokens = stream("valid?");
        assert_err!(
            parse_identifier(&env(), &mut tokens, false),
            "invalid identifier"
        );
        let mut tokens = stream("valid?");
        let identifier =
            parse_identifier(&env(), &mut tokens, true).unwrap();
        assert_eq!(identifier.name, "valid?");
    }

    #[test]
    fn test_parse_arguments_mixed() {
        let mut tokens = stream("'snippet', a: 1, b: x.y");
        let args = parse_arguments(&env(), &mut tokens).unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].name(), None);
        assert_eq!(args[1].name(), Some("a"));
        assert_eq!(args[2].name(), Some("b"));
        assert_eq!(args[2].value().to_string(), "x.y");
    }

    /// The `=` keyword separator is only recognized when the environment
    /// enables it
    #[test]
    fn test_keyword_assignment_option() {
        let enabled = Environment::builder().keyword_assignment(true).build();
        let args =
            parse_arguments(&enabled, &mut stream("a = 1")).unwrap();
        assert_eq!(args[0].name(), Some("a"));

        // Without the option, `a` parses as a positional path and `= 1`
        // is trailing garbage
        let mut tokens = stream("a = 1");
        parse_arguments(&env(), &mut tokens).unwrap_err();
    }
}
