//! The template parser: walks the template-level token stream, dispatches
//! TAG tokens to registered tag parsers and assembles the statement tree.
//!
//! Expression text reaches this parser as raw EXPRESSION tokens. The three
//! hot expression families (output/filtered, boolean, loop) go through the
//! environment's expression cache when one is configured, keyed by the raw
//! expression text.

use crate::{
    environment::Environment,
    error::Error,
    expression::{
        self, Expression, FilteredExpression, LoopExpression,
        parser as expressions,
    },
    tag::{OutputStatement, Statement},
    token::{Token, TokenKind, TokenStream},
};
use std::sync::Arc;

/// Parse template source into a statement tree. Parsing is all-or-nothing:
/// any syntax error aborts with no partial tree.
pub(crate) fn parse(
    env: &Environment,
    source: &Arc<str>,
) -> Result<Vec<Statement>, Error> {
    let tokens = crate::lexer::tokenize(source, env)?;
    let mut parser = TemplateParser {
        env,
        source: Arc::clone(source),
        stream: TokenStream::new(tokens, source, source.len()),
    };
    let (nodes, _) = parser.parse_statements(&[])?;
    Ok(nodes)
}

/// Parser state handed to tag implementations while their statement is
/// being built
pub struct TemplateParser<'env> {
    env: &'env Environment,
    source: Arc<str>,
    stream: TokenStream,
}

impl<'env> TemplateParser<'env> {
    pub fn env(&self) -> &'env Environment {
        self.env
    }

    /// Parse statements until one of `end_tags` (or end of input when the
    /// set is empty). The matched end TAG token is consumed and returned;
    /// any expression it carries is left for the caller.
    fn parse_statements(
        &mut self,
        end_tags: &[&str],
    ) -> Result<(Vec<Statement>, Option<Token>), Error> {
        let mut nodes = Vec::new();
        loop {
            let token = self.stream.next();
            match token.kind {
                TokenKind::Eof => {
                    if let [.., last] = end_tags {
                        return Err(token.syntax_error(format!(
                            "expected tag '{last}', found end of file"
                        )));
                    }
                    return Ok((nodes, None));
                }
                TokenKind::Content => {
                    nodes.push(Statement::Content { text: token.value });
                }
                TokenKind::Output => {
                    let expression =
                        self.parse_filtered_expression(&token)?;
                    nodes.push(Statement::Output(OutputStatement {
                        token,
                        expression,
                    }));
                }
                TokenKind::Doc => {
                    nodes.push(Statement::Doc(crate::tag::DocTag {
                        text: token.value.clone(),
                        token,
                    }));
                }
                TokenKind::Comment => {
                    nodes.push(Statement::Comment(crate::tag::CommentTag {
                        text: token.value.clone(),
                        token,
                        inline: false,
                    }));
                }
                TokenKind::Tag => {
                    if end_tags.contains(&token.value.as_str()) {
                        return Ok((nodes, Some(token)));
                    }
                    let Some(tag) = self.env.tags.get(&token.value) else {
                        let message = if token.value.is_empty() {
                            "missing tag name".to_owned()
                        } else {
                            format!("unexpected tag '{}'", token.value)
                        };
                        return Err(token.syntax_error(message));
                    };
                    let tag = Arc::clone(tag);
                    nodes.push(tag.parse(token, self)?);
                }
                // A tag parser left its expression unconsumed, which means
                // the tag took arguments it shouldn't have
                TokenKind::Expression => {
                    return Err(token.syntax_error("unexpected expression"));
                }
                kind => {
                    return Err(Error::Internal(format!(
                        "unexpected {kind} token at template level"
                    )));
                }
            }
        }
    }

    /// Parse a block body up to one of `end_tags`, which must match before
    /// end of input
    pub fn parse_block(
        &mut self,
        end_tags: &[&str],
    ) -> Result<(Vec<Statement>, Token), Error> {
        let (nodes, end) = self.parse_statements(end_tags)?;
        let end = end.ok_or_else(|| {
            Error::Internal("block parse ended without an end tag".into())
        })?;
        Ok((nodes, end))
    }

    /// Tokenize the pending EXPRESSION token into an expression-level
    /// stream. Errors at the tag's location when no expression is present.
    pub fn expect_expression(
        &mut self,
        tag: &Token,
    ) -> Result<TokenStream, Error> {
        match self.take_expression()? {
            Some(stream) => Ok(stream),
            None => Err(tag.syntax_error("expected an expression")),
        }
    }

    /// Like [Self::expect_expression], for tags whose expression is
    /// optional
    pub fn optional_expression(
        &mut self,
    ) -> Result<Option<TokenStream>, Error> {
        self.take_expression()
    }

    fn take_expression(&mut self) -> Result<Option<TokenStream>, Error> {
        if self.stream.current().kind != TokenKind::Expression {
            return Ok(None);
        }
        let token = self.stream.next();
        self.expression_stream(&token).map(Some)
    }

    fn expression_stream(
        &self,
        token: &Token,
    ) -> Result<TokenStream, Error> {
        let tokens = expression::lexer::tokenize(
            &token.value,
            token.start,
            &self.source,
        )?;
        Ok(TokenStream::new(
            tokens,
            &self.source,
            token.start + token.value.len(),
        ))
    }

    /// Discard the pending expression, if any
    pub fn skip_expression(&mut self) {
        if self.stream.current().kind == TokenKind::Expression {
            self.stream.next();
        }
    }

    /// Consume the pending expression and return its raw text, or an empty
    /// string when there is none. Used by the inline comment tag, whose
    /// "expression" is free text.
    pub fn take_expression_text(&mut self) -> String {
        if self.stream.current().kind == TokenKind::Expression {
            self.stream.next().value
        } else {
            String::new()
        }
    }

    /// Error if the tag was given an expression; for tags that take no
    /// arguments
    pub fn no_expression(&mut self, tag: &Token) -> Result<(), Error> {
        if self.stream.current().kind == TokenKind::Expression {
            return Err(self.stream.current().syntax_error(format!(
                "'{}' takes no arguments",
                tag.value
            )));
        }
        Ok(())
    }

    /// Consume a template-level token of the given kind
    pub fn eat_token(&mut self, kind: TokenKind) -> Result<Token, Error> {
        self.stream.eat(kind)
    }

    /// Parse the pending expression as a filtered expression, through the
    /// expression cache when enabled
    pub fn parse_filtered_expression(
        &mut self,
        tag: &Token,
    ) -> Result<FilteredExpression, Error> {
        let token = match self.stream.current().kind {
            TokenKind::Expression => self.stream.next(),
            _ => return Err(tag.syntax_error("expected an expression")),
        };
        if let Some(caches) = &self.env.expression_cache
            && let Some(hit) = caches.get_filtered(&token.value)
        {
            return Ok(hit);
        }
        let mut stream = self.expression_stream(&token)?;
        let expression = expressions::parse_filtered(self.env, &mut stream)?;
        self.validate_filters(&expression)?;
        if let Some(caches) = &self.env.expression_cache {
            caches.store_filtered(&token.value, &expression);
        }
        Ok(expression)
    }

    /// Parse the pending expression as a boolean expression (consuming
    /// through end of expression), through the expression cache when
    /// enabled
    pub fn parse_boolean_expression(
        &mut self,
        tag: &Token,
    ) -> Result<Expression, Error> {
        let token = match self.stream.current().kind {
            TokenKind::Expression => self.stream.next(),
            _ => return Err(tag.syntax_error("expected an expression")),
        };
        if let Some(caches) = &self.env.expression_cache
            && let Some(hit) = caches.get_boolean(&token.value)
        {
            return Ok(hit);
        }
        let mut stream = self.expression_stream(&token)?;
        let expression = expressions::parse_boolean(self.env, &mut stream)?;
        stream.eat(TokenKind::Eof)?;
        if let Some(caches) = &self.env.expression_cache {
            caches.store_boolean(&token.value, &expression);
        }
        Ok(expression)
    }

    /// Parse the pending expression as a loop expression, through the
    /// expression cache when enabled
    pub fn parse_loop_expression(
        &mut self,
        tag: &Token,
    ) -> Result<LoopExpression, Error> {
        let token = match self.stream.current().kind {
            TokenKind::Expression => self.stream.next(),
            _ => return Err(tag.syntax_error("expected an expression")),
        };
        if let Some(caches) = &self.env.expression_cache
            && let Some(hit) = caches.get_loop(&token.value)
        {
            return Ok(hit);
        }
        let mut stream = self.expression_stream(&token)?;
        let expression = expressions::parse_loop(self.env, &mut stream)?;
        if let Some(caches) = &self.env.expression_cache {
            caches.store_loop(&token.value, &expression);
        }
        Ok(expression)
    }

    /// Run each known filter's static validation hook over a parsed
    /// filtered expression. Unknown filters are left for render time,
    /// where `strict_filters` decides their fate.
    pub fn validate_filters(
        &self,
        expression: &FilteredExpression,
    ) -> Result<(), Error> {
        let ternary_filters = expression.ternary.iter().flat_map(|t| {
            t.alternative_filters.iter().chain(&t.tail_filters)
        });
        for call in expression.filters.iter().chain(ternary_filters) {
            if let Some(filter) = self.env.filters.get(&call.name) {
                filter.validate(
                    self.env,
                    &call.token,
                    &call.name,
                    &call.args,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::{assert_err, render};
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::unknown_tag("{% bogus %}", "unexpected tag 'bogus'")]
    #[case::missing_tag_name("{% %}", "missing tag name")]
    #[case::stray_end_tag("{% endfor %}", "unexpected tag 'endfor'")]
    #[case::empty_output("{{ }}", "expected a primitive expression")]
    #[case::tag_with_unwanted_args(
        "{% for x in (1..2) %}{% break 1 %}{% endfor %}",
        "'break' takes no arguments"
    )]
    #[case::assign_missing_expression(
        "{% assign %}",
        "expected an expression"
    )]
    fn test_parse_errors(#[case] template: &str, #[case] expected: &str) {
        assert_err!(render(template, json!({})), expected);
    }

    /// Parse errors carry a location pointing into the original source
    #[test]
    fn test_error_location() {
        let error = render("line one\n{{ 5 | }}", json!({})).unwrap_err();
        let location = error.location().expect("error should have location");
        assert_eq!(location.line_col(), (2, 7));
        assert!(error.detail().contains("^"), "{}", error.detail());
    }
}
