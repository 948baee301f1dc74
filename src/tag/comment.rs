//! Comments and documentation blocks. All of these render nothing; their
//! content is preserved on the node for tooling.

use crate::{
    error::Error,
    parser::TemplateParser,
    tag::{Statement, Tag},
    token::{Token, TokenKind},
};

/// `{% comment %} … {% endcomment %}`. The lexer collects the body
/// (tracking nested comment blocks by depth) into a single COMMENT token;
/// this parser just picks up the pieces.
pub struct Comment;

impl Tag for Comment {
    fn name(&self) -> &'static str {
        "comment"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        // A comment tag may carry an expression, e.g. `{% comment note %}`
        parser.skip_expression();
        let text = parser.eat_token(TokenKind::Comment)?.value;
        let end = parser.eat_token(TokenKind::Tag)?;
        if end.value != "endcomment" {
            return Err(end.syntax_error("expected 'endcomment'"));
        }
        Ok(Statement::Comment(CommentTag {
            token,
            text,
            inline: false,
        }))
    }
}

/// The inline comment tag: `{% # anything until the closer %}`
pub struct InlineComment;

impl Tag for InlineComment {
    fn name(&self) -> &'static str {
        "#"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let text = parser.take_expression_text();
        Ok(Statement::Comment(CommentTag {
            token,
            text,
            inline: true,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct CommentTag {
    pub token: Token,
    /// The comment body, verbatim
    pub text: String,
    /// Inline `{% # … %}` rather than a block comment
    pub inline: bool,
}

/// `{% doc %} … {% enddoc %}`: structured documentation, skipped at render
/// time. The lexer emits the body as one DOC token; the template parser
/// builds the node directly without involving the tag registry.
#[derive(Clone, Debug)]
pub struct DocTag {
    pub token: Token,
    pub text: String,
}
