//! Assignment-family tags: `assign`, `capture`, `echo`, `increment` and
//! `decrement`

use crate::{
    context::{Output, RenderContext},
    error::Error,
    expression::{FilteredExpression, Identifier, parser},
    parser::TemplateParser,
    tag::{Flow, Statement, Tag, render_block, write_value},
    token::{Token, TokenKind},
};

/// `{% assign target = expression %}`
pub struct Assign;

impl Tag for Assign {
    fn name(&self) -> &'static str {
        "assign"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let env = parser.env();
        let mut tokens = parser.expect_expression(&token)?;
        // Assignment targets must be plain words; the trailing `?` legal
        // elsewhere is rejected here
        let target = parser::parse_identifier(env, &mut tokens, false)?;
        tokens.eat(TokenKind::Assign)?;
        let expression = parser::parse_filtered(env, &mut tokens)?;
        parser.validate_filters(&expression)?;
        Ok(Statement::Assign(AssignTag {
            token,
            target,
            expression,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct AssignTag {
    pub token: Token,
    pub target: Identifier,
    pub expression: FilteredExpression,
}

impl AssignTag {
    pub(crate) fn render(
        &self,
        ctx: &mut RenderContext<'_>,
    ) -> Result<Flow, Error> {
        let value = self.expression.evaluate(ctx)?;
        ctx.assign(&self.target.name, value)?;
        Ok(Flow::Normal)
    }
}

/// `{% capture name %}…{% endcapture %}`: render the body to a side buffer
/// and assign the result
pub struct Capture;

impl Tag for Capture {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let env = parser.env();
        let mut tokens = parser.expect_expression(&token)?;
        let target = parser::parse_identifier(env, &mut tokens, true)?;
        tokens.eat(TokenKind::Eof)?;
        let (body, _) = parser.parse_block(&["endcapture"])?;
        Ok(Statement::Capture(CaptureTag {
            token,
            target,
            body,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct CaptureTag {
    pub token: Token,
    pub target: Identifier,
    pub body: Vec<Statement>,
}

impl CaptureTag {
    pub(crate) async fn render(
        &self,
        ctx: &mut RenderContext<'_>,
    ) -> Result<Flow, Error> {
        // Captured text is bounded by the namespace limit on assignment,
        // not the output stream limit
        let mut buffer = Output::unlimited();
        let flow = render_block(&self.body, ctx, &mut buffer).await?;
        ctx.assign(&self.target.name, buffer.into_string().into())?;
        Ok(flow)
    }
}

/// `{% echo expression %}`: the tag spelling of an output statement
pub struct Echo;

impl Tag for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let env = parser.env();
        let mut tokens = parser.expect_expression(&token)?;
        let expression = parser::parse_filtered(env, &mut tokens)?;
        parser.validate_filters(&expression)?;
        Ok(Statement::Echo(EchoTag { token, expression }))
    }
}

#[derive(Clone, Debug)]
pub struct EchoTag {
    pub token: Token,
    pub expression: FilteredExpression,
}

impl EchoTag {
    pub(crate) fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let value = self.expression.evaluate(ctx)?;
        write_value(&value, ctx, &self.token, out)?;
        Ok(Flow::Normal)
    }
}

/// `{% increment name %}`: write the counter's current value, then step it
/// up. Counters live in their own namespace, apart from assigned locals.
pub struct Increment;

impl Tag for Increment {
    fn name(&self) -> &'static str {
        "increment"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let target = parse_counter_name(parser, &token)?;
        Ok(Statement::Increment(IncrementTag { token, target }))
    }
}

#[derive(Clone, Debug)]
pub struct IncrementTag {
    pub token: Token,
    pub target: Identifier,
}

impl IncrementTag {
    pub(crate) fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let value = ctx.increment(&self.target.name);
        out.write(&value.to_string())?;
        Ok(Flow::Normal)
    }
}

/// `{% decrement name %}`: step the counter down, then write it
pub struct Decrement;

impl Tag for Decrement {
    fn name(&self) -> &'static str {
        "decrement"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let target = parse_counter_name(parser, &token)?;
        Ok(Statement::Decrement(DecrementTag { token, target }))
    }
}

#[derive(Clone, Debug)]
pub struct DecrementTag {
    pub token: Token,
    pub target: Identifier,
}

impl DecrementTag {
    pub(crate) fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let value = ctx.decrement(&self.target.name);
        out.write(&value.to_string())?;
        Ok(Flow::Normal)
    }
}

fn parse_counter_name(
    parser: &mut TemplateParser<'_>,
    token: &Token,
) -> Result<Identifier, Error> {
    let env = parser.env();
    let mut tokens = parser.expect_expression(token)?;
    let target = parser::parse_identifier(env, &mut tokens, true)?;
    tokens.eat(TokenKind::Eof)?;
    Ok(target)
}
