//! Conditional tags: `if`, `unless` and `case`

use crate::{
    context::{Output, RenderContext},
    error::Error,
    expression::{Expression, parser},
    parser::TemplateParser,
    tag::{Flow, Statement, Tag, render_block},
    token::{Token, TokenKind},
};

/// `{% if %} … {% elsif %} … {% else %} … {% endif %}`
pub struct If;

impl Tag for If {
    fn name(&self) -> &'static str {
        "if"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        parse_conditional(token, parser, false, "endif")
    }
}

/// `{% unless %}`: `if` with the first condition inverted. `elsif` and
/// `else` branches behave exactly as they do under `if`.
pub struct Unless;

impl Tag for Unless {
    fn name(&self) -> &'static str {
        "unless"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        parse_conditional(token, parser, true, "endunless")
    }
}

fn parse_conditional(
    token: Token,
    parser: &mut TemplateParser<'_>,
    negate_first: bool,
    end_tag: &'static str,
) -> Result<Statement, Error> {
    let condition = parser.parse_boolean_expression(&token)?;
    let (body, mut end) =
        parser.parse_block(&["elsif", "else", end_tag])?;
    let mut branches = vec![ConditionalBranch {
        token: token.clone(),
        condition,
        body,
    }];
    let mut else_body = None;

    while end.value == "elsif" {
        let condition = parser.parse_boolean_expression(&end)?;
        let (body, next_end) =
            parser.parse_block(&["elsif", "else", end_tag])?;
        branches.push(ConditionalBranch {
            token: end,
            condition,
            body,
        });
        end = next_end;
    }
    if end.value == "else" {
        let (body, _) = parser.parse_block(&[end_tag])?;
        else_body = Some(body);
    }

    Ok(Statement::Conditional(ConditionalTag {
        token,
        negate_first,
        branches,
        else_body,
    }))
}

/// One `if`/`elsif` arm
#[derive(Clone, Debug)]
pub struct ConditionalBranch {
    pub token: Token,
    pub condition: Expression,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub struct ConditionalTag {
    pub token: Token,
    /// Set for `unless`: the first branch renders when its condition is
    /// falsy
    pub negate_first: bool,
    pub branches: Vec<ConditionalBranch>,
    pub else_body: Option<Vec<Statement>>,
}

impl ConditionalTag {
    pub(crate) async fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        for (i, branch) in self.branches.iter().enumerate() {
            let condition = branch.condition.evaluate(ctx)?;
            let mut truthy = ctx.truthy(&condition, &branch.token)?;
            if i == 0 && self.negate_first {
                truthy = !truthy;
            }
            if truthy {
                return render_block(&branch.body, ctx, out).await;
            }
        }
        if let Some(else_body) = &self.else_body {
            return render_block(else_body, ctx, out).await;
        }
        Ok(Flow::Normal)
    }
}

/// `{% case subject %} {% when a, b %} … {% else %} … {% endcase %}`
pub struct Case;

impl Tag for Case {
    fn name(&self) -> &'static str {
        "case"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let env = parser.env();
        let mut tokens = parser.expect_expression(&token)?;
        let subject = parser::parse_primitive(env, &mut tokens)?;
        tokens.eat(TokenKind::Eof)?;

        // Anything between `case` and the first `when` is discarded
        let (_, mut end) =
            parser.parse_block(&["when", "else", "endcase"])?;

        let mut whens = Vec::new();
        let mut else_body = None;
        while end.value == "when" {
            let mut values = Vec::new();
            let mut tokens = parser.expect_expression(&end)?;
            loop {
                values.push(parser::parse_primitive(env, &mut tokens)?);
                match tokens.current().kind {
                    // `when` alternatives separate with commas or `or`
                    TokenKind::Comma | TokenKind::Or => {
                        tokens.next();
                    }
                    _ => break,
                }
            }
            tokens.eat(TokenKind::Eof)?;
            let (body, next_end) =
                parser.parse_block(&["when", "else", "endcase"])?;
            whens.push(WhenBranch {
                token: end,
                values,
                body,
            });
            end = next_end;
        }
        if end.value == "else" {
            let (body, _) = parser.parse_block(&["endcase"])?;
            else_body = Some(body);
        }

        Ok(Statement::Case(CaseTag {
            token,
            subject,
            whens,
            else_body,
        }))
    }
}

/// One `when` arm with its comma/`or`-separated alternatives
#[derive(Clone, Debug)]
pub struct WhenBranch {
    pub token: Token,
    pub values: Vec<Expression>,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub struct CaseTag {
    pub token: Token,
    pub subject: Expression,
    pub whens: Vec<WhenBranch>,
    pub else_body: Option<Vec<Statement>>,
}

impl CaseTag {
    pub(crate) async fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        // The subject evaluates once, not once per branch
        let subject = self.subject.evaluate(ctx)?;
        for when in &self.whens {
            for value in &when.values {
                if subject == value.evaluate(ctx)? {
                    // Only the first matching branch renders
                    return render_block(&when.body, ctx, out).await;
                }
            }
        }
        if let Some(else_body) = &self.else_body {
            return render_block(else_body, ctx, out).await;
        }
        Ok(Flow::Normal)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::{assert_err, render};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::taken("{% if true %}yes{% endif %}", "yes")]
    #[case::not_taken("{% if false %}yes{% endif %}", "")]
    #[case::else_branch("{% if false %}a{% else %}b{% endif %}", "b")]
    #[case::elsif(
        "{% if x == 1 %}one{% elsif x == 2 %}two{% else %}many{% endif %}",
        "two"
    )]
    #[case::comparison("{% if x >= 2 %}big{% endif %}", "big")]
    #[case::logical(
        "{% if x == 2 and missing %}a{% else %}b{% endif %}",
        "b"
    )]
    #[case::truthy_empty_string(
        "{% if empty_string %}truthy{% endif %}",
        "truthy"
    )]
    #[case::nested(
        "{% if true %}{% if false %}a{% else %}b{% endif %}{% endif %}",
        "b"
    )]
    fn test_if(#[case] template: &str, #[case] expected: &str) {
        let globals = json!({"x": 2, "empty_string": ""});
        assert_eq!(render(template, globals).unwrap(), expected);
    }

    #[rstest]
    #[case::falsy_renders("{% unless false %}yes{% endunless %}", "yes")]
    #[case::truthy_skips("{% unless true %}yes{% endunless %}", "")]
    #[case::with_else(
        "{% unless x %}a{% else %}b{% endunless %}",
        "b"
    )]
    #[case::elsif_not_negated(
        "{% unless x %}a{% elsif x == 2 %}b{% endunless %}",
        "b"
    )]
    fn test_unless(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(render(template, json!({"x": 2})).unwrap(), expected);
    }

    #[rstest]
    #[case::match_first(
        "{% case x %}{% when 1 %}one{% when 2 %}two{% endcase %}",
        "two"
    )]
    #[case::multiple_values(
        "{% case x %}{% when 1, 2 %}low{% when 3 %}three{% endcase %}",
        "low"
    )]
    #[case::or_separator(
        "{% case x %}{% when 1 or 2 %}low{% endcase %}",
        "low"
    )]
    #[case::else_branch(
        "{% case x %}{% when 9 %}nine{% else %}other{% endcase %}",
        "other"
    )]
    #[case::no_match_no_else(
        "{% case x %}{% when 9 %}nine{% endcase %}",
        ""
    )]
    #[case::only_first_match_renders(
        "{% case x %}{% when 2 %}a{% when 2 %}b{% endcase %}",
        "a"
    )]
    #[case::string_subject(
        "{% case kind %}{% when 'shirt' %}S{% when 'mug' %}M{% endcase %}",
        "M"
    )]
    fn test_case(#[case] template: &str, #[case] expected: &str) {
        let globals = json!({"x": 2, "kind": "mug"});
        assert_eq!(render(template, globals).unwrap(), expected);
    }

    #[rstest]
    #[case::unclosed_if(
        "{% if true %}a",
        "expected tag 'endif', found end of file"
    )]
    #[case::stray_endif("a{% endif %}", "unexpected tag 'endif'")]
    #[case::else_then_elsif(
        "{% if true %}a{% else %}b{% elsif false %}c{% endif %}",
        "unexpected tag 'elsif'"
    )]
    fn test_errors(#[case] template: &str, #[case] expected: &str) {
        assert_err!(render(template, json!({})), expected);
    }
}
