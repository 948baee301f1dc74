//! Template inheritance: `{% extends %}` and `{% block %}`.
//!
//! A template carrying an `extends` tag contributes its named blocks and
//! then renders its parent instead of its own body. Overrides resolve
//! childmost-first across the inheritance chain; each hop counts against
//! the context depth limit. The chain is walked at render time by
//! `Template::render_nested`.

use crate::{
    context::{Output, RenderContext},
    error::Error,
    expression::{Expression, Identifier, Literal, parser},
    parser::TemplateParser,
    tag::{Flow, Statement, Tag, render_block},
    token::{Token, TokenKind},
};
use std::{collections::HashSet, sync::Arc};

/// `{% extends 'parent' %}`. The name must be a string literal so the
/// inheritance chain is statically known.
pub struct Extends;

impl Tag for Extends {
    fn name(&self) -> &'static str {
        "extends"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let env = parser.env();
        let mut tokens = parser.expect_expression(&token)?;
        let name_expression = parser::parse_primitive(env, &mut tokens)?;
        let Expression::Literal {
            value: Literal::String(name),
            ..
        } = &name_expression
        else {
            return Err(name_expression
                .token()
                .syntax_error("expected a string literal template name"));
        };
        let name = name.clone();
        tokens.eat(TokenKind::Eof)?;
        Ok(Statement::Extends(ExtendsTag { token, name }))
    }
}

#[derive(Clone, Debug)]
pub struct ExtendsTag {
    pub token: Token,
    pub name: String,
}

/// `{% block name (required)? %} … {% endblock (name)? %}`
pub struct Block;

impl Tag for Block {
    fn name(&self) -> &'static str {
        "block"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let env = parser.env();
        let mut tokens = parser.expect_expression(&token)?;
        let name = parser::parse_name(env, &mut tokens)?;
        let required = if tokens.current().kind == TokenKind::Required {
            tokens.next();
            true
        } else {
            false
        };
        tokens.eat(TokenKind::Eof)?;

        let (body, end) = parser.parse_block(&["endblock"])?;
        // `{% endblock name %}` may repeat the block name; a mismatch is
        // an inheritance error caught at parse time
        if let Some(mut end_tokens) = parser.optional_expression()? {
            let end_name = parser::parse_name(env, &mut end_tokens)?;
            end_tokens.eat(TokenKind::Eof)?;
            if end_name.name != name.name {
                return Err(Error::Inheritance {
                    message: format!(
                        "expected 'endblock {}', found 'endblock {}'",
                        name.name, end_name.name
                    ),
                    location: Some(end.location()),
                });
            }
        }

        Ok(Statement::Block(BlockTag {
            token,
            name,
            required,
            body: Arc::new(body),
        }))
    }
}

#[derive(Clone, Debug)]
pub struct BlockTag {
    pub token: Token,
    pub name: Identifier,
    /// A required block has no default body of its own and must be
    /// overridden by an extending template
    pub required: bool,
    /// Shared so child templates can donate their block bodies to the
    /// parent render without cloning statements
    pub body: Arc<Vec<Statement>>,
}

impl BlockTag {
    pub(crate) async fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        match ctx.block_override(&self.name.name) {
            Some(body) => render_block(&body, ctx, out).await,
            None if self.required => Err(Error::Inheritance {
                message: format!(
                    "block '{}' must be overridden",
                    self.name.name
                ),
                location: Some(self.token.location()),
            }),
            None => render_block(&self.body, ctx, out).await,
        }
    }
}

/// Walk a template's statements and register every block as an override
/// candidate. Duplicate block names within one template are an
/// inheritance error.
pub(crate) fn collect_blocks(
    statements: &[Statement],
    ctx: &mut RenderContext<'_>,
) -> Result<(), Error> {
    fn walk(
        statements: &[Statement],
        ctx: &mut RenderContext<'_>,
        seen: &mut HashSet<String>,
    ) -> Result<(), Error> {
        for statement in statements {
            if let Statement::Block(block) = statement {
                if !seen.insert(block.name.name.clone()) {
                    return Err(Error::Inheritance {
                        message: format!(
                            "duplicate block '{}'",
                            block.name.name
                        ),
                        location: Some(block.token.location()),
                    });
                }
                ctx.add_block_override(
                    block.name.name.clone(),
                    Arc::clone(&block.body),
                );
                walk(&block.body, ctx, seen)?;
            } else {
                for body in statement.children() {
                    walk(body, ctx, seen)?;
                }
            }
        }
        Ok(())
    }

    let mut seen = HashSet::new();
    walk(statements, ctx, &mut seen)
}

#[cfg(test)]
mod tests {
    use crate::{Environment, loader::DictLoader, test_util::assert_err};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn env_with(templates: &[(&str, &str)]) -> Environment {
        Environment::builder()
            .loader(Arc::new(DictLoader::from_iter(
                templates
                    .iter()
                    .map(|(name, source)| (*name, *source)),
            )))
            .build()
    }

    fn render(
        env: &Environment,
        name: &str,
        globals: serde_json::Value,
    ) -> Result<String, crate::Error> {
        let template = env.get_template(name)?;
        let crate::Value::Object(globals) = crate::Value::from_json(globals)
        else {
            panic!("globals must be an object");
        };
        template.render(env, globals)
    }

    #[test]
    fn test_child_overrides_parent_block() {
        let env = env_with(&[
            (
                "base",
                "header|{% block content %}default{% endblock %}|footer",
            ),
            (
                "child",
                "{% extends 'base' %}\
                 {% block content %}override{% endblock %}",
            ),
        ]);
        assert_eq!(
            render(&env, "child", json!({})).unwrap(),
            "header|override|footer"
        );
        // The parent renders its own default when used directly
        assert_eq!(
            render(&env, "base", json!({})).unwrap(),
            "header|default|footer"
        );
    }

    #[test]
    fn test_child_content_outside_blocks_is_dropped() {
        let env = env_with(&[
            ("base", "[{% block a %}A{% endblock %}]"),
            (
                "child",
                "ignored {% extends 'base' %} also ignored\
                 {% block a %}a{% endblock %}",
            ),
        ]);
        assert_eq!(render(&env, "child", json!({})).unwrap(), "[a]");
    }

    #[test]
    fn test_grandchild_wins() {
        let env = env_with(&[
            ("base", "{% block x %}base{% endblock %}"),
            (
                "middle",
                "{% extends 'base' %}{% block x %}middle{% endblock %}",
            ),
            (
                "leaf",
                "{% extends 'middle' %}{% block x %}leaf{% endblock %}",
            ),
        ]);
        assert_eq!(render(&env, "leaf", json!({})).unwrap(), "leaf");
    }

    #[test]
    fn test_unoverridden_blocks_keep_defaults() {
        let env = env_with(&[
            (
                "base",
                "{% block a %}A{% endblock %}-{% block b %}B{% endblock %}",
            ),
            (
                "child",
                "{% extends 'base' %}{% block b %}b!{% endblock %}",
            ),
        ]);
        assert_eq!(render(&env, "child", json!({})).unwrap(), "A-b!");
    }

    #[test]
    fn test_block_sees_render_context() {
        let env = env_with(&[
            ("base", "{% block greet %}{% endblock %}"),
            (
                "child",
                "{% extends 'base' %}\
                 {% block greet %}hi {{ name }}{% endblock %}",
            ),
        ]);
        assert_eq!(
            render(&env, "child", json!({"name": "ada"})).unwrap(),
            "hi ada"
        );
    }

    #[test]
    fn test_required_block() {
        let env = env_with(&[
            ("base", "{% block content required %}{% endblock %}"),
            (
                "good",
                "{% extends 'base' %}\
                 {% block content %}ok{% endblock %}",
            ),
        ]);
        assert_eq!(render(&env, "good", json!({})).unwrap(), "ok");
        assert_err!(
            render(&env, "base", json!({})),
            "block 'content' must be overridden"
        );
    }

    #[test]
    fn test_duplicate_blocks_rejected() {
        let env = env_with(&[
            ("base", "{% block a %}{% endblock %}"),
            (
                "child",
                "{% extends 'base' %}\
                 {% block a %}1{% endblock %}{% block a %}2{% endblock %}",
            ),
        ]);
        assert_err!(
            render(&env, "child", json!({})),
            "duplicate block 'a'"
        );
    }

    #[test]
    fn test_endblock_name_mismatch() {
        let env = env_with(&[]);
        assert_err!(
            env.parse("{% block a %}x{% endblock b %}"),
            "expected 'endblock a', found 'endblock b'"
        );
    }

    #[test]
    fn test_extends_missing_parent() {
        let env = env_with(&[]);
        assert_err!(
            render(&env, "nope", json!({})),
            "template not found 'nope'"
        );
        let env = env_with(&[("child", "{% extends 'ghost' %}")]);
        assert_err!(
            render(&env, "child", json!({})),
            "template not found 'ghost'"
        );
    }
}
