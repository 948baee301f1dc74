//! Template composition tags: `include` and `render`.
//!
//! Both resolve a template through the environment's loader at render
//! time. `include` shares the calling render context, pushing a scope for
//! its arguments; `render` builds an isolated context holding only globals
//! and the passed arguments. Each nested invocation counts against the
//! context depth limit.

use crate::{
    context::{Output, RenderContext},
    error::Error,
    expression::{
        Expression, FilterArg, Identifier, Literal, parser,
    },
    parser::TemplateParser,
    tag::{Flow, Statement, Tag, template_stem},
    token::{Token, TokenKind},
    value::Object,
};

/// `{% include 'name' (with|for expr (as alias)?)? (, key: value)* %}`
pub struct Include;

impl Tag for Include {
    fn name(&self) -> &'static str {
        "include"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let env = parser.env();
        let mut tokens = parser.expect_expression(&token)?;
        let name = parser::parse_string_or_path(env, &mut tokens)?;
        let bind = parse_bind(parser, &mut tokens)?;
        let args = parse_tag_arguments(parser, &mut tokens)?;
        tokens.eat(TokenKind::Eof)?;
        Ok(Statement::Include(IncludeTag {
            token,
            name,
            bind,
            args,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct IncludeTag {
    pub token: Token,
    pub name: Expression,
    pub bind: Option<Bind>,
    pub args: Vec<(Identifier, Expression)>,
}

impl IncludeTag {
    pub(crate) async fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let name = self.name.evaluate(ctx)?.render_string();
        let template = ctx
            .env()
            .get_template_async(&name)
            .await
            .map_err(|error| error.or_location(self.token.location()))?;

        ctx.enter_nested(&self.token)?;
        let mut scope = Object::new();
        for (key, value) in &self.args {
            scope.insert(key.name.clone(), value.evaluate(ctx)?);
        }

        let flow = match &self.bind {
            Some(bind) => {
                let alias = bind
                    .alias
                    .as_ref()
                    .map_or_else(|| template_stem(&name).to_owned(), |alias| {
                        alias.name.clone()
                    });
                let bound = bind.value.evaluate(ctx)?;
                match bind.kind {
                    BindKind::With => {
                        scope.insert(alias, bound);
                        ctx.push_scope(scope);
                        let flow =
                            template.render_nested(ctx, out).await;
                        ctx.pop_scope();
                        flow?
                    }
                    BindKind::For => {
                        // Bind each item in turn and render the target
                        // once per item
                        let items =
                            bound.iter_items().unwrap_or_else(|| vec![bound]);
                        ctx.push_scope(scope);
                        let mut flow = Flow::Normal;
                        for item in items {
                            ctx.tick_loop()?;
                            ctx.set_local(&alias, item);
                            match template.render_nested(ctx, out).await {
                                Ok(Flow::Break) => {
                                    flow = Flow::Break;
                                    break;
                                }
                                Ok(_) => {}
                                Err(error) => {
                                    ctx.pop_scope();
                                    ctx.exit_nested();
                                    return Err(error);
                                }
                            }
                        }
                        ctx.pop_scope();
                        flow
                    }
                }
            }
            None => {
                ctx.push_scope(scope);
                let flow = template.render_nested(ctx, out).await;
                ctx.pop_scope();
                flow?
            }
        };
        ctx.exit_nested();
        Ok(flow)
    }
}

/// `{% render 'name' … %}`: like `include`, but the target renders in an
/// isolated context and the template name must be a string literal so the
/// target is statically known
pub struct Render;

impl Tag for Render {
    fn name(&self) -> &'static str {
        "render"
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
        let bind = parse_bind(parser, &mut tokens)?;
        let args = parse_tag_arguments(parser, &mut tokens)?;
        tokens.eat(TokenKind::Eof)?;
        Ok(Statement::Render(RenderTag {
            token,
            name,
            bind,
            args,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct RenderTag {
    pub token: Token,
    pub name: String,
    pub bind: Option<Bind>,
    pub args: Vec<(Identifier, Expression)>,
}

impl RenderTag {
    pub(crate) async fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let template = ctx
            .env()
            .get_template_async(&self.name)
            .await
            .map_err(|error| error.or_location(self.token.location()))?;

        // Arguments evaluate in the calling context, then move into the
        // isolated child context
        let mut scope = Object::new();
        for (key, value) in &self.args {
            scope.insert(key.name.clone(), value.evaluate(ctx)?);
        }
        let bound = match &self.bind {
            Some(bind) => Some((
                bind.kind,
                bind.alias.as_ref().map_or_else(
                    || template_stem(&self.name).to_owned(),
                    |alias| alias.name.clone(),
                ),
                bind.value.evaluate(ctx)?,
            )),
            None => None,
        };

        let mut child =
            ctx.isolated(&self.token, Some(self.name.clone()))?;
        match bound {
            Some((BindKind::For, alias, value)) => {
                let items =
                    value.iter_items().unwrap_or_else(|| vec![value]);
                child.push_scope(scope);
                for item in items {
                    child.tick_loop()?;
                    child.set_local(&alias, item);
                    // Interrupts never escape an isolated render
                    template.render_nested(&mut child, out).await?;
                }
                child.pop_scope();
            }
            Some((BindKind::With, alias, value)) => {
                scope.insert(alias, value);
                child.push_scope(scope);
                template.render_nested(&mut child, out).await?;
                child.pop_scope();
            }
            None => {
                child.push_scope(scope);
                template.render_nested(&mut child, out).await?;
                child.pop_scope();
            }
        }
        ctx.absorb_child(&child);
        Ok(Flow::Normal)
    }
}

/// Which keyword bound the value in a `with`/`for` clause
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindKind {
    With,
    For,
}

/// The `with expr as alias` / `for expr as alias` clause of an
/// `include`/`render` tag
#[derive(Clone, Debug)]
pub struct Bind {
    pub kind: BindKind,
    pub value: Expression,
    pub alias: Option<Identifier>,
}

fn parse_bind(
    parser: &TemplateParser<'_>,
    tokens: &mut crate::token::TokenStream,
) -> Result<Option<Bind>, Error> {
    let kind = match tokens.current().kind {
        TokenKind::With => BindKind::With,
        TokenKind::For => BindKind::For,
        _ => return Ok(None),
    };
    tokens.next();
    let env = parser.env();
    let value = parser::parse_primitive(env, tokens)?;
    let alias = if tokens.current().kind == TokenKind::As {
        tokens.next();
        Some(parser::parse_identifier(env, tokens, true)?)
    } else {
        None
    };
    Ok(Some(Bind { kind, value, alias }))
}

/// Parse the trailing keyword arguments of an `include`/`render` tag.
/// Positional arguments are rejected; every argument binds a name in the
/// target's scope.
fn parse_tag_arguments(
    parser: &TemplateParser<'_>,
    tokens: &mut crate::token::TokenStream,
) -> Result<Vec<(Identifier, Expression)>, Error> {
    let args = parser::parse_arguments(parser.env(), tokens)?;
    args.into_iter()
        .map(|arg| match arg {
            FilterArg::Keyword { token, name, value } => {
                Ok((Identifier { token, name }, value))
            }
            FilterArg::Positional(value) => Err(value
                .token()
                .syntax_error("expected a named argument")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::{Environment, Object, loader::DictLoader, test_util::assert_err};
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
        source: &str,
        globals: serde_json::Value,
    ) -> Result<String, crate::Error> {
        let template = env.parse(source)?;
        let crate::Value::Object(globals) = crate::Value::from_json(globals)
        else {
            panic!("globals must be an object");
        };
        template.render(env, globals)
    }

    #[test]
    fn test_include_sees_outer_scope() {
        let env = env_with(&[("greeting", "Hello, {{ name }}!")]);
        assert_eq!(
            render(&env, "{% include 'greeting' %}", json!({"name": "Sal"}))
                .unwrap(),
            "Hello, Sal!"
        );
    }

    #[test]
    fn test_include_with_arguments() {
        let env = env_with(&[("pill", "[{{ label }}]")]);
        assert_eq!(
            render(
                &env,
                "{% include 'pill', label: 'new' %}\
                 {% include 'pill', label: thing %}",
                json!({"thing": "sale"})
            )
            .unwrap(),
            "[new][sale]"
        );
    }

    #[test]
    fn test_include_with_bound_value() {
        let env = env_with(&[("product", "{{ product.title }}")]);
        assert_eq!(
            render(
                &env,
                "{% include 'product' with products[1] %}",
                json!({"products": [{"title": "Mug"}, {"title": "Hat"}]})
            )
            .unwrap(),
            "Hat"
        );
    }

    #[test]
    fn test_include_for_iterates() {
        let env = env_with(&[("item", "({{ it }})")]);
        assert_eq!(
            render(
                &env,
                "{% include 'item' for things as it %}",
                json!({"things": [1, 2, 3]})
            )
            .unwrap(),
            "(1)(2)(3)"
        );
    }

    #[test]
    fn test_include_assign_leaks_to_parent() {
        // `include` shares the render context, so assignments escape
        let env = env_with(&[("setter", "{% assign x = 'from child' %}")]);
        assert_eq!(
            render(&env, "{% include 'setter' %}{{ x }}", json!({}))
                .unwrap(),
            "from child"
        );
    }

    #[test]
    fn test_render_is_isolated() {
        let env = env_with(&[
            ("shadow", "{{ name }}|{% assign y = 'leaked' %}"),
        ]);
        assert_eq!(
            render(
                &env,
                "{% render 'shadow' %}{{ y }}",
                json!({"name": "outer"})
            )
            .unwrap(),
            // Globals are visible inside `render`, template locals are
            // not shared in either direction
            "outer|"
        );
    }

    #[test]
    fn test_render_with_arguments_only() {
        let env = env_with(&[("card", "{{ title }}/{{ hidden }}")]);
        let outer = "{% assign hidden = 'x' %}\
                     {% render 'card', title: 'T' %}";
        assert_eq!(render(&env, outer, json!({})).unwrap(), "T/");
    }

    #[test]
    fn test_render_requires_literal_name() {
        let env = env_with(&[]);
        assert_err!(
            render(&env, "{% render partial %}", json!({})),
            "expected a string literal template name"
        );
    }

    #[test]
    fn test_missing_template() {
        let env = env_with(&[]);
        assert_err!(
            render(&env, "{% include 'nope' %}", json!({})),
            "template not found 'nope'"
        );
    }

    #[test]
    fn test_include_depth_limit() {
        let env = Environment::builder()
            .loader(Arc::new(DictLoader::from_iter([(
                "loop",
                "{% include 'loop' %}",
            )])))
            .context_depth_limit(5)
            .build();
        let template = env.parse("{% include 'loop' %}").unwrap();
        assert_err!(
            template.render(&env, Object::new()),
            "maximum context depth reached (5)"
        );
    }
}
