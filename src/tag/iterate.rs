//! Iteration tags: `for`, `tablerow`, `break`, `continue` and `cycle`

use crate::{
    context::{Output, RenderContext},
    error::Error,
    expression::{
        Expression, LoopExpression, LoopOffset, parser,
    },
    parser::TemplateParser,
    tag::{Flow, Statement, Tag, render_block, write_value},
    token::{Token, TokenKind},
    value::{Object, Value},
};
use itertools::Itertools;

/// `{% for x in iterable %} … {% else %} … {% endfor %}`
pub struct For;

impl Tag for For {
    fn name(&self) -> &'static str {
        "for"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let expression = parser.parse_loop_expression(&token)?;
        let (body, end) = parser.parse_block(&["else", "endfor"])?;
        let else_body = if end.value == "else" {
            Some(parser.parse_block(&["endfor"])?.0)
        } else {
            None
        };
        Ok(Statement::For(ForTag {
            token,
            expression,
            body,
            else_body,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct ForTag {
    pub token: Token,
    pub expression: LoopExpression,
    pub body: Vec<Statement>,
    pub else_body: Option<Vec<Statement>>,
}

impl ForTag {
    pub(crate) async fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let key = self.expression.identity_key();
        let (items, start) = resolve_loop(&self.expression, ctx)?;
        let length = items.len;

        // An exhausted iterable renders the else branch instead
        if length == 0 {
            if let Some(else_body) = &self.else_body {
                return render_block(else_body, ctx, out).await;
            }
            return Ok(Flow::Normal);
        }

        let parent = ctx
            .resolve("forloop")
            .cloned()
            .unwrap_or(Value::Nil);
        ctx.push_scope(Object::new());

        let mut iterated = 0;
        let mut result = Ok(());
        for (i, item) in items.iter.enumerate() {
            if let Err(error) = ctx.tick_loop() {
                result = Err(error);
                break;
            }
            ctx.set_local(&self.expression.variable.name, item);
            ctx.set_local("forloop", forloop_value(i, length, &parent));
            iterated = i + 1;
            match render_block(&self.body, ctx, out).await {
                Ok(Flow::Normal | Flow::Continue) => {}
                Ok(Flow::Break) => break,
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }

        ctx.pop_scope();
        // Record where we stopped so `offset: continue` can resume
        ctx.set_stop_index(&key, start + iterated);
        result?;
        Ok(Flow::Normal)
    }
}

/// The `forloop` object exposed inside a `for` body
fn forloop_value(i: usize, length: usize, parent: &Value) -> Value {
    let mut forloop = Object::new();
    forloop.insert("index".into(), Value::Int(i as i64 + 1));
    forloop.insert("index0".into(), Value::Int(i as i64));
    forloop.insert("rindex".into(), Value::Int((length - i) as i64));
    forloop.insert("rindex0".into(), Value::Int((length - i - 1) as i64));
    forloop.insert("first".into(), Value::Bool(i == 0));
    forloop.insert("last".into(), Value::Bool(i == length - 1));
    forloop.insert("length".into(), Value::Int(length as i64));
    forloop.insert("parentloop".into(), parent.clone());
    Value::Object(forloop)
}

/// `{% tablerow x in iterable cols: n %} … {% endtablerow %}`
pub struct TableRow;

impl Tag for TableRow {
    fn name(&self) -> &'static str {
        "tablerow"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let expression = parser.parse_loop_expression(&token)?;
        let (body, _) = parser.parse_block(&["endtablerow"])?;
        Ok(Statement::TableRow(TableRowTag {
            token,
            expression,
            body,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct TableRowTag {
    pub token: Token,
    pub expression: LoopExpression,
    pub body: Vec<Statement>,
}

impl TableRowTag {
    pub(crate) async fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let key = self.expression.identity_key();
        let (items, start) = resolve_loop(&self.expression, ctx)?;
        let length = items.len;
        let cols = match &self.expression.cols {
            Some(expression) => {
                to_index(expression, ctx, "cols")?.max(1)
            }
            None => length.max(1),
        };

        ctx.push_scope(Object::new());
        let mut iterated = 0;
        let result = self
            .render_rows(ctx, out, items, length, cols, &mut iterated)
            .await;
        ctx.pop_scope();
        ctx.set_stop_index(&key, start + iterated);
        result?;
        Ok(Flow::Normal)
    }

    async fn render_rows(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
        items: LoopItems,
        length: usize,
        cols: usize,
        iterated: &mut usize,
    ) -> Result<(), Error> {
        out.write("<tr class=\"row1\">\n")?;
        for (i, item) in items.iter.enumerate() {
            ctx.tick_loop()?;
            let row = i / cols;
            let col = i % cols;
            if i > 0 && col == 0 {
                out.write(&format!("</tr>\n<tr class=\"row{}\">", row + 1))?;
            }
            ctx.set_local(&self.expression.variable.name, item);
            ctx.set_local(
                "tablerowloop",
                tablerowloop_value(i, length, col, cols, row),
            );
            *iterated = i + 1;
            out.write(&format!("<td class=\"col{}\">", col + 1))?;
            let flow = render_block(&self.body, ctx, out).await?;
            out.write("</td>")?;
            if flow == Flow::Break {
                break;
            }
        }
        out.write("</tr>\n")?;
        Ok(())
    }
}

/// The `tablerowloop` object exposed inside a `tablerow` body
fn tablerowloop_value(
    i: usize,
    length: usize,
    col: usize,
    cols: usize,
    row: usize,
) -> Value {
    let mut object = Object::new();
    object.insert("length".into(), Value::Int(length as i64));
    object.insert("index".into(), Value::Int(i as i64 + 1));
    object.insert("index0".into(), Value::Int(i as i64));
    object.insert("rindex".into(), Value::Int((length - i) as i64));
    object.insert("rindex0".into(), Value::Int((length - i - 1) as i64));
    object.insert("first".into(), Value::Bool(i == 0));
    object.insert("last".into(), Value::Bool(i == length - 1));
    object.insert("col".into(), Value::Int(col as i64 + 1));
    object.insert("col0".into(), Value::Int(col as i64));
    object.insert("col_first".into(), Value::Bool(col == 0));
    object.insert("col_last".into(), Value::Bool(col == cols - 1));
    object.insert("row".into(), Value::Int(row as i64 + 1));
    Value::Object(object)
}

/// `{% break %}`
pub struct Break;

impl Tag for Break {
    fn name(&self) -> &'static str {
        "break"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        parser.no_expression(&token)?;
        Ok(Statement::Break(BreakTag { token }))
    }
}

#[derive(Clone, Debug)]
pub struct BreakTag {
    pub token: Token,
}

/// `{% continue %}`
pub struct Continue;

impl Tag for Continue {
    fn name(&self) -> &'static str {
        "continue"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        parser.no_expression(&token)?;
        Ok(Statement::Continue(ContinueTag { token }))
    }
}

#[derive(Clone, Debug)]
pub struct ContinueTag {
    pub token: Token,
}

/// `{% cycle a, b, c %}` / `{% cycle group: a, b, c %}`: write the next
/// element of a rotation keyed by the group name or, without one, by the
/// argument list itself
pub struct Cycle;

impl Tag for Cycle {
    fn name(&self) -> &'static str {
        "cycle"
    }

    fn parse(
        &self,
        token: Token,
        parser: &mut TemplateParser<'_>,
    ) -> Result<Statement, Error> {
        let env = parser.env();
        let mut tokens = parser.expect_expression(&token)?;

        let first = parser::parse_primitive(env, &mut tokens)?;
        let mut group = None;
        let mut args = Vec::new();
        if tokens.current().kind == TokenKind::Colon {
            tokens.next();
            group = Some(first);
            args.push(parser::parse_primitive(env, &mut tokens)?);
        } else {
            args.push(first);
        }
        while tokens.current().kind == TokenKind::Comma {
            tokens.next();
            args.push(parser::parse_primitive(env, &mut tokens)?);
        }
        tokens.eat(TokenKind::Eof)?;

        Ok(Statement::Cycle(CycleTag { token, group, args }))
    }
}

#[derive(Clone, Debug)]
pub struct CycleTag {
    pub token: Token,
    pub group: Option<Expression>,
    pub args: Vec<Expression>,
}

impl CycleTag {
    pub(crate) fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        out: &mut Output,
    ) -> Result<Flow, Error> {
        let key = match &self.group {
            Some(group) => group.evaluate(ctx)?.render_string(),
            None => self.args.iter().join(","),
        };
        let index = ctx.cycle(&key, self.args.len());
        let value = self.args[index].evaluate(ctx)?;
        write_value(&value, ctx, &self.token, out)?;
        Ok(Flow::Normal)
    }
}

/// The items a loop will walk, with the post-slicing length known up
/// front for `forloop.length`. Ranges iterate arithmetically rather than
/// materializing.
pub(crate) struct LoopItems {
    pub(crate) len: usize,
    pub(crate) iter: LoopIter,
}

pub(crate) enum LoopIter {
    Ints {
        next: i64,
        step: i64,
        remaining: usize,
    },
    Values(std::vec::IntoIter<Value>),
}

impl Iterator for LoopIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Ints {
                next,
                step,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                *remaining -= 1;
                let value = *next;
                *next += *step;
                Some(Value::Int(value))
            }
            Self::Values(values) => values.next(),
        }
    }
}

/// Evaluate a loop expression's iterable and slicing arguments. Returns
/// the items plus the effective start offset, which feeds the recorded
/// stop index.
pub(crate) fn resolve_loop(
    expression: &LoopExpression,
    ctx: &mut RenderContext<'_>,
) -> Result<(LoopItems, usize), Error> {
    let iterable = expression.iterable.evaluate(ctx)?;
    ctx.assert_defined(&iterable, expression.iterable.token())?;

    let offset = match &expression.offset {
        None => 0,
        Some(LoopOffset::Continue) => {
            ctx.stop_index(&expression.identity_key())
        }
        Some(LoopOffset::Expression(offset)) => {
            to_index(offset, ctx, "offset")?
        }
    };
    let limit = match &expression.limit {
        None => None,
        Some(limit) => Some(to_index(limit, ctx, "limit")?),
    };

    let items = match iterable {
        Value::Range(range) => {
            let total = range.len();
            let start = offset.min(total);
            let end = match limit {
                Some(limit) => (start + limit).min(total),
                None => total,
            };
            let len = end - start;
            let iter = if expression.reversed {
                LoopIter::Ints {
                    next: range.start + end as i64 - 1,
                    step: -1,
                    remaining: len,
                }
            } else {
                LoopIter::Ints {
                    next: range.start + start as i64,
                    step: 1,
                    remaining: len,
                }
            };
            LoopItems { len, iter }
        }
        ref value => {
            let mut items = value.iter_items().ok_or_else(|| {
                Error::type_error(
                    format!("{} is not iterable", value.type_name()),
                    Some(expression.iterable.token().location()),
                )
            })?;
            let start = offset.min(items.len());
            let end = match limit {
                Some(limit) => (start + limit).min(items.len()),
                None => items.len(),
            };
            items = items[start..end].to_vec();
            if expression.reversed {
                items.reverse();
            }
            LoopItems {
                len: items.len(),
                iter: LoopIter::Values(items.into_iter()),
            }
        }
    };

    Ok((items, offset))
}

/// Evaluate a `limit`/`offset`/`cols` argument to a non-negative index
fn to_index(
    expression: &Expression,
    ctx: &RenderContext<'_>,
    what: &str,
) -> Result<usize, Error> {
    let value = expression.evaluate(ctx)?;
    let index = value.to_int().map_err(|()| {
        Error::type_error(
            format!(
                "expected an integer {what}, found {}",
                value.type_name()
            ),
            Some(expression.token().location()),
        )
    })?;
    Ok(index.max(0) as usize)
}
