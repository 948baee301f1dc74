//! The template-level lexer: the outer of the two scanning passes.
//!
//! This pass splits template source into CONTENT, OUTPUT, TAG, DOC and
//! COMMENT tokens. The text inside an output statement or tag is *not*
//! scanned here; it is emitted verbatim as an EXPRESSION token immediately
//! after its OUTPUT/TAG token, carrying the correct byte offset, so that the
//! expression lexer can later tokenize it with full position fidelity.
//!
//! `{% raw %}` blocks collapse to a single CONTENT token, `{% doc %}` blocks
//! to a DOC token, and block comments are tracked by nesting depth and
//! collapse to one COMMENT token holding the concatenated inner text.

use crate::{
    environment::Environment,
    error::Error,
    token::{Token, TokenKind},
};
use std::sync::Arc;

/// Scan `source` into a flat token sequence, ending with an EOF sentinel
pub(crate) fn tokenize(
    source: &Arc<str>,
    env: &Environment,
) -> Result<Vec<Token>, Error> {
    let mut lexer = Lexer {
        source,
        text: source,
        env,
        pos: 0,
        lstrip: false,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

/// Which delimiter opened the construct under the cursor
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Opener {
    Output,
    Tag,
    Comment,
}

struct Lexer<'a> {
    source: &'a Arc<str>,
    text: &'a str,
    env: &'a Environment,
    pos: usize,
    /// Set when the previous construct closed with `-…}`, requesting a
    /// left-strip of the next CONTENT token
    lstrip: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn run(&mut self) -> Result<(), Error> {
        while self.pos < self.text.len() {
            match self.find_opener(self.pos) {
                None => {
                    self.emit_content(self.pos, self.text.len(), false);
                    self.pos = self.text.len();
                }
                Some((at, opener)) => {
                    let delimiter = self.opener_delimiter(opener);
                    // A `-` just inside the opener right-strips the content
                    // before it
                    let rstrip =
                        self.text[at + delimiter.len()..].starts_with('-');
                    self.emit_content(self.pos, at, rstrip);
                    match opener {
                        Opener::Output => self.scan_output(at)?,
                        Opener::Tag => self.scan_tag(at)?,
                        Opener::Comment => self.scan_comment_shorthand(at)?,
                    }
                }
            }
        }
        self.tokens
            .push(Token::eof(self.text.len(), self.source));
        Ok(())
    }

    fn opener_delimiter(&self, opener: Opener) -> &str {
        match opener {
            Opener::Output => &self.env.output_start,
            Opener::Tag => &self.env.tag_start,
            Opener::Comment => &self.env.comment_start,
        }
    }

    /// Find the earliest delimiter opening at or after `from`. On a tie
    /// (one delimiter is a prefix of another) the longer delimiter wins.
    fn find_opener(&self, from: usize) -> Option<(usize, Opener)> {
        let mut candidates = vec![
            (self.text[from..].find(&self.env.output_start), Opener::Output),
            (self.text[from..].find(&self.env.tag_start), Opener::Tag),
        ];
        if self.env.template_comments {
            candidates.push((
                self.text[from..].find(&self.env.comment_start),
                Opener::Comment,
            ));
        }
        candidates
            .into_iter()
            .filter_map(|(found, opener)| {
                found.map(|i| (from + i, opener))
            })
            .min_by_key(|&(at, opener)| {
                // Lower offset first; longer delimiter breaks ties
                (at, usize::MAX - self.opener_delimiter(opener).len())
            })
    }

    /// Emit the content slice `[start, end)`, honoring any pending
    /// left-strip and the given right-strip. Content that strips down to
    /// nothing is elided entirely.
    fn emit_content(&mut self, start: usize, end: usize, rstrip: bool) {
        let lstrip = std::mem::take(&mut self.lstrip);
        if start >= end {
            return;
        }
        let mut slice = &self.text[start..end];
        let mut token_start = start;
        if lstrip {
            let trimmed = slice.trim_start();
            token_start += slice.len() - trimmed.len();
            slice = trimmed;
        }
        if rstrip {
            slice = slice.trim_end();
        }
        if slice.is_empty() {
            return;
        }
        self.tokens.push(Token::new(
            TokenKind::Content,
            slice,
            token_start,
            self.source,
        ));
    }

    /// Scan `{{ … }}`, emitting an OUTPUT token followed by an EXPRESSION
    /// token carrying the inner text
    fn scan_output(&mut self, at: usize) -> Result<(), Error> {
        let open_end = self.env.output_start.len()
            + usize::from(self.text[at + self.env.output_start.len()..].starts_with('-'));
        let inner_start = at + open_end;
        let Some(close) = self.text[inner_start..].find(&self.env.output_end)
        else {
            return Err(self.unterminated(at, &self.env.output_end));
        };
        let close_at = inner_start + close;
        let mut inner = &self.text[inner_start..close_at];
        if inner.ends_with('-') {
            self.lstrip = true;
            inner = &inner[..inner.len() - 1];
        }
        let (expression, expression_start) =
            trim_with_offset(inner, inner_start);
        let end = close_at + self.env.output_end.len();
        self.tokens.push(Token::new(
            TokenKind::Output,
            &self.text[at..end],
            at,
            self.source,
        ));
        self.tokens.push(Token::new(
            TokenKind::Expression,
            expression,
            expression_start,
            self.source,
        ));
        self.pos = end;
        Ok(())
    }

    /// Scan `{# … #}` shorthand comments
    fn scan_comment_shorthand(&mut self, at: usize) -> Result<(), Error> {
        let open_end = self.env.comment_start.len()
            + usize::from(
                self.text[at + self.env.comment_start.len()..].starts_with('-'),
            );
        let inner_start = at + open_end;
        let Some(close) = self.text[inner_start..].find(&self.env.comment_end)
        else {
            return Err(self.unterminated(at, &self.env.comment_end));
        };
        let close_at = inner_start + close;
        let mut inner = &self.text[inner_start..close_at];
        if inner.ends_with('-') {
            self.lstrip = true;
            inner = &inner[..inner.len() - 1];
        }
        self.tokens.push(Token::new(
            TokenKind::Comment,
            inner,
            at,
            self.source,
        ));
        self.pos = close_at + self.env.comment_end.len();
        Ok(())
    }

    /// Scan `{% name … %}` and any block construct the tag name opens
    fn scan_tag(&mut self, at: usize) -> Result<(), Error> {
        let parsed = self
            .parse_tag(at)
            .ok_or_else(|| self.unterminated(at, &self.env.tag_end))?;

        match parsed.name {
            "raw" => self.scan_raw_block(at, &parsed),
            "doc" => self.scan_doc_block(at, &parsed),
            name => {
                self.tokens.push(Token::new(
                    TokenKind::Tag,
                    name,
                    parsed.name_start,
                    self.source,
                ));
                if !parsed.expression.is_empty() {
                    self.tokens.push(Token::new(
                        TokenKind::Expression,
                        parsed.expression,
                        parsed.expression_start,
                        self.source,
                    ));
                }
                self.lstrip = parsed.lstrip_next;
                self.pos = parsed.end;
                if name == "comment" {
                    self.scan_comment_block(at)?;
                }
                Ok(())
            }
        }
    }

    /// `{% raw %}…{% endraw %}` collapses to one CONTENT token holding the
    /// verbatim inner text. Whitespace control on the surrounding tags trims
    /// the body edges.
    fn scan_raw_block(
        &mut self,
        at: usize,
        open: &ParsedTag<'_>,
    ) -> Result<(), Error> {
        let (close, close_at) = self
            .find_block_end(open.end, &["endraw"])
            .ok_or_else(|| self.unterminated_block(at, "endraw"))?;
        let mut body = &self.text[open.end..close_at];
        let mut body_start = open.end;
        if open.lstrip_next {
            let trimmed = body.trim_start();
            body_start += body.len() - trimmed.len();
            body = trimmed;
        }
        if close.left_strip {
            body = body.trim_end();
        }
        if !body.is_empty() {
            self.tokens.push(Token::new(
                TokenKind::Content,
                body,
                body_start,
                self.source,
            ));
        }
        self.lstrip = close.lstrip_next;
        self.pos = close.end;
        Ok(())
    }

    /// `{% doc %}…{% enddoc %}` collapses to a DOC token
    fn scan_doc_block(
        &mut self,
        at: usize,
        open: &ParsedTag<'_>,
    ) -> Result<(), Error> {
        let (close, close_at) = self
            .find_block_end(open.end, &["enddoc"])
            .ok_or_else(|| self.unterminated_block(at, "enddoc"))?;
        self.tokens.push(Token::new(
            TokenKind::Doc,
            &self.text[open.end..close_at],
            at,
            self.source,
        ));
        self.lstrip = close.lstrip_next;
        self.pos = close.end;
        Ok(())
    }

    /// Collect a block comment, tracking nested `{% comment %}` tags by
    /// depth. Emits one COMMENT token with the concatenated inner text
    /// (nested tag lexemes included verbatim) followed by the closing TAG
    /// token. Assumes the opening TAG token was already emitted.
    fn scan_comment_block(&mut self, open_at: usize) -> Result<(), Error> {
        let text_start = self.pos;
        let mut depth = 1_usize;
        let mut cursor = self.pos;
        loop {
            let Some(tag_at) =
                self.text[cursor..].find(&self.env.tag_start).map(|i| cursor + i)
            else {
                return Err(self.unterminated_block(open_at, "endcomment"));
            };
            let Some(parsed) = self.parse_tag(tag_at) else {
                // A stray tag opener with no closer; part of the comment text
                cursor = tag_at + self.env.tag_start.len();
                continue;
            };
            match parsed.name {
                "comment" => depth += 1,
                "endcomment" => {
                    depth -= 1;
                    if depth == 0 {
                        self.tokens.push(Token::new(
                            TokenKind::Comment,
                            &self.text[text_start..tag_at],
                            text_start,
                            self.source,
                        ));
                        self.tokens.push(Token::new(
                            TokenKind::Tag,
                            "endcomment",
                            parsed.name_start,
                            self.source,
                        ));
                        self.lstrip = parsed.lstrip_next;
                        self.pos = parsed.end;
                        return Ok(());
                    }
                }
                _ => {}
            }
            cursor = parsed.end;
        }
    }

    /// Search for the closing tag of a raw/doc block. Returns the parsed
    /// end tag and the offset where its opener begins (the end of the block
    /// body).
    fn find_block_end(
        &self,
        from: usize,
        names: &[&str],
    ) -> Option<(ParsedTag<'a>, usize)> {
        let mut cursor = from;
        loop {
            let tag_at =
                self.text[cursor..].find(&self.env.tag_start).map(|i| cursor + i)?;
            if let Some(parsed) = self.parse_tag(tag_at)
                && names.contains(&parsed.name)
            {
                return Some((parsed, tag_at));
            }
            cursor = tag_at + self.env.tag_start.len();
        }
    }

    /// Parse the shape of a tag starting at `at` (which must point at a tag
    /// opener). Returns `None` when no closing delimiter exists. The
    /// returned slices borrow the source text, not the lexer, so scanning
    /// can continue while a parsed tag is held.
    fn parse_tag(&self, at: usize) -> Option<ParsedTag<'a>> {
        let mut cursor = at + self.env.tag_start.len();
        let left_strip = self.text[cursor..].starts_with('-');
        cursor += usize::from(left_strip);
        cursor += leading_whitespace(&self.text[cursor..]);
        let name_start = cursor;
        let rest = &self.text[cursor..];
        let name_len = if rest.starts_with('#') {
            1
        } else {
            rest.find(|c: char| !c.is_alphanumeric() && c != '_')
                .unwrap_or(rest.len())
        };
        let name_end = name_start + name_len;
        let close =
            self.text[name_end..].find(&self.env.tag_end).map(|i| name_end + i)?;
        let mut inner = &self.text[name_end..close];
        let lstrip_next = inner.ends_with('-');
        if lstrip_next {
            inner = &inner[..inner.len() - 1];
        }
        let (expression, expression_start) = trim_with_offset(inner, name_end);
        Some(ParsedTag {
            name: &self.text[name_start..name_end],
            name_start,
            expression,
            expression_start,
            left_strip,
            lstrip_next,
            end: close + self.env.tag_end.len(),
        })
    }

    fn unterminated(&self, at: usize, delimiter: &str) -> Error {
        Error::syntax(
            format!("expected '{delimiter}', found end of file"),
            crate::error::SourceLocation::new(Arc::clone(self.source), at),
        )
    }

    fn unterminated_block(&self, at: usize, end_name: &str) -> Error {
        Error::syntax(
            format!(
                "expected '{} {end_name} {}', found end of file",
                self.env.tag_start, self.env.tag_end
            ),
            crate::error::SourceLocation::new(Arc::clone(self.source), at),
        )
    }
}

/// A tag's shape as discovered by the scanner
#[derive(Debug)]
struct ParsedTag<'a> {
    name: &'a str,
    name_start: usize,
    expression: &'a str,
    expression_start: usize,
    /// `-` just inside the opener, e.g. `{%- tag %}`
    left_strip: bool,
    /// `-` just inside the closer, e.g. `{% tag -%}`
    lstrip_next: bool,
    /// Offset one past the closing delimiter
    end: usize,
}

/// Trim whitespace around `slice`, returning the trimmed text and the
/// adjusted absolute offset of its first byte
fn trim_with_offset(slice: &str, start: usize) -> (&str, usize) {
    let trimmed_start = slice.trim_start();
    let offset = start + (slice.len() - trimmed_start.len());
    (trimmed_start.trim_end(), offset)
}

fn leading_whitespace(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{environment::Environment, test_util::assert_err};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn lex(source: &str) -> Vec<(TokenKind, String, usize)> {
        // Shorthand comments are on so their lexing is covered here too
        let env = Environment::builder().template_comments(true).build();
        let source: Arc<str> = source.into();
        tokenize(&source, &env)
            .unwrap()
            .into_iter()
            .map(|token| (token.kind, token.value, token.start))
            .collect()
    }

    fn kinds(source: &str) -> Vec<(TokenKind, String)> {
        lex(source)
            .into_iter()
            .map(|(kind, value, _)| (kind, value))
            .collect()
    }

    #[test]
    fn test_content_only() {
        assert_eq!(
            kinds("hello world"),
            vec![
                (TokenKind::Content, "hello world".into()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_output_statement() {
        assert_eq!(
            lex("Hello, {{ name }}!"),
            vec![
                (TokenKind::Content, "Hello, ".into(), 0),
                (TokenKind::Output, "{{ name }}".into(), 7),
                (TokenKind::Expression, "name".into(), 10),
                (TokenKind::Content, "!".into(), 17),
                (TokenKind::Eof, String::new(), 18),
            ]
        );
    }

    #[test]
    fn test_tag_with_expression() {
        assert_eq!(
            lex("{% if user.age >= 21 %}adult{% endif %}"),
            vec![
                (TokenKind::Tag, "if".into(), 3),
                (TokenKind::Expression, "user.age >= 21".into(), 6),
                (TokenKind::Content, "adult".into(), 23),
                (TokenKind::Tag, "endif".into(), 31),
                (TokenKind::Eof, String::new(), 39),
            ]
        );
    }

    #[test]
    fn test_tag_without_expression() {
        assert_eq!(
            kinds("{% break %}"),
            vec![
                (TokenKind::Tag, "break".into()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[rstest]
    #[case::left(
        "a  {%- assign x = 1 %}",
        vec![(TokenKind::Content, "a".into()),
             (TokenKind::Tag, "assign".into()),
             (TokenKind::Expression, "x = 1".into()),
             (TokenKind::Eof, String::new())],
    )]
    #[case::right(
        "{% assign x = 1 -%}  b",
        vec![(TokenKind::Tag, "assign".into()),
             (TokenKind::Expression, "x = 1".into()),
             (TokenKind::Content, "b".into()),
             (TokenKind::Eof, String::new())],
    )]
    #[case::output_both(
        " x {{- 'y' -}} z ",
        vec![(TokenKind::Content, " x".into()),
             (TokenKind::Output, "{{- 'y' -}}".into()),
             (TokenKind::Expression, "'y'".into()),
             (TokenKind::Content, "z ".into()),
             (TokenKind::Eof, String::new())],
    )]
    #[case::strips_to_nothing(
        "{{ 'a' -}}   {{- 'b' }}",
        vec![(TokenKind::Output, "{{ 'a' -}}".into()),
             (TokenKind::Expression, "'a'".into()),
             (TokenKind::Output, "{{- 'b' }}".into()),
             (TokenKind::Expression, "'b'".into()),
             (TokenKind::Eof, String::new())],
    )]
    fn test_whitespace_control(
        #[case] source: &str,
        #[case] expected: Vec<(TokenKind, String)>,
    ) {
        assert_eq!(kinds(source), expected);
    }

    #[test]
    fn test_whitespace_control_does_not_cross_constructs() {
        // The strip only applies to the adjacent content, not past an
        // intervening output statement
        assert_eq!(
            kinds("a {{ 'b' }} {%- echo 'c' %}"),
            vec![
                (TokenKind::Content, "a ".into()),
                (TokenKind::Output, "{{ 'b' }}".into()),
                (TokenKind::Expression, "'b'".into()),
                (TokenKind::Tag, "echo".into()),
                (TokenKind::Expression, "'c'".into()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_raw_block() {
        assert_eq!(
            kinds("{% raw %}{{ not parsed }}{% endraw %}"),
            vec![
                (TokenKind::Content, "{{ not parsed }}".into()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_doc_block() {
        assert_eq!(
            kinds("a{% doc %} internal notes {% enddoc %}b"),
            vec![
                (TokenKind::Content, "a".into()),
                (TokenKind::Doc, " internal notes ".into()),
                (TokenKind::Content, "b".into()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_shorthand_comment() {
        assert_eq!(
            kinds("a{# ignore me #}b"),
            vec![
                (TokenKind::Content, "a".into()),
                (TokenKind::Comment, " ignore me ".into()),
                (TokenKind::Content, "b".into()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_block_comment() {
        assert_eq!(
            kinds("{% comment %}skip {{ this }}{% endcomment %}ok"),
            vec![
                (TokenKind::Tag, "comment".into()),
                (TokenKind::Comment, "skip {{ this }}".into()),
                (TokenKind::Tag, "endcomment".into()),
                (TokenKind::Content, "ok".into()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_nested_block_comment() {
        assert_eq!(
            kinds(
                "{% comment %}a{% comment %}b{% endcomment %}c\
                 {% endcomment %}d"
            ),
            vec![
                (TokenKind::Tag, "comment".into()),
                (
                    TokenKind::Comment,
                    "a{% comment %}b{% endcomment %}c".into()
                ),
                (TokenKind::Tag, "endcomment".into()),
                (TokenKind::Content, "d".into()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_inline_comment_tag() {
        assert_eq!(
            kinds("{% # free text until the closer %}"),
            vec![
                (TokenKind::Tag, "#".into()),
                (
                    TokenKind::Expression,
                    "free text until the closer".into()
                ),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[rstest]
    #[case::output("text {{ name", "expected '}}', found end of file")]
    #[case::tag("{% if x", "expected '%}', found end of file")]
    #[case::raw("{% raw %}stuck", "endraw")]
    #[case::comment_block("{% comment %}stuck", "endcomment")]
    #[case::doc("{% doc %}stuck", "enddoc")]
    fn test_unterminated(#[case] source: &str, #[case] expected: &str) {
        let env = Environment::default();
        let source: Arc<str> = source.into();
        assert_err!(tokenize(&source, &env), expected);
    }

    /// Every non-synthetic token's lexeme must be a slice of the source at
    /// its recorded offset
    #[test]
    fn test_offset_fidelity() {
        let source = "a\n{{ x.y }} {%- for i in (1..3) %}b{% endfor %}";
        for (kind, value, start) in lex(source) {
            if matches!(kind, TokenKind::Eof | TokenKind::Output) {
                continue;
            }
            assert_eq!(
                &source[start..start + value.len()],
                value,
                "{kind:?} token at {start}"
            );
        }
    }
}
