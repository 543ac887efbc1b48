use std::mem;

use crate::error::{Result, TemplateError, TemplateLocation};
use crate::tpl::ast::{CodeNode, ControlBlock, Doc, ExpressionNode, Keyword, Node};
use crate::tpl::matcher::{
    ANY_CHAR, CharClass, Matcher, Scanner, Step, choice, many, optional, req,
};

const HSPACE: CharClass = CharClass::any_of("whitespace", " \t");
const EXPR_CHAR: CharClass = CharClass::none_of("expression character", "}|");
const FILTER_CHAR: CharClass = CharClass::none_of("filter name", "},");
const PLAIN_CHAR: CharClass = CharClass::none_of("text", "$<\n");
const LINE_CHAR: CharClass = CharClass::none_of("end of line", "\n");
const IDENT_START: CharClass =
    CharClass::where_("identifier", |c| c.is_alphabetic() || c == '_' || c == '$');
const IDENT_CHAR: CharClass =
    CharClass::where_("identifier", |c| c.is_alphanumeric() || c == '_' || c == '$');

/// One step of the document loop.
enum Piece {
    Node(Node),
    Text { pos: usize, text: String },
    /// A control line that only changed the block state.
    Nothing,
}

/// A control line, matched but not yet applied to the block state.
enum ControlLine<'a> {
    Start {
        keyword: Keyword,
        expr: String,
        vars: Vec<String>,
    },
    Mid {
        keyword: Keyword,
        expr: Option<String>,
    },
    End {
        name: &'a str,
    },
}

/// Recursive-descent parser for the template language.
///
/// Grammar rules backtrack through the [`Matcher`] cursor. The block state
/// (`docs`, `blocks`, `current`) is only touched after a whole control line
/// has matched, so backtracking never has to undo it.
struct Parser<'a> {
    m: Matcher<'a>,
    /// Enclosing documents of the open blocks, outermost first.
    docs: Vec<Doc>,
    /// Open blocks, innermost last. An `if` carries its `elif`/`else` so far.
    blocks: Vec<ControlBlock>,
    /// The document currently receiving nodes.
    current: Doc,
}

impl<'a> Scanner<'a> for Parser<'a> {
    fn matcher(&mut self) -> &mut Matcher<'a> {
        &mut self.m
    }
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            m: Matcher::new(input),
            docs: Vec::new(),
            blocks: Vec::new(),
            current: Doc::new(0),
        }
    }

    fn parse(mut self) -> Result<Doc> {
        while !self.m.at_end() {
            let start = self.m.pos();
            let piece = choice(
                &mut self,
                &[
                    Parser::control_line,
                    Parser::expression,
                    Parser::code_block,
                    Parser::text,
                ],
            )?;
            match piece {
                Some(Piece::Node(node)) => self.current.push(node),
                Some(Piece::Text { pos, text }) => self.current.push_text(pos, &text),
                Some(Piece::Nothing) => {}
                None => break,
            }
            if self.m.pos() == start {
                break;
            }
        }

        if !self.m.at_end() {
            let (pos, expected) = self.m.failure();
            return Err(self.syntax_error(pos, "unexpected input", expected));
        }

        if let Some(open) = self.blocks.last() {
            let opened = TemplateLocation::of(self.m.input(), open.pos);
            let message = format!(
                "unclosed `{}` block opened at line {}",
                open.keyword, opened.line
            );
            let expected = vec![format!("\"% end{}\"", open.keyword)];
            return Err(self.syntax_error(self.m.input().len(), &message, expected));
        }

        Ok(self.current)
    }

    // ---------------------------------------------------------------------
    // Document pieces
    // ---------------------------------------------------------------------

    /// `"${" expr ("|" filters)? "}"`
    fn expression(&mut self) -> Step<Piece> {
        let pos = self.m.pos();
        req!(self.m.literal("${"));
        let expr = self.m.span_of(&EXPR_CHAR);
        let filters = optional(self, |p| {
            req!(p.m.literal("|"));
            let first = p.m.span_of(&FILTER_CHAR);
            let rest = many(p, |p| {
                req!(p.m.literal(","));
                Ok(Some(p.m.span_of(&FILTER_CHAR)))
            })?;
            Ok(Some(filter_names(first, rest)))
        })?
        .unwrap_or_default();
        req!(self.m.literal("}"));

        Ok(Some(Piece::Node(Node::Expression(ExpressionNode {
            pos,
            expr: expr.to_string(),
            filters,
        }))))
    }

    /// `"<%" (not "%>")* "%>"`
    fn code_block(&mut self) -> Step<Piece> {
        let pos = self.m.pos();
        req!(self.m.literal("<%"));
        let body = self.m.until("%>");
        req!(self.m.literal("%>"));

        Ok(Some(Piece::Node(Node::Code(CodeNode {
            pos,
            body: body.to_string(),
        }))))
    }

    /// Any character. Runs of characters that cannot start another piece are
    /// taken at once; a newline always ends the run.
    fn text(&mut self) -> Step<Piece> {
        let pos = self.m.pos();
        let first = req!(self.m.class(&ANY_CHAR));
        let mut text = first.to_string();
        if first != '\n' {
            text.push_str(self.m.span_of(&PLAIN_CHAR));
        }
        Ok(Some(Piece::Text { pos, text }))
    }

    // ---------------------------------------------------------------------
    // Control lines
    // ---------------------------------------------------------------------

    /// `line_start ws* "%%"` or `line_start ws* "%" block_keyword`.
    ///
    /// Once a `%` has been seen at the start of a line the line must be a
    /// valid control line; anything else is fatal.
    fn control_line(&mut self) -> Step<Piece> {
        if !self.m.at_line_start() {
            return Ok(None);
        }
        let line_pos = self.m.pos();
        let indent = self.m.span_of(&HSPACE);

        if self.m.literal("%%").is_some() {
            return Ok(Some(Piece::Text {
                pos: line_pos,
                text: format!("{}%", indent),
            }));
        }

        let percent_pos = self.m.pos();
        req!(self.m.literal("%"));

        self.m.clear_failures();
        let line = choice(
            self,
            &[Parser::block_end, Parser::block_start, Parser::block_mid],
        )?;
        match line {
            Some(line) => self.apply(line, percent_pos).map(Some),
            None => {
                let (pos, expected) = self.m.failure();
                Err(self.syntax_error(pos, "invalid control line", expected))
            }
        }
    }

    /// `"for" var ("," var)? "in" expr ":"` or `("if" | "while") expr ":"`
    fn block_start(&mut self) -> Step<ControlLine<'a>> {
        self.m.span_of(&HSPACE);
        choice(self, &[Parser::for_head, Parser::condition_head])
    }

    fn for_head(&mut self) -> Step<ControlLine<'a>> {
        req!(self.m.literal("for"));
        req!(self.m.span_of1(&HSPACE));
        let first = req!(self.identifier());
        self.m.span_of(&HSPACE);
        let second = optional(self, |p| {
            req!(p.m.literal(","));
            p.m.span_of(&HSPACE);
            let var = req!(p.identifier());
            p.m.span_of(&HSPACE);
            Ok(Some(var))
        })?;
        req!(self.m.literal("in"));
        req!(self.m.span_of1(&HSPACE));
        let expr = req!(self.header_expr());

        let mut vars = vec![first.to_string()];
        vars.extend(second.map(str::to_string));
        Ok(Some(ControlLine::Start {
            keyword: Keyword::For,
            expr,
            vars,
        }))
    }

    fn condition_head(&mut self) -> Step<ControlLine<'a>> {
        let keyword = if self.m.literal("if").is_some() {
            Keyword::If
        } else if self.m.literal("while").is_some() {
            Keyword::While
        } else {
            return Ok(None);
        };
        req!(self.m.span_of1(&HSPACE));
        let expr = req!(self.header_expr());
        Ok(Some(ControlLine::Start {
            keyword,
            expr,
            vars: Vec::new(),
        }))
    }

    /// `"elif" expr ":"` or `"else" ":"`
    fn block_mid(&mut self) -> Step<ControlLine<'a>> {
        self.m.span_of(&HSPACE);
        if self.m.literal("elif").is_some() {
            req!(self.m.span_of1(&HSPACE));
            let expr = req!(self.header_expr());
            return Ok(Some(ControlLine::Mid {
                keyword: Keyword::Elif,
                expr: Some(expr),
            }));
        }
        req!(self.m.literal("else"));
        self.m.span_of(&HSPACE);
        req!(self.m.literal(":"));
        req!(self.line_end());
        Ok(Some(ControlLine::Mid {
            keyword: Keyword::Else,
            expr: None,
        }))
    }

    /// `"end" name newline`
    fn block_end(&mut self) -> Step<ControlLine<'a>> {
        self.m.span_of(&HSPACE);
        req!(self.m.literal("end"));
        let name = req!(self.identifier());
        req!(self.line_end());
        Ok(Some(ControlLine::End { name }))
    }

    /// The rest of a header line: an expression terminated by `:`.
    fn header_expr(&mut self) -> Option<String> {
        let start = self.m.pos();
        let line = self
            .m
            .memo_span("rest_of_line", |m| Some(m.span_of(&LINE_CHAR)))?;
        let trimmed = line.trim_end();
        let Some(expr) = trimmed.strip_suffix(':') else {
            self.m.expect_at(start + trimmed.len(), "\":\"");
            return None;
        };
        let expr = expr.trim();
        if expr.is_empty() {
            self.m.expect_at(start, "expression");
            return None;
        }
        self.m.literal("\n")?;
        Some(expr.to_string())
    }

    fn identifier(&mut self) -> Option<&'a str> {
        self.m.memo_span("identifier", |m| {
            let start = m.pos();
            m.class(&IDENT_START)?;
            m.span_of(&IDENT_CHAR);
            Some(&m.input()[start..m.pos()])
        })
    }

    /// Trailing blanks, then `\n` or `\r\n`.
    fn line_end(&mut self) -> Option<()> {
        self.m.span_of(&HSPACE);
        self.m.literal("\r");
        self.m.literal("\n").map(|_| ())
    }

    // ---------------------------------------------------------------------
    // Block state machine
    // ---------------------------------------------------------------------

    fn apply(&mut self, line: ControlLine<'a>, pos: usize) -> Result<Piece> {
        match line {
            ControlLine::Start {
                keyword,
                expr,
                vars,
            } => {
                let body_start = self.m.pos();
                let parent = mem::replace(&mut self.current, Doc::new(body_start));
                self.docs.push(parent);
                self.blocks
                    .push(ControlBlock::new(pos, keyword, Some(expr), vars));
                Ok(Piece::Nothing)
            }
            ControlLine::Mid { keyword, expr } => {
                let Some(open) = self.blocks.last() else {
                    return Err(self.semantic_error(
                        pos,
                        format!("`{}` without an open `if` block", keyword),
                    ));
                };
                let predecessor = open
                    .sub_blocks
                    .last()
                    .map(|sub| sub.keyword)
                    .unwrap_or(open.keyword);
                if !matches!(predecessor, Keyword::If | Keyword::Elif) {
                    let opened = TemplateLocation::of(self.m.input(), open.pos);
                    return Err(self.semantic_error(
                        pos,
                        format!(
                            "`{}` cannot follow `{}` (block opened at line {})",
                            keyword, predecessor, opened.line
                        ),
                    ));
                }

                let body_start = self.m.pos();
                let body = mem::replace(&mut self.current, Doc::new(body_start));
                let Some(open) = self.blocks.last_mut() else {
                    return Err(TemplateError::Internal("block stack underflow".to_string()));
                };
                close_body(open, body);
                let mut sub = ControlBlock::new(pos, keyword, expr, Vec::new());
                sub.body = Doc::new(body_start);
                open.sub_blocks.push(sub);
                Ok(Piece::Nothing)
            }
            ControlLine::End { name } => {
                let Some(open) = self.blocks.last() else {
                    return Err(
                        self.semantic_error(pos, format!("`end{}` without an open block", name))
                    );
                };
                if open.keyword.as_str() != name {
                    let opened = TemplateLocation::of(self.m.input(), open.pos);
                    return Err(self.semantic_error(
                        pos,
                        format!(
                            "`end{}` does not match the open `{}` block (opened at line {})",
                            name, open.keyword, opened.line
                        ),
                    ));
                }

                let (Some(mut block), Some(parent)) = (self.blocks.pop(), self.docs.pop()) else {
                    return Err(TemplateError::Internal("block stack underflow".to_string()));
                };
                let body = mem::replace(&mut self.current, parent);
                close_body(&mut block, body);
                Ok(Piece::Node(Node::Control(block)))
            }
        }
    }

    fn syntax_error(&self, pos: usize, message: &str, expected: Vec<String>) -> TemplateError {
        TemplateError::Syntax {
            message: message.to_string(),
            location: TemplateLocation::of(self.m.input(), pos),
            expected,
        }
    }

    fn semantic_error(&self, pos: usize, message: String) -> TemplateError {
        TemplateError::Semantic {
            message,
            location: TemplateLocation::of(self.m.input(), pos),
        }
    }
}

/// Hands a finished body to the block or to its latest `elif`/`else`.
fn close_body(block: &mut ControlBlock, body: Doc) {
    match block.sub_blocks.last_mut() {
        Some(sub) => sub.body = body,
        None => block.body = body,
    }
}

/// Filter names with surrounding whitespace removed; empty names are dropped.
fn filter_names(first: &str, rest: Vec<&str>) -> Vec<String> {
    std::iter::once(first)
        .chain(rest)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses template text into a document tree.
///
/// Input that does not end with a newline is parsed as if it did, so a
/// control line can close the template; the added newline never shows up in
/// the result.
pub fn parse(input: &str) -> Result<Doc> {
    if input.ends_with('\n') {
        return Parser::new(input).parse();
    }

    let padded = format!("{}\n", input);
    let mut doc = Parser::new(&padded).parse()?;
    strip_synthetic_newline(&mut doc);
    Ok(doc)
}

fn strip_synthetic_newline(doc: &mut Doc) {
    if let Some(Node::Text(last)) = doc.children.last_mut() {
        if last.value.ends_with('\n') {
            last.value.pop();
            if last.value.is_empty() {
                doc.children.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::ast::TextNode;

    fn text(doc: &Doc, index: usize) -> &str {
        match &doc.children[index] {
            Node::Text(TextNode { value, .. }) => value,
            other => panic!("Expected Text, got {:?}", other),
        }
    }

    fn block(doc: &Doc, index: usize) -> &ControlBlock {
        match &doc.children[index] {
            Node::Control(block) => block,
            other => panic!("Expected ControlBlock, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_text() {
        let doc = parse("hello world").unwrap();
        assert_eq!(doc.children.len(), 1);
        assert_eq!(text(&doc, 0), "hello world");
    }

    #[test]
    fn test_parse_expression() {
        let doc = parse("a ${foo + bar} b").unwrap();
        assert_eq!(doc.children.len(), 3);
        assert_eq!(text(&doc, 0), "a ");
        match &doc.children[1] {
            Node::Expression(e) => {
                assert_eq!(e.expr, "foo + bar");
                assert!(e.filters.is_empty());
                assert_eq!(e.pos, 2);
            }
            other => panic!("Expected Expression, got {:?}", other),
        }
        assert_eq!(text(&doc, 2), " b");
    }

    #[test]
    fn test_parse_filters() {
        let doc = parse("${foo|bar, baz}").unwrap();
        match &doc.children[0] {
            Node::Expression(e) => {
                assert_eq!(e.expr, "foo");
                assert_eq!(e.filters, vec!["bar".to_string(), "baz".to_string()]);
            }
            other => panic!("Expected Expression, got {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_expression_is_text() {
        let doc = parse("a ${oops").unwrap();
        assert_eq!(doc.children.len(), 1);
        assert_eq!(text(&doc, 0), "a ${oops");
    }

    #[test]
    fn test_parse_code_block() {
        let doc = parse("x<% var y = 1; %>z").unwrap();
        assert_eq!(doc.children.len(), 3);
        match &doc.children[1] {
            Node::Code(c) => {
                assert_eq!(c.body, " var y = 1; ");
                assert_eq!(c.pos, 1);
            }
            other => panic!("Expected Code, got {:?}", other),
        }
    }

    #[test]
    fn test_escaped_percent() {
        let doc = parse("%% foo %\nbar %").unwrap();
        assert_eq!(doc.children.len(), 1);
        assert_eq!(text(&doc, 0), "% foo %\nbar %");
    }

    #[test]
    fn test_percent_mid_line_is_text() {
        let doc = parse("50% off\n").unwrap();
        assert_eq!(text(&doc, 0), "50% off\n");
    }

    #[test]
    fn test_parse_for_loop() {
        let doc = parse("% for foo in bar:\n  num: ${foo}\n% endfor").unwrap();
        assert_eq!(doc.children.len(), 1);
        let b = block(&doc, 0);
        assert_eq!(b.keyword, Keyword::For);
        assert_eq!(b.vars, vec!["foo".to_string()]);
        assert_eq!(b.expr.as_deref(), Some("bar"));
        assert_eq!(b.body.children.len(), 3);
        assert_eq!(text(&b.body, 0), "  num: ");
        assert_eq!(text(&b.body, 2), "\n");
    }

    #[test]
    fn test_parse_for_two_vars() {
        let doc = parse("% for k, v in obj:\n${k}\n% endfor\n").unwrap();
        let b = block(&doc, 0);
        assert_eq!(b.vars, vec!["k".to_string(), "v".to_string()]);
        assert_eq!(b.expr.as_deref(), Some("obj"));
    }

    #[test]
    fn test_nested_blocks_drop_indentation() {
        let doc = parse(
            "% if foo:\n  % for bar in baz:\n    stuff!\n  % endfor\n% endif",
        )
        .unwrap();
        assert_eq!(doc.children.len(), 1);
        let outer = block(&doc, 0);
        assert_eq!(outer.keyword, Keyword::If);
        assert_eq!(outer.body.children.len(), 1);
        let inner = block(&outer.body, 0);
        assert_eq!(inner.keyword, Keyword::For);
        assert_eq!(inner.body.children.len(), 1);
        assert_eq!(text(&inner.body, 0), "    stuff!\n");
    }

    #[test]
    fn test_if_elif_else_chain() {
        let doc = parse(
            "% if foo:\n  foo\n% elif bar:\n  bar\n% else:\n  neither\n% endif",
        )
        .unwrap();
        let b = block(&doc, 0);
        assert_eq!(text(&b.body, 0), "  foo\n");
        assert_eq!(b.sub_blocks.len(), 2);
        assert_eq!(b.sub_blocks[0].keyword, Keyword::Elif);
        assert_eq!(b.sub_blocks[0].expr.as_deref(), Some("bar"));
        assert_eq!(text(&b.sub_blocks[0].body, 0), "  bar\n");
        assert_eq!(b.sub_blocks[1].keyword, Keyword::Else);
        assert_eq!(b.sub_blocks[1].expr, None);
        assert_eq!(text(&b.sub_blocks[1].body, 0), "  neither\n");
    }

    #[test]
    fn test_expression_with_colon_in_header() {
        let doc = parse("% if a ? b : c:\nx\n% endif\n").unwrap();
        assert_eq!(block(&doc, 0).expr.as_deref(), Some("a ? b : c"));
    }

    #[test]
    fn test_mismatched_end_is_semantic_error() {
        let err = parse("% if a:\nx\n% endfor").unwrap_err();
        match err {
            TemplateError::Semantic { message, location } => {
                assert!(message.contains("endfor"), "{}", message);
                assert!(message.contains("if"), "{}", message);
                assert_eq!(location.line, 3);
            }
            other => panic!("Expected Semantic error, got {:?}", other),
        }
    }

    #[test]
    fn test_end_without_block() {
        let err = parse("x\n% endif\n").unwrap_err();
        assert!(matches!(err, TemplateError::Semantic { .. }));
    }

    #[test]
    fn test_else_after_for_is_semantic_error() {
        let err = parse("% for x in y:\n% else:\n% endfor\n").unwrap_err();
        match err {
            TemplateError::Semantic { message, .. } => assert!(message.contains("for")),
            other => panic!("Expected Semantic error, got {:?}", other),
        }
    }

    #[test]
    fn test_elif_after_else_is_semantic_error() {
        let err = parse("% if a:\n% else:\n% elif b:\n% endif\n").unwrap_err();
        match err {
            TemplateError::Semantic { message, .. } => assert!(message.contains("else")),
            other => panic!("Expected Semantic error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_control_line() {
        let err = parse("ok\n% bogus stuff\n").unwrap_err();
        match err {
            TemplateError::Syntax {
                message, location, ..
            } => {
                assert_eq!(message, "invalid control line");
                assert_eq!(location.line, 2);
            }
            other => panic!("Expected Syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_colon_reports_expectation() {
        let err = parse("% if a\nx\n% endif\n").unwrap_err();
        match err {
            TemplateError::Syntax { expected, location, .. } => {
                assert!(expected.contains(&"\":\"".to_string()), "{:?}", expected);
                assert_eq!(location.line, 1);
                assert_eq!(location.column, 7);
            }
            other => panic!("Expected Syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_crlf_control_lines() {
        let doc = parse("% if a:\r\nx\r\n% else:\r\ny\r\n% endif  \r\n").unwrap();
        let if_block = block(&doc, 0);
        assert_eq!(if_block.expr.as_deref(), Some("a"));
        assert_eq!(text(&if_block.body, 0), "x\r\n");
        assert_eq!(if_block.sub_blocks[0].keyword, Keyword::Else);
        assert_eq!(doc.children.len(), 1);
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse("% while x:\nloop\n").unwrap_err();
        match err {
            TemplateError::Syntax { expected, .. } => {
                assert_eq!(expected, vec!["\"% endwhile\"".to_string()]);
            }
            other => panic!("Expected Syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_synthetic_newline_does_not_leak() {
        let doc = parse("a${x}").unwrap();
        assert_eq!(doc.children.len(), 2);
        let doc = parse("line\n").unwrap();
        assert_eq!(text(&doc, 0), "line\n");
        assert!(parse("").unwrap().children.is_empty());
    }

    #[test]
    fn test_reparse_is_identical() {
        let src = "% for k, v in o:\n${k|h}<% x++ %>\n% endfor\ntail";
        assert_eq!(parse(src).unwrap(), parse(src).unwrap());
    }

    #[test]
    fn test_positions_are_within_source() {
        let src = "ab\n% if x:\n${y}\n% endif\n";
        let doc = parse(src).unwrap();
        let b = block(&doc, 1);
        assert_eq!(b.pos, 3);
        match &b.body.children[0] {
            Node::Expression(e) => assert_eq!(e.pos, 11),
            other => panic!("Expected Expression, got {:?}", other),
        }
    }
}
