//! Turns a (transformed) template tree into render-script source.
//!
//! The output is a single function of one parameter, the render context:
//!
//! ```text
//! function render(__context) {
//! __context.write("Hello, ");
//! __context.write(__context.filter("h", (name)), true);
//! }
//! ```
//!
//! Every node starts on a fresh line, and the line it starts on is recorded
//! in a [`PositionMap`] together with the node's template offset.

use serde::Serialize;

use crate::tpl::ast::{CodeNode, ControlBlock, Doc, ExpressionNode, Keyword, TextNode};
use crate::tpl::position_map::PositionMap;
use crate::tpl::walker::{walk_node, Walker};

pub const RENDER_FN_NAME: &str = "render";
pub const CONTEXT_PARAM: &str = "__context";

/// Generated source plus the map from its lines back to the template.
#[derive(Debug, Clone, Serialize)]
pub struct Compiled {
    pub source: String,
    pub positions: PositionMap,
}

impl Compiled {
    pub fn source_line_to_template_pos(&self, line: usize) -> Option<usize> {
        self.positions.source_line_to_template_pos(line)
    }

    /// Number of lines in the generated source.
    pub fn line_count(&self) -> usize {
        self.source.lines().count()
    }
}

pub fn compile(doc: &Doc) -> Compiled {
    let mut generator = Generator::new();
    generator.emit(&format!("function {}({}) {{\n", RENDER_FN_NAME, CONTEXT_PARAM));
    generator.walk(doc);
    generator.emit("}\n");
    Compiled {
        source: generator.out,
        positions: generator.positions,
    }
}

struct Generator {
    out: String,
    /// 1-based line the next emitted character lands on.
    line: usize,
    positions: PositionMap,
    loops: usize,
}

impl Generator {
    fn new() -> Self {
        Self {
            out: String::new(),
            line: 1,
            positions: PositionMap::new(),
            loops: 0,
        }
    }

    fn emit(&mut self, code: &str) {
        self.line += code.matches('\n').count();
        self.out.push_str(code);
    }

    /// Emits template text verbatim, mapping each line it starts to the
    /// template offset just past the newline that started it.
    fn emit_fragment(&mut self, fragment: &str, template_pos: usize) {
        let mut offset = 0;
        for piece in fragment.split_inclusive('\n') {
            self.emit(piece);
            offset += piece.len();
            if piece.ends_with('\n') {
                self.positions.record(self.line, template_pos + offset);
            }
        }
    }

    fn mark(&mut self, template_pos: usize) {
        self.positions.record(self.line, template_pos);
    }

    fn close(&mut self) {
        self.emit("}\n");
    }

    fn emit_for(&mut self, block: &ControlBlock, expr: &str) {
        let n = self.loops;
        self.loops += 1;
        let iterable = format!("__tplIterable{}", n);
        let (key, item) = match block.vars.as_slice() {
            [key, item, ..] => (key.clone(), item.clone()),
            [item] => (format!("__tplKey{}", n), item.clone()),
            [] => (format!("__tplKey{}", n), format!("__tplItem{}", n)),
        };

        self.emit(&format!("var {} = ({});\n", iterable, expr));
        self.emit(&format!("for (var {} in {}) {{\n", key, iterable));
        self.emit(&format!("var {} = {}[{}];\n", item, iterable, key));
        self.walk_doc(&block.body);
        self.close();
    }
}

impl Walker for Generator {
    fn walk_doc(&mut self, doc: &Doc) {
        for child in &doc.children {
            self.mark(child.pos());
            walk_node(self, child);
        }
    }

    fn walk_text(&mut self, node: &TextNode) {
        self.emit(&format!(
            "{}.write({});\n",
            CONTEXT_PARAM,
            quote(&node.value)
        ));
    }

    fn walk_expression(&mut self, node: &ExpressionNode) {
        self.emit(&format!("{}.write(", CONTEXT_PARAM));
        for filter in &node.filters {
            self.emit(&format!("{}.filter({}, ", CONTEXT_PARAM, quote(filter)));
        }
        self.emit("(");
        self.emit_fragment(&node.expr, node.expr_pos());
        self.emit(")");
        self.emit(&")".repeat(node.filters.len()));
        self.emit(", true);\n");
    }

    fn walk_code(&mut self, node: &CodeNode) {
        self.emit_fragment(&node.body, node.body_pos());
        self.emit("\n");
    }

    fn walk_control(&mut self, block: &ControlBlock) {
        let expr = block.expr.as_deref().unwrap_or_default();
        match block.keyword {
            Keyword::For => return self.emit_for(block, expr),
            Keyword::If => self.emit(&format!("if ({}) {{\n", expr)),
            Keyword::While => self.emit(&format!("while ({}) {{\n", expr)),
            Keyword::Elif => self.emit(&format!("else if ({}) {{\n", expr)),
            Keyword::Else => self.emit("else {\n"),
        }
        self.walk_doc(&block.body);
        self.close();
        for sub in &block.sub_blocks {
            self.mark(sub.pos);
            self.walk_control(sub);
        }
    }
}

/// Quotes `text` as a string literal of the render-script language.
fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::parser::parse;
    use crate::tpl::transform::apply_default_filters;

    fn generate(text: &str) -> Compiled {
        compile(&parse(text).unwrap())
    }

    #[test]
    fn test_text_and_expression() {
        let compiled = generate("Hi \"${name}\"\n");
        assert_eq!(
            compiled.source,
            "function render(__context) {\n\
             __context.write(\"Hi \\\"\");\n\
             __context.write((name), true);\n\
             __context.write(\"\\\"\\n\");\n\
             }\n"
        );
    }

    #[test]
    fn test_left_filter_is_outermost() {
        let mut doc = parse("${v|a,b}").unwrap();
        apply_default_filters(&mut doc, &["h".to_string()]);
        let compiled = compile(&doc);
        assert!(compiled.source.contains(
            "__context.write(__context.filter(\"a\", __context.filter(\"b\", __context.filter(\"h\", (v)))), true);"
        ));
    }

    #[test]
    fn test_for_loop_shapes() {
        let one = generate("% for x in items:\n${x}\n% endfor\n");
        assert!(one.source.contains("var __tplIterable0 = (items);\n"));
        assert!(one.source.contains("for (var __tplKey0 in __tplIterable0) {\n"));
        assert!(one.source.contains("var x = __tplIterable0[__tplKey0];\n"));

        let two = generate("% for k, v in obj:\n% for y in v:\n% endfor\n% endfor\n");
        assert!(two.source.contains("for (var k in __tplIterable0) {\n"));
        assert!(two.source.contains("var v = __tplIterable0[k];\n"));
        assert!(two.source.contains("for (var __tplKey1 in __tplIterable1) {\n"));
    }

    #[test]
    fn test_if_chain_shape() {
        let compiled = generate("% if a:\nA\n% elif b:\nB\n% else:\nC\n% endif\n");
        let expected = "function render(__context) {\n\
                        if (a) {\n\
                        __context.write(\"A\\n\");\n\
                        }\n\
                        else if (b) {\n\
                        __context.write(\"B\\n\");\n\
                        }\n\
                        else {\n\
                        __context.write(\"C\\n\");\n\
                        }\n\
                        }\n";
        assert_eq!(compiled.source, expected);
    }

    #[test]
    fn test_code_block_is_spliced() {
        let compiled = generate("<% var total = 1 + 2; %>${total}");
        assert!(compiled
            .source
            .contains("\n var total = 1 + 2; \n__context.write((total), true);\n"));
    }

    #[test]
    fn test_position_map_per_node() {
        let compiled = generate("1\n2\n${bad.expr}");
        // line 2: the text node, line 3: the expression
        assert_eq!(compiled.source_line_to_template_pos(1), None);
        assert_eq!(compiled.source_line_to_template_pos(2), Some(0));
        assert_eq!(compiled.source_line_to_template_pos(3), Some(4));
    }

    #[test]
    fn test_multiline_code_maps_each_line() {
        let text = "ab<% var x = 1;\nvar y = 2;\nz(); %>";
        let compiled = generate(text);
        // line 3 holds `<% var x = 1;`, lines 4 and 5 the following body lines
        assert_eq!(compiled.source_line_to_template_pos(3), Some(2));
        assert_eq!(
            compiled.source_line_to_template_pos(4),
            Some(text.find("var y").unwrap())
        );
        assert_eq!(
            compiled.source_line_to_template_pos(5),
            Some(text.find("z()").unwrap())
        );
    }

    #[test]
    fn test_position_map_covers_block_chains() {
        let text = "% if a:\nA\n% else:\n${b.c}\n% endif\n";
        let compiled = generate(text);
        let line_of = |needle: &str| {
            compiled
                .source
                .lines()
                .position(|l| l.starts_with(needle))
                .map(|i| i + 1)
                .unwrap()
        };
        assert_eq!(compiled.source_line_to_template_pos(line_of("if (a)")), Some(0));
        assert_eq!(
            compiled.source_line_to_template_pos(line_of("else {")),
            Some(text.find("% else").unwrap())
        );
        assert_eq!(
            compiled.source_line_to_template_pos(line_of("__context.write((b.c)")),
            Some(text.find("${b.c}").unwrap())
        );
    }
}
