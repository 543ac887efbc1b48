use serde::Serialize;
use std::fmt;

/// Control keywords a `%` line can carry. `end<kw>` lines close a block and
/// never become nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Keyword {
    If,
    Elif,
    Else,
    For,
    While,
}

impl Keyword {
    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::For => "for",
            Keyword::While => "while",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal text. Adjacent runs are always merged into one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextNode {
    pub pos: usize,
    pub value: String,
}

/// A `${expr|f1,f2}` interpolation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionNode {
    pub pos: usize,
    /// Raw expression source, spliced verbatim into generated code.
    pub expr: String,
    pub filters: Vec<String>,
}

impl ExpressionNode {
    /// Offset of the first character of `expr` (just past `${`).
    pub fn expr_pos(&self) -> usize {
        self.pos + 2
    }
}

/// A `<% code %>` escape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeNode {
    pub pos: usize,
    pub body: String,
}

impl CodeNode {
    /// Offset of the first character of `body` (just past `<%`).
    pub fn body_pos(&self) -> usize {
        self.pos + 2
    }
}

/// A `% if/elif/else/for/while` block.
///
/// Only the block-opening node (`if`) carries `sub_blocks`: zero or more
/// `elif` blocks followed by at most one `else`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlBlock {
    pub pos: usize,
    pub keyword: Keyword,
    /// Condition or iterable; `None` for `else`.
    pub expr: Option<String>,
    /// Loop variables of a `for`: `[item]` or `[key, item]`.
    pub vars: Vec<String>,
    pub body: Doc,
    pub sub_blocks: Vec<ControlBlock>,
}

impl ControlBlock {
    pub fn new(pos: usize, keyword: Keyword, expr: Option<String>, vars: Vec<String>) -> Self {
        Self {
            pos,
            keyword,
            expr,
            vars,
            body: Doc::new(pos),
            sub_blocks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    #[serde(rename = "string")]
    Text(TextNode),
    Expression(ExpressionNode),
    #[serde(rename = "codeblock")]
    Code(CodeNode),
    #[serde(rename = "controlblock")]
    Control(ControlBlock),
}

impl Node {
    pub fn pos(&self) -> usize {
        match self {
            Node::Text(n) => n.pos,
            Node::Expression(n) => n.pos,
            Node::Code(n) => n.pos,
            Node::Control(n) => n.pos,
        }
    }
}

/// A sequence region; the root of every parse result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Doc {
    pub pos: usize,
    pub children: Vec<Node>,
}

impl Doc {
    pub fn new(pos: usize) -> Self {
        Self {
            pos,
            children: Vec::new(),
        }
    }

    /// Appends a node, merging literal text into a trailing text node.
    pub fn push(&mut self, node: Node) {
        if let Node::Text(text) = &node {
            if let Some(Node::Text(last)) = self.children.last_mut() {
                last.value.push_str(&text.value);
                return;
            }
        }
        self.children.push(node);
    }

    /// Appends literal text at `pos`, merging with a trailing text node.
    pub fn push_text(&mut self, pos: usize, text: &str) {
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.value.push_str(text);
        } else {
            self.children.push(Node::Text(TextNode {
                pos,
                value: text.to_string(),
            }));
        }
    }

    /// Total number of nodes in this subtree, excluding `self`.
    pub fn node_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                Node::Control(block) => 1 + block_node_count(block),
                _ => 1,
            })
            .sum()
    }
}

fn block_node_count(block: &ControlBlock) -> usize {
    block.body.node_count()
        + block
            .sub_blocks
            .iter()
            .map(|sub| 1 + block_node_count(sub))
            .sum::<usize>()
}
