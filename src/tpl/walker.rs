//! Depth-first traversal over the template tree.
//!
//! Implementors override only the handlers they care about; the defaults
//! recurse into documents and control blocks (body first, then `elif`/`else`
//! sub-blocks in order) and do nothing for leaves.

use crate::tpl::ast::{CodeNode, ControlBlock, Doc, ExpressionNode, Node, TextNode};

pub trait Walker {
    fn walk(&mut self, doc: &Doc) {
        self.walk_doc(doc);
    }

    fn walk_doc(&mut self, doc: &Doc) {
        for child in &doc.children {
            walk_node(self, child);
        }
    }

    fn walk_text(&mut self, _node: &TextNode) {}

    fn walk_expression(&mut self, _node: &ExpressionNode) {}

    fn walk_code(&mut self, _node: &CodeNode) {}

    fn walk_control(&mut self, block: &ControlBlock) {
        walk_control_children(self, block);
    }
}

/// Dispatches `node` to the matching handler of `walker`.
pub fn walk_node<W: Walker + ?Sized>(walker: &mut W, node: &Node) {
    match node {
        Node::Text(n) => walker.walk_text(n),
        Node::Expression(n) => walker.walk_expression(n),
        Node::Code(n) => walker.walk_code(n),
        Node::Control(n) => walker.walk_control(n),
    }
}

/// Default recursion of a control block: its body, then each sub-block.
pub fn walk_control_children<W: Walker + ?Sized>(walker: &mut W, block: &ControlBlock) {
    walker.walk_doc(&block.body);
    for sub in &block.sub_blocks {
        walker.walk_control(sub);
    }
}

/// [`Walker`] over a mutable tree, for passes that rewrite nodes in place.
pub trait WalkerMut {
    fn walk(&mut self, doc: &mut Doc) {
        self.walk_doc(doc);
    }

    fn walk_doc(&mut self, doc: &mut Doc) {
        for child in &mut doc.children {
            walk_node_mut(self, child);
        }
    }

    fn walk_text(&mut self, _node: &mut TextNode) {}

    fn walk_expression(&mut self, _node: &mut ExpressionNode) {}

    fn walk_code(&mut self, _node: &mut CodeNode) {}

    fn walk_control(&mut self, block: &mut ControlBlock) {
        walk_control_children_mut(self, block);
    }
}

pub fn walk_node_mut<W: WalkerMut + ?Sized>(walker: &mut W, node: &mut Node) {
    match node {
        Node::Text(n) => walker.walk_text(n),
        Node::Expression(n) => walker.walk_expression(n),
        Node::Code(n) => walker.walk_code(n),
        Node::Control(n) => walker.walk_control(n),
    }
}

pub fn walk_control_children_mut<W: WalkerMut + ?Sized>(walker: &mut W, block: &mut ControlBlock) {
    walker.walk_doc(&mut block.body);
    for sub in &mut block.sub_blocks {
        walker.walk_control(sub);
    }
}
