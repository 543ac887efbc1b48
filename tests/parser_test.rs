use tplc::tpl::ast::{Keyword, Node};
use tplc::tpl::codegen::compile;
use tplc::tpl::parser::parse;
use tplc::tpl::transform::apply_default_filters;

const PAGE: &str = "<h1>${title|trim}</h1>\n\
% for i, item in items:\n\
  % if item.done:\n\
<s>${item.name}</s>\n\
  % elif item.urgent:\n\
<b>${item.name}</b>\n\
  % else:\n\
${item.name}\n\
  % endif\n\
% endfor\n\
<% var footer = \"bye\"; %>${footer|n}\n";

#[test]
fn test_reparse_is_identical() {
    let first = parse(PAGE).unwrap();
    let second = parse(PAGE).unwrap();
    assert_eq!(first, second);
    assert_eq!(compile(&first).source, compile(&second).source);
}

#[test]
fn test_page_structure() {
    let doc = parse(PAGE).unwrap();
    let kinds: Vec<&str> = doc
        .children
        .iter()
        .map(|node| match node {
            Node::Text(_) => "text",
            Node::Expression(_) => "expression",
            Node::Code(_) => "code",
            Node::Control(_) => "control",
        })
        .collect();
    assert_eq!(
        kinds,
        ["text", "expression", "text", "control", "code", "expression", "text"]
    );

    let Node::Control(for_block) = &doc.children[3] else {
        panic!("Expected for block");
    };
    assert_eq!(for_block.keyword, Keyword::For);
    assert_eq!(for_block.vars, ["i", "item"]);
    assert_eq!(for_block.expr.as_deref(), Some("items"));

    let Some(Node::Control(if_block)) = for_block.body.children.first() else {
        panic!("Expected if block inside the loop");
    };
    let chain: Vec<Keyword> = if_block.sub_blocks.iter().map(|b| b.keyword).collect();
    assert_eq!(chain, [Keyword::Elif, Keyword::Else]);
    assert_eq!(if_block.expr.as_deref(), Some("item.done"));
    assert_eq!(if_block.sub_blocks[0].expr.as_deref(), Some("item.urgent"));
}

#[test]
fn test_positions_point_at_source() {
    let doc = parse(PAGE).unwrap();
    for node in &doc.children {
        let at = &PAGE[node.pos()..];
        match node {
            Node::Expression(_) => assert!(at.starts_with("${")),
            Node::Code(_) => assert!(at.starts_with("<%")),
            Node::Control(_) => assert!(at.starts_with('%')),
            Node::Text(_) => {}
        }
    }
}

#[test]
fn test_default_filters_on_page() {
    let mut doc = parse(PAGE).unwrap();
    apply_default_filters(&mut doc, &["h".to_string()]);
    let filters: Vec<Vec<String>> = doc
        .children
        .iter()
        .filter_map(|node| match node {
            Node::Expression(e) => Some(e.filters.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(filters, [vec!["trim", "h"], vec!["n"]]);
}

#[test]
fn test_ast_serializes_with_node_types() {
    let doc = parse("a${b}").unwrap();
    let json = serde_json::to_value(&doc).unwrap();
    assert_eq!(json["children"][0]["type"], "string");
    assert_eq!(json["children"][1]["type"], "expression");
    assert_eq!(json["children"][1]["expr"], "b");
}
