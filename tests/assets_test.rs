use serde_json::json;
use tplc::loader;
use tplc::template_assets;

// registered at startup
template_assets!("tests/resources/templates/*.tpl");

#[test]
fn test_embedded_templates_are_registered() {
    let greeting = loader::find_template("assets_greeting")
        .expect("Assets were not loaded automatically. The ctor-based registration failed.");
    assert_eq!(greeting.name(), "assets_greeting");
    assert_eq!(
        greeting.render(&json!({"name": "<Ann>"})).unwrap(),
        "Hello, &lt;Ann&gt;!\n"
    );

    let list = loader::find_template("assets_list").unwrap();
    assert_eq!(
        list.render(&json!({"items": [" a ", "b "]})).unwrap(),
        "- a\n- b\n"
    );
}

#[test]
fn test_load_from_disk() {
    loader::load("tests/resources/disk/*.tpl").unwrap();
    let badge = loader::find_template("disk_badge").unwrap();
    assert_eq!(
        badge.render(&json!({"user": {"name": "Root", "admin": true}})).unwrap(),
        "[admin] Root\n"
    );
    assert_eq!(
        badge.render(&json!({"user": {"name": "Guest"}})).unwrap(),
        "Guest\n"
    );

    // loading the same files again is fine
    loader::load("tests/resources/disk/*.tpl").unwrap();
}

#[test]
fn test_unknown_template() {
    assert!(loader::find_template("assets_missing").is_none());
}
