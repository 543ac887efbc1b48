use tplc::loader;
use tplc::tpl::cache;

#[test]
fn test_clear_forgets_loaded_templates() {
    let _ = env_logger::builder().is_test(true).try_init();

    loader::load_assets(vec![("inline/clear_me.tpl", "${x}")]).unwrap();
    cache::get_or_compile("unrelated", "u").unwrap();
    assert!(loader::find_template("clear_me").is_some());

    loader::clear();
    assert!(loader::find_template("clear_me").is_none());
    assert!(cache::get("clear_me").is_none());
    // only loader entries are dropped
    assert!(cache::get("unrelated").is_some());

    loader::load_assets(vec![("other/clear_me.tpl", "again")]).unwrap();
    assert_eq!(
        loader::find_template("clear_me").unwrap().render_empty().unwrap(),
        "again"
    );
}
