use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use log::warn;

use crate::error::Result;
use crate::tpl::engine::Template;

/// Compiled templates by name.
pub(crate) static TEMPLATE_CACHE: LazyLock<DashMap<String, Arc<Template>>> =
    LazyLock::new(DashMap::new);

/// Returns the cached template for `name`, compiling `text` when there is no
/// entry yet or the entry was compiled from different text.
pub fn get_or_compile(name: &str, text: &str) -> Result<Arc<Template>> {
    if let Some(cached) = TEMPLATE_CACHE.get(name) {
        if cached.text() == text {
            return Ok(Arc::clone(cached.value()));
        }
    }

    let template = Arc::new(Template::builder(text).name(name).build()?);
    insert(Arc::clone(&template));
    Ok(template)
}

/// Caches `template` under its name, replacing any previous entry.
pub fn insert(template: Arc<Template>) {
    let name = template.name().to_string();
    let text_changed = TEMPLATE_CACHE
        .get(&name)
        .is_some_and(|old| old.text() != template.text());
    if text_changed {
        warn!("Replacing cached template '{}' with different text", name);
    }
    TEMPLATE_CACHE.insert(name, template);
}

pub fn get(name: &str) -> Option<Arc<Template>> {
    TEMPLATE_CACHE.get(name).map(|t| Arc::clone(t.value()))
}

pub fn remove(name: &str) -> Option<Arc<Template>> {
    TEMPLATE_CACHE.remove(name).map(|(_, t)| t)
}

pub fn clear() {
    TEMPLATE_CACHE.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_compile_reuses_entry() {
        let first = get_or_compile("cache_test.reuse", "a${x}").unwrap();
        let second = get_or_compile("cache_test.reuse", "a${x}").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let changed = get_or_compile("cache_test.reuse", "b${x}").unwrap();
        assert!(!Arc::ptr_eq(&first, &changed));
        assert_eq!(get("cache_test.reuse").unwrap().text(), "b${x}");

        assert!(remove("cache_test.reuse").is_some());
        assert!(get("cache_test.reuse").is_none());
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        assert!(get_or_compile("cache_test.bad", "% endif\n").is_err());
        assert!(get("cache_test.bad").is_none());
    }
}
