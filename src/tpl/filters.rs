use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::tpl::transform::NO_DEFAULT_FILTERS;
use crate::value::Value;

/// A named output transform. Errors are plain messages; the render context
/// attaches the template position.
pub type FilterFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

static BUILTIN: LazyLock<Arc<FilterRegistry>> = LazyLock::new(|| Arc::new(FilterRegistry::builtin()));

/// Filters available to `${expr|name}`.
///
/// The built-in filters work on text and stringify their input first. User
/// filters receive the value as it is.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    /// An empty registry; only `n` is available.
    pub fn new() -> Self {
        Self::default()
    }

    /// `h`, `u`, `trim` and `json`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_text("h", escape_html);
        registry.register_text("u", escape_url);
        registry.register_text("trim", trim);
        registry.register("json", |value| {
            serde_json::to_string(&value)
                .map(Value::Str)
                .map_err(|e| format!("json filter failed: {}", e))
        });
        registry
    }

    /// The process-wide built-in registry.
    pub fn shared() -> Arc<FilterRegistry> {
        Arc::clone(&BUILTIN)
    }

    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name, filter);
        self
    }

    fn register_text(&mut self, name: &str, filter: fn(&str) -> String) {
        self.register(name, move |value: Value| {
            Ok(Value::Str(match value {
                Value::Str(s) => filter(&s),
                other => filter(&other.to_string()),
            }))
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        name == NO_DEFAULT_FILTERS || self.filters.contains_key(name)
    }

    /// Applies filter `name` to `value`.
    ///
    /// `undefined` passes through every filter untouched, and `n` never
    /// changes its input.
    pub fn apply(&self, name: &str, value: Value) -> Result<Value, String> {
        if value.is_undefined() {
            return Ok(value);
        }
        if name == NO_DEFAULT_FILTERS {
            return Ok(value);
        }
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| format!("no such filter: {}", name))?;
        filter(value)
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry")
            .field("filters", &names)
            .finish()
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Legacy `escape()` encoding: `%XX` below 256, `%uXXXX` for other UTF-16
/// code units.
pub fn escape_url(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match char::from_u32(u32::from(unit)) {
            Some(c) if c.is_ascii_alphanumeric() || "@*_+-./".contains(c) => out.push(c),
            _ if unit < 256 => out.push_str(&format!("%{:02X}", unit)),
            _ => out.push_str(&format!("%u{:04X}", unit)),
        }
    }
    out
}

pub fn trim(text: &str) -> String {
    text.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\u{b}'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(escape_html("&<>'\""), "&amp;&lt;&gt;&#39;&#34;");
        assert_eq!(escape_html("plain é"), "plain é");
    }

    #[test]
    fn test_url_escape() {
        assert_eq!(escape_url("a b&c/d.e"), "a%20b%26c/d.e");
        assert_eq!(escape_url("é"), "%E9");
        assert_eq!(escape_url("€"), "%u20AC");
        assert_eq!(escape_url("😀"), "%uD83D%uDE00");
    }

    #[test]
    fn test_trim() {
        assert_eq!(trim(" \t<b>\n\u{b}"), "<b>");
        assert_eq!(trim("\r x \r"), "\r x \r");
    }

    #[test]
    fn test_apply_rules() {
        let registry = FilterRegistry::builtin();
        assert_eq!(
            registry.apply("h", Value::Number(1.0)),
            Ok(Value::Str("1".to_string()))
        );
        assert_eq!(registry.apply("h", Value::Undefined), Ok(Value::Undefined));
        assert_eq!(registry.apply("bogus", Value::Undefined), Ok(Value::Undefined));
        assert_eq!(
            registry.apply("n", Value::Str("&".to_string())),
            Ok(Value::Str("&".to_string()))
        );
        assert_eq!(
            registry.apply("bogus", Value::Null),
            Err("no such filter: bogus".to_string())
        );
        assert_eq!(
            registry.apply("json", Value::List(vec![Value::Number(1.0), Value::Str("a".to_string())])),
            Ok(Value::Str("[1,\"a\"]".to_string()))
        );
    }

    #[test]
    fn test_user_filter_gets_raw_value() {
        let registry = FilterRegistry::new().with("double", |v| match v {
            Value::Number(n) => Ok(Value::Number(n * 2.0)),
            other => Err(format!("double expects a number, got {}", other.type_name())),
        });
        assert_eq!(
            registry.apply("double", Value::Number(2.5)),
            Ok(Value::Number(5.0))
        );
        assert!(registry.apply("double", Value::Str("x".into())).is_err());
        assert!(registry.contains("n"));
        assert!(!registry.contains("h"));
    }
}
