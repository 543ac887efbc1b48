pub mod serializer;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::Result;

/// Ordered key-value map; iteration follows insertion order.
pub type Map = IndexMap<String, Value>;

/// The dynamic value model seen by template expressions and code blocks.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// A missing value (unknown name, absent key, out-of-range index).
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Ordered list of values (e.g. arrays, tuples)
    List(Vec<Value>),
    /// Key-value map (e.g. structs, JSON objects)
    Map(Map),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) => true,
        }
    }

    /// Numeric coercion: strings are parsed after trimming, the empty string is 0.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else {
                    s.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::List(_) | Value::Map(_) => f64::NAN,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "object",
        }
    }

    /// Own keys in enumeration order: list/string indices, map keys.
    pub fn keys(&self) -> Vec<Value> {
        match self {
            Value::List(items) => (0..items.len()).map(|i| Value::Number(i as f64)).collect(),
            Value::Str(s) => (0..s.chars().count())
                .map(|i| Value::Number(i as f64))
                .collect(),
            Value::Map(map) => map.keys().map(|k| Value::Str(k.clone())).collect(),
            _ => Vec::new(),
        }
    }

    /// Property lookup by name; `None` means the receiver cannot have properties.
    pub fn get_property(&self, name: &str) -> Option<Value> {
        match self {
            Value::Undefined | Value::Null => None,
            Value::Map(map) => Some(map.get(name).cloned().unwrap_or_default()),
            Value::List(items) => Some(match name {
                "length" => Value::Number(items.len() as f64),
                _ => index_of(name)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            }),
            Value::Str(s) => Some(match name {
                "length" => Value::Number(s.chars().count() as f64),
                _ => index_of(name)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or_default(),
            }),
            Value::Bool(_) | Value::Number(_) => Some(Value::Undefined),
        }
    }

    /// Index lookup with a computed key (`a[k]`).
    pub fn get_index(&self, key: &Value) -> Option<Value> {
        match (self, key) {
            (Value::List(items), Value::Number(n)) => Some(
                as_index(*n)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            ),
            (Value::Str(s), Value::Number(n)) => Some(
                as_index(*n)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or_default(),
            ),
            _ => self.get_property(&key.to_string()),
        }
    }
}

fn index_of(name: &str) -> Option<usize> {
    name.parse::<usize>().ok()
}

fn as_index(n: f64) -> Option<usize> {
    if n >= 0.0 && n.fract() == 0.0 && n < usize::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

/// Formats a number the way dynamic-language string conversion does:
/// integral values print without a fraction, `-0` prints as `0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        "0".to_string()
    } else if n.abs() >= 1e21 || n.abs() < 1e-6 {
        exponential(n)
    } else {
        format!("{}", n)
    }
}

/// `1e+21`, `1.5e-7`: shortest mantissa, signed exponent.
fn exponential(n: f64) -> String {
    let formatted = format!("{:e}", n);
    match formatted.split_once('e') {
        Some((mantissa, exp)) if exp.starts_with('-') => format!("{}e{}", mantissa, exp),
        Some((mantissa, exp)) => format!("{}e+{}", mantissa, exp),
        None => formatted,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match item {
                        Value::Undefined | Value::Null => {}
                        other => write!(f, "{}", other)?,
                    }
                }
                Ok(())
            }
            Value::Map(_) => f.write_str("[object Object]"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serializer.serialize_i64(*n as i64)
                } else if n.is_finite() {
                    serializer.serialize_f64(*n)
                } else {
                    serializer.serialize_none()
                }
            }
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

/// Converts any serializable data into a [`Value`].
///
/// A top-level null (e.g. `&()`) becomes an empty map, so it can serve as
/// a render scope. Nested nulls stay null.
pub fn to_value<T: Serialize + ?Sized>(data: &T) -> Result<Value> {
    match data.serialize(serializer::ValueSerializer)? {
        Value::Null => Ok(Value::Map(Map::new())),
        value => Ok(value),
    }
}

/// Anything that can be turned into a [`Value`] without going through serde.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

macro_rules! impl_to_value_number {
    ($($rust_type:ty),*) => {
        $(
            impl ToValue for $rust_type {
                fn to_value(&self) -> Value {
                    Value::Number(*self as f64)
                }
            }
        )*
    };
}

impl_to_value_number!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ToValue for char {
    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl ToValue for () {
    fn to_value(&self) -> Value {
        Value::Map(Map::new())
    }
}

impl<T> ToValue for &T
where
    T: ToValue + ?Sized,
{
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(|v| v.to_value()).collect())
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(|v| v.to_value()).collect())
    }
}

impl<T: ToValue> ToValue for IndexMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.clone(), v.to_value())).collect())
    }
}

impl<T: ToValue> ToValue for BTreeMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.clone(), v.to_value())).collect())
    }
}

// HashMap has no stable order; keys are sorted so renders are deterministic.
impl<T: ToValue> ToValue for HashMap<String, T> {
    fn to_value(&self) -> Value {
        let mut keys: Vec<&String> = self.keys().collect();
        keys.sort();
        Value::Map(
            keys.into_iter()
                .map(|k| (k.clone(), self[k].to_value()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("0".to_string()).is_truthy());
        assert!(Value::List(vec![]).is_truthy());
        assert!(Value::Map(Map::new()).is_truthy());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(Value::Number(1.0).to_string(), "1");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Number(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(Value::Number(1e21).to_string(), "1e+21");
        assert_eq!(Value::Number(-2.5e22).to_string(), "-2.5e+22");
        assert_eq!(Value::Number(1e-7).to_string(), "1e-7");
        assert_eq!(Value::Number(0.000001).to_string(), "0.000001");
        assert_eq!(Value::Number(123456789012345680000.0).to_string(), "123456789012345680000");
    }

    #[test]
    fn test_top_level_null_is_empty_scope() {
        assert_eq!(to_value(&()).unwrap(), Value::Map(Map::new()));
        assert_eq!(
            to_value(&serde_json::json!({"x": null})).unwrap(),
            Value::Map(Map::from_iter([("x".to_string(), Value::Null)]))
        );
    }

    #[test]
    fn test_list_display_skips_missing() {
        let v = Value::List(vec![
            Value::Number(1.0),
            Value::Null,
            Value::Str("x".to_string()),
        ]);
        assert_eq!(v.to_string(), "1,,x");
    }

    #[test]
    fn test_property_and_index() {
        let list = vec![10, 20].to_value();
        assert_eq!(list.get_property("length"), Some(Value::Number(2.0)));
        assert_eq!(list.get_index(&Value::Number(1.0)), Some(Value::Number(20.0)));
        assert_eq!(list.get_index(&Value::Number(5.0)), Some(Value::Undefined));
        assert_eq!(Value::Undefined.get_property("x"), None);
        assert_eq!(Value::Null.get_index(&Value::Number(0.0)), None);
        assert_eq!(
            "héllo".to_value().get_index(&Value::Number(1.0)),
            Some(Value::Str("é".to_string()))
        );
    }

    #[test]
    fn test_to_number_coercion() {
        assert_eq!(Value::Str(" 42 ".to_string()).to_number(), 42.0);
        assert_eq!(Value::Str(String::new()).to_number(), 0.0);
        assert!(Value::Str("abc".to_string()).to_number().is_nan());
        assert_eq!(Value::Bool(true).to_number(), 1.0);
        assert_eq!(Value::Null.to_number(), 0.0);
    }

    #[test]
    fn test_hashmap_keys_are_sorted() {
        let mut map = HashMap::new();
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 1);
        let keys = map.to_value().keys();
        assert_eq!(
            keys,
            vec![Value::Str("a".to_string()), Value::Str("b".to_string())]
        );
    }
}
