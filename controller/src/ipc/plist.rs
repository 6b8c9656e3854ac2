//! Property-list helpers over parsed s-expressions.
//!
//! Handles both `Value::Keyword("key")` (elisp parser) and
//! `Value::Symbol(":key")` (default parser) key forms.

use lexpr::Value;

/// Strip the keyword prefix from a plist key, if `value` is a key.
fn key_name(value: &Value) -> Option<String> {
    match value {
        Value::Keyword(k) => Some(k.to_string()),
        Value::Symbol(s) => s.strip_prefix(':').map(str::to_string),
        _ => None,
    }
}

/// Render a scalar value as text; keywords lose their colon.
pub fn value_text(val: &Value) -> String {
    match val {
        Value::Keyword(v) => v.to_string(),
        Value::Symbol(v) => {
            let s = v.to_string();
            s.strip_prefix(':').unwrap_or(&s).to_string()
        }
        Value::String(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "t" } else { "nil" }.to_string(),
        Value::Null | Value::Nil => "nil".to_string(),
        _ => val.to_string(),
    }
}

/// Look up the raw value following `:key` in a plist.
pub fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = value;
    while let Value::Cons(pair) = current {
        if key_name(pair.car()).as_deref() == Some(key) {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Extract a keyword value from an s-expression plist as text.
pub fn get_keyword(value: &Value, key: &str) -> Option<String> {
    get_value(value, key).map(value_text)
}

pub fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

pub fn get_string(value: &Value, key: &str) -> Option<String> {
    get_keyword(value, key)
}

pub fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Scalar text of every element of a proper list; `nil` is the empty list.
pub fn list_texts(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Null | Value::Nil => Some(Vec::new()),
        Value::Symbol(s) if s.as_ref() == "nil" => Some(Vec::new()),
        Value::Cons(_) | Value::Vector(_) => {
            let items: Vec<String> = match value {
                Value::Vector(v) => v.iter().map(value_text).collect(),
                _ => value.list_iter()?.map(value_text).collect(),
            };
            Some(items)
        }
        _ => None,
    }
}

/// All `(key, value)` pairs of a plist, in order.  Non-key atoms in key
/// position are skipped.
pub fn entries(value: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    let mut current = value;
    while let Value::Cons(pair) = current {
        match (key_name(pair.car()), pair.cdr()) {
            (Some(key), Value::Cons(next)) => {
                out.push((key, next.car()));
                current = next.cdr();
            }
            _ => current = pair.cdr(),
        }
    }
    out
}

/// Escape a string for s-expression output.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Quote a string for s-expression output.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", escape_string(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("hello"), "hello");
        assert_eq!(escape_string("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_string("a\\b"), "a\\\\b");
        assert_eq!(quote("x\"y"), "\"x\\\"y\"");
    }

    #[test]
    fn test_get_keyword_from_plist() {
        let v = lexpr::from_str("(:type :hello :version 1)").unwrap();
        assert_eq!(get_keyword(&v, "type"), Some("hello".to_string()));
        assert_eq!(get_keyword(&v, "version"), Some("1".to_string()));
        assert_eq!(get_keyword(&v, "missing"), None);
    }

    #[test]
    fn test_get_keyword_string_value() {
        let v = lexpr::from_str("(:type :hello :client \"board-ui\")").unwrap();
        assert_eq!(get_string(&v, "client"), Some("board-ui".to_string()));
    }

    #[test]
    fn test_get_keyword_empty_list() {
        let v = lexpr::from_str("()").unwrap();
        assert_eq!(get_keyword(&v, "type"), None);
    }

    #[test]
    fn test_numbers() {
        let v = lexpr::from_str("(:id 42 :x -100 :speed 10 :ratio 0.25 :name :fast)").unwrap();
        assert_eq!(get_int(&v, "id"), Some(42));
        assert_eq!(get_int(&v, "x"), Some(-100));
        assert_eq!(get_float(&v, "speed"), Some(10.0));
        assert_eq!(get_float(&v, "ratio"), Some(0.25));
        assert_eq!(get_int(&v, "name"), None);
    }

    #[test]
    fn test_list_texts() {
        let v = lexpr::from_str("(:labels (\"I\" \"want\" more) :none nil :scalar 3)").unwrap();
        assert_eq!(
            get_value(&v, "labels").and_then(list_texts),
            Some(vec!["I".to_string(), "want".to_string(), "more".to_string()])
        );
        assert_eq!(get_value(&v, "none").and_then(list_texts), Some(vec![]));
        assert_eq!(get_value(&v, "scalar").and_then(list_texts), None);
    }

    #[test]
    fn test_entries_in_order() {
        let v = lexpr::from_str("(:type :expression :smile-left 0.8 :smile-right 0.7)").unwrap();
        let keys: Vec<String> = entries(&v).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["type", "smile-left", "smile-right"]);
    }
}
