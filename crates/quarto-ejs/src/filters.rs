/*
 * filters.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Named value transforms used by `<%=: value | filter:args %>` pipelines.
//!
//! Filters are plain functions of `(value, args) -> value`. The registry is
//! consulted only while a compiled program runs, so an unknown filter name
//! compiles fine and fails with [`RuntimeError::FilterNotFound`] when the
//! pipeline executes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::{Value, join_array};

/// A filter function. Errors are reported as plain messages and wrapped
/// into [`RuntimeError::Filter`] by the registry.
pub type FilterFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync>;

/// Registry of filters by name.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry")
            .field("filters", &names)
            .finish()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FilterRegistry {
    /// A registry with no filters at all.
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// A registry holding the built-in filter set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry
            .register("first", first)
            .register("last", last)
            .register("capitalize", capitalize)
            .register("downcase", downcase)
            .register("upcase", upcase)
            .register("sort", sort)
            .register("sort_by", sort_by)
            .register("size", size)
            .register("length", size)
            .register("plus", plus)
            .register("minus", minus)
            .register("times", times)
            .register("divided_by", divided_by)
            .register("join", join)
            .register("truncate", truncate)
            .register("truncate_words", truncate_words)
            .register("replace", replace)
            .register("prepend", prepend)
            .register("append", append)
            .register("map", map)
            .register("reverse", reverse)
            .register("get", get)
            .register("json", json);
        registry
    }

    /// Register (or replace) a filter.
    pub fn register<F>(&mut self, name: impl Into<String>, filter: F) -> &mut Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Apply the filter `name` to `value`.
    pub fn apply(&self, name: &str, value: &Value, args: &[Value]) -> RuntimeResult<Value> {
        let filter = self
            .get(name)
            .ok_or_else(|| RuntimeError::FilterNotFound {
                name: name.to_string(),
            })?;
        filter(value, args).map_err(|message| RuntimeError::Filter {
            name: name.to_string(),
            message,
        })
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn require_receiver(value: &Value) -> Result<(), String> {
    if value.is_nullish() {
        Err(format!("cannot filter {}", value.to_display()))
    } else {
        Ok(())
    }
}

fn key_of(value: &Value) -> String {
    value.to_display()
}

/// Elements of an array, or `None` for non-arrays.
fn elements(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.borrow().clone()),
        _ => None,
    }
}

fn first(value: &Value, _args: &[Value]) -> Result<Value, String> {
    require_receiver(value)?;
    Ok(value.get_property("0"))
}

fn last(value: &Value, _args: &[Value]) -> Result<Value, String> {
    require_receiver(value)?;
    let len = value.get_property("length").to_number();
    if len >= 1.0 {
        Ok(value.get_property(&format!("{}", len as usize - 1)))
    } else {
        Ok(Value::Undefined)
    }
}

fn capitalize(value: &Value, _args: &[Value]) -> Result<Value, String> {
    let text = value.to_display();
    let mut chars = text.chars();
    Ok(Value::String(match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }))
}

fn downcase(value: &Value, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(value.to_display().to_lowercase()))
}

fn upcase(value: &Value, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(value.to_display().to_uppercase()))
}

/// Default `Array.prototype.sort` ordering: compare stringified elements.
fn compare_default(a: &Value, b: &Value) -> Ordering {
    a.to_display().cmp(&b.to_display())
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        _ => a.to_display().cmp(&b.to_display()),
    }
}

fn sort(value: &Value, _args: &[Value]) -> Result<Value, String> {
    let mut items = elements(value).ok_or("sort expects an array")?;
    items.sort_by(compare_default);
    Ok(Value::array(items))
}

fn sort_by(value: &Value, args: &[Value]) -> Result<Value, String> {
    let mut items = elements(value).ok_or("sort_by expects an array")?;
    let prop = key_of(&arg(args, 0));
    items.sort_by(|a, b| compare_values(&a.get_property(&prop), &b.get_property(&prop)));
    Ok(Value::array(items))
}

fn size(value: &Value, _args: &[Value]) -> Result<Value, String> {
    require_receiver(value)?;
    Ok(value.get_property("length"))
}

fn plus(value: &Value, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(value.to_number() + arg(args, 0).to_number()))
}

fn minus(value: &Value, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(value.to_number() - arg(args, 0).to_number()))
}

fn times(value: &Value, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(value.to_number() * arg(args, 0).to_number()))
}

fn divided_by(value: &Value, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(value.to_number() / arg(args, 0).to_number()))
}

fn join(value: &Value, args: &[Value]) -> Result<Value, String> {
    let Value::Array(items) = value else {
        return Err("join expects an array".to_string());
    };
    let separator = match arg(args, 0) {
        sep if sep.is_truthy() => sep.to_display(),
        _ => ", ".to_string(),
    };
    Ok(Value::String(join_array(items, &separator)))
}

fn truncate(value: &Value, args: &[Value]) -> Result<Value, String> {
    let text = value.to_display();
    let len = arg(args, 0).to_number();
    let len = if len.is_nan() || len < 0.0 { 0 } else { len as usize };
    if text.chars().count() <= len {
        return Ok(Value::String(text));
    }
    let mut truncated: String = text.chars().take(len).collect();
    let suffix = arg(args, 1);
    if suffix.is_truthy() {
        truncated.push_str(&suffix.to_display());
    }
    Ok(Value::String(truncated))
}

fn truncate_words(value: &Value, args: &[Value]) -> Result<Value, String> {
    let text = value.to_display();
    let n = arg(args, 0).to_number();
    let n = if n.is_nan() || n < 0.0 { 0 } else { n as usize };
    let words: Vec<&str> = text.split(' ').filter(|w| !w.is_empty()).take(n).collect();
    Ok(Value::String(words.join(" ")))
}

fn replace(value: &Value, args: &[Value]) -> Result<Value, String> {
    let text = value.to_display();
    let pattern = arg(args, 0).to_display();
    let substitution = match arg(args, 1) {
        s if s.is_nullish() => String::new(),
        s => s.to_display(),
    };
    Ok(Value::String(text.replacen(&pattern, &substitution, 1)))
}

fn prepend(value: &Value, args: &[Value]) -> Result<Value, String> {
    let prefix = arg(args, 0);
    match elements(value) {
        Some(mut items) => {
            items.insert(0, prefix);
            Ok(Value::array(items))
        }
        None => Ok(Value::String(prefix.to_display() + &value.to_display())),
    }
}

fn append(value: &Value, args: &[Value]) -> Result<Value, String> {
    let suffix = arg(args, 0);
    match elements(value) {
        Some(mut items) => {
            match elements(&suffix) {
                Some(more) => items.extend(more),
                None => items.push(suffix),
            }
            Ok(Value::array(items))
        }
        None => Ok(Value::String(value.to_display() + &suffix.to_display())),
    }
}

fn map(value: &Value, args: &[Value]) -> Result<Value, String> {
    let items = elements(value).ok_or("map expects an array")?;
    let prop = key_of(&arg(args, 0));
    items
        .iter()
        .map(|item| {
            require_receiver(item)?;
            Ok(item.get_property(&prop))
        })
        .collect::<Result<Vec<_>, String>>()
        .map(Value::array)
}

fn reverse(value: &Value, _args: &[Value]) -> Result<Value, String> {
    match elements(value) {
        Some(mut items) => {
            items.reverse();
            Ok(Value::array(items))
        }
        None => Ok(Value::String(value.to_display().chars().rev().collect())),
    }
}

fn get(value: &Value, args: &[Value]) -> Result<Value, String> {
    require_receiver(value)?;
    Ok(value.get_property(&key_of(&arg(args, 0))))
}

fn json(value: &Value, _args: &[Value]) -> Result<Value, String> {
    match value.to_json().map_err(|e| e.to_string())? {
        Some(json) => serde_json::to_string(&json)
            .map(Value::String)
            .map_err(|e| e.to_string()),
        None => Ok(Value::Undefined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(name: &str, value: serde_json::Value, args: &[Value]) -> Value {
        FilterRegistry::with_builtins()
            .apply(name, &Value::from(value), args)
            .unwrap()
    }

    #[test]
    fn test_pipeline_order() {
        let registry = FilterRegistry::with_builtins();
        let items = Value::from(json!(["foo", "bar", "baz"]));
        let value = ["reverse", "first", "reverse", "capitalize"]
            .iter()
            .try_fold(items, |acc, name| registry.apply(name, &acc, &[]))
            .unwrap();
        assert_eq!(value, Value::string("Zab"));
    }

    #[test]
    fn test_reverse_does_not_mutate_input() {
        let registry = FilterRegistry::with_builtins();
        let items = Value::from(json!([1, 2, 3]));
        let reversed = registry.apply("reverse", &items, &[]).unwrap();
        assert_eq!(reversed, Value::from(json!([3, 2, 1])));
        assert_eq!(items, Value::from(json!([1, 2, 3])));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(
            apply("truncate", json!("World"), &[Value::Number(3.0)]),
            Value::string("Wor")
        );
        assert_eq!(
            apply(
                "truncate",
                json!("Testing"),
                &[Value::Number(2.0), Value::string("...")]
            ),
            Value::string("Te...")
        );
        assert_eq!(
            apply(
                "truncate",
                json!("Testing"),
                &[Value::Number(10.0), Value::string("...")]
            ),
            Value::string("Testing")
        );
    }

    #[test]
    fn test_map_and_join() {
        let users = json!([{"name": "tobi"}, {"name": "loki"}, {"name": "jane"}]);
        let names = apply("map", users, &[Value::string("name")]);
        let registry = FilterRegistry::with_builtins();
        assert_eq!(
            registry.apply("join", &names, &[]).unwrap(),
            Value::string("tobi, loki, jane")
        );
        assert_eq!(
            registry.apply("join", &names, &[Value::string("::")]).unwrap(),
            Value::string("tobi::loki::jane")
        );
    }

    #[test]
    fn test_last_and_size() {
        assert_eq!(apply("last", json!(["a", "b"]), &[]), Value::string("b"));
        assert_eq!(apply("last", json!([]), &[]), Value::Undefined);
        assert_eq!(apply("size", json!("hello"), &[]), Value::Number(5.0));
        assert_eq!(apply("length", json!([1, 2]), &[]), Value::Number(2.0));
    }

    #[test]
    fn test_case_filters() {
        assert_eq!(apply("capitalize", json!("tobi"), &[]), Value::string("Tobi"));
        assert_eq!(apply("capitalize", json!(""), &[]), Value::string(""));
        assert_eq!(apply("upcase", json!("tobi"), &[]), Value::string("TOBI"));
        assert_eq!(apply("downcase", json!("TOBI"), &[]), Value::string("tobi"));
    }

    #[test]
    fn test_sorting() {
        assert_eq!(
            apply("sort", json!(["b", "c", "a"]), &[]),
            Value::from(json!(["a", "b", "c"]))
        );
        assert_eq!(
            apply(
                "sort_by",
                json!([{"n": 3}, {"n": 1}, {"n": 2}]),
                &[Value::string("n")]
            ),
            Value::from(json!([{"n": 1}, {"n": 2}, {"n": 3}]))
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(apply("plus", json!("2"), &[Value::Number(3.0)]), Value::Number(5.0));
        assert_eq!(apply("minus", json!(5), &[Value::Number(3.0)]), Value::Number(2.0));
        assert_eq!(apply("times", json!(5), &[Value::Number(3.0)]), Value::Number(15.0));
        assert_eq!(
            apply("divided_by", json!(9), &[Value::Number(3.0)]),
            Value::Number(3.0)
        );
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(
            apply("truncate_words", json!("the quick  brown fox"), &[Value::Number(2.0)]),
            Value::string("the quick")
        );
        assert_eq!(
            apply("replace", json!("a-b-c"), &[Value::string("-"), Value::string("+")]),
            Value::string("a+b-c")
        );
        assert_eq!(
            apply("prepend", json!("world"), &[Value::string("hello ")]),
            Value::string("hello world")
        );
        assert_eq!(
            apply("append", json!([1]), &[Value::Number(2.0)]),
            Value::from(json!([1, 2]))
        );
        assert_eq!(
            apply("get", json!({"a": "b"}), &[Value::string("a")]),
            Value::string("b")
        );
        assert_eq!(
            apply("json", json!({"a": [1, "x"]}), &[]),
            Value::string(r#"{"a":[1,"x"]}"#)
        );
    }

    #[test]
    fn test_unknown_filter() {
        let registry = FilterRegistry::with_builtins();
        let err = registry.apply("nope", &Value::Null, &[]).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::FilterNotFound {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_custom_filter_errors_are_wrapped() {
        let mut registry = FilterRegistry::empty();
        registry.register("fail", |_, _| Err("nope".to_string()));
        let err = registry.apply("fail", &Value::Null, &[]).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Filter {
                name: "fail".to_string(),
                message: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_json_rejects_cyclic_values() {
        let value = Value::array(vec![]);
        if let Value::Array(items) = &value {
            items.borrow_mut().push(value.clone());
        }
        let err = FilterRegistry::with_builtins()
            .apply("json", &value, &[])
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Filter {
                name: "json".to_string(),
                message: "TypeError: Converting circular structure to JSON".to_string()
            }
        );
        if let Value::Array(items) = &value {
            items.borrow_mut().clear();
        }
    }
}
