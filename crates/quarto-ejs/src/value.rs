/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Runtime values of the template script language.
//!
//! Values follow JavaScript semantics closely enough for template code:
//! arrays and objects are shared by reference and mutable, objects keep
//! insertion order, and stringification matches `String(value)`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::RuntimeError;
use crate::script::interp::Closure;

/// A shared, mutable array.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// A shared, mutable, insertion-ordered object.
pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;

/// A value produced or consumed by a template program.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Native(Native),
}

/// Functions and namespaces provided by the runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    Json,
    Math,
    Object,
    Array,
    JsonStringify,
    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    MathMax,
    MathMin,
    ObjectKeys,
    ArrayIsArray,
    String,
    Number,
    ParseInt,
    ParseFloat,
}

impl Native {
    /// Look up a global binding by name.
    pub fn global(name: &str) -> Option<Native> {
        Some(match name {
            "JSON" => Native::Json,
            "Math" => Native::Math,
            "Object" => Native::Object,
            "Array" => Native::Array,
            "String" => Native::String,
            "Number" => Native::Number,
            "parseInt" => Native::ParseInt,
            "parseFloat" => Native::ParseFloat,
            _ => return None,
        })
    }

    /// Member of a namespace object (`JSON.stringify`, `Math.max`, ...).
    pub fn member(self, name: &str) -> Option<Native> {
        Some(match (self, name) {
            (Native::Json, "stringify") => Native::JsonStringify,
            (Native::Math, "floor") => Native::MathFloor,
            (Native::Math, "ceil") => Native::MathCeil,
            (Native::Math, "round") => Native::MathRound,
            (Native::Math, "abs") => Native::MathAbs,
            (Native::Math, "max") => Native::MathMax,
            (Native::Math, "min") => Native::MathMin,
            (Native::Object, "keys") => Native::ObjectKeys,
            (Native::Array, "isArray") => Native::ArrayIsArray,
            _ => return None,
        })
    }

    fn is_namespace(self) -> bool {
        matches!(
            self,
            Native::Json | Native::Math | Native::Object | Native::Array
        )
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// JavaScript truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Native(_) => true,
        }
    }

    /// The result of `typeof value`.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::Native(n) if n.is_namespace() => "object",
            Value::Native(_) => "function",
        }
    }

    /// `ToNumber` conversion.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else {
                    s.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => {
                let items = items.borrow();
                match items.as_slice() {
                    [] => 0.0,
                    [only] => Value::String(only.to_display()).to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// `String(value)`.
    ///
    /// An array that contains itself renders as `""` at the point of
    /// re-entry, like `Array.prototype.join`.
    pub fn to_display(&self) -> String {
        self.display_in(&mut Visited::default())
    }

    fn display_in(&self, visited: &mut Visited) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => join_in(items, ",", visited),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(_) => "function () { [template code] }".to_string(),
            Value::Native(n) if n.is_namespace() => "[object Object]".to_string(),
            Value::Native(_) => "function () { [native code] }".to_string(),
        }
    }

    /// Text appended to the output buffer by a raw (unescaped) tag.
    ///
    /// `undefined` and `null` contribute nothing, like `Array.prototype.join`.
    pub fn to_output(&self) -> String {
        if self.is_nullish() {
            String::new()
        } else {
            self.to_display()
        }
    }

    /// Read a property, returning `undefined` when absent.
    ///
    /// Callers must reject `undefined`/`null` receivers first.
    pub fn get_property(&self, key: &str) -> Value {
        match self {
            Value::Array(items) => {
                let items = items.borrow();
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                index_of_key(key)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default()
            }
            Value::String(s) => {
                if key == "length" {
                    return Value::Number(s.chars().count() as f64);
                }
                index_of_key(key)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default()
            }
            Value::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
            Value::Native(n) => n.member(key).map(Value::Native).unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Loose equality (`==`).
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_eq(other),
        }
    }

    /// Strict equality (`===`); arrays, objects and functions compare by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            _ => false,
        }
    }

    /// Deep copy into a JSON value; `None` for values JSON cannot represent.
    ///
    /// Fails with a `TypeError` when an array or object contains itself.
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, RuntimeError> {
        self.json_in(&mut Visited::default())
    }

    fn json_in(&self, visited: &mut Visited) -> Result<Option<serde_json::Value>, RuntimeError> {
        Ok(Some(match self {
            Value::Undefined | Value::Function(_) | Value::Native(_) => return Ok(None),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(|num| {
                    if n.fract() == 0.0 && n.abs() < 9.0e15 {
                        serde_json::Value::from(*n as i64)
                    } else {
                        serde_json::Value::Number(num)
                    }
                })
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                let ptr = visited.enter(Rc::as_ptr(items).cast()).ok_or_else(circular_json)?;
                let mut out = Vec::new();
                for item in items.borrow().iter() {
                    out.push(item.json_in(visited)?.unwrap_or(serde_json::Value::Null));
                }
                visited.leave(ptr);
                serde_json::Value::Array(out)
            }
            Value::Object(map) => {
                let ptr = visited.enter(Rc::as_ptr(map).cast()).ok_or_else(circular_json)?;
                let mut out = serde_json::Map::new();
                for (key, value) in map.borrow().iter() {
                    if let Some(value) = value.json_in(visited)? {
                        out.insert(key.clone(), value);
                    }
                }
                visited.leave(ptr);
                serde_json::Value::Object(out)
            }
        }))
    }

    /// Structural equality; a pair of containers already under comparison
    /// counts as equal, so cyclic values terminate.
    fn eq_in(&self, other: &Value, pairs: &mut Vec<(*const (), *const ())>) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair: (*const (), *const ()) = (Rc::as_ptr(a).cast(), Rc::as_ptr(b).cast());
                if pairs.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                pairs.push(pair);
                let equal = a.iter().zip(b.iter()).all(|(x, y)| x.eq_in(y, pairs));
                pairs.pop();
                equal
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair: (*const (), *const ()) = (Rc::as_ptr(a).cast(), Rc::as_ptr(b).cast());
                if pairs.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                pairs.push(pair);
                let equal = a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| x.eq_in(y, pairs)));
                pairs.pop();
                equal
            }
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self.strict_eq(other),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::array(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from(&json)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Function(_) => write!(f, "[Function]"),
            Value::Native(n) => write!(f, "[Native {n:?}]"),
            other => match other.to_json() {
                Ok(Some(json)) => write!(f, "{json}"),
                Ok(None) => write!(f, "{}", other.to_display()),
                Err(_) => write!(f, "[Circular]"),
            },
        }
    }
}

impl PartialEq for Value {
    /// Structural equality, used by tests and filters; distinct from `===`.
    fn eq(&self, other: &Self) -> bool {
        self.eq_in(other, &mut Vec::new())
    }
}

/// Format a number the way JavaScript's `Number.prototype.toString` does
/// for the common cases.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// `Array.prototype.join`: nullish elements render as empty strings, and
/// the array renders as `""` wherever it appears inside itself.
pub fn join_array(items: &ArrayRef, separator: &str) -> String {
    join_in(items, separator, &mut Visited::default())
}

fn join_in(items: &ArrayRef, separator: &str, visited: &mut Visited) -> String {
    let Some(ptr) = visited.enter(Rc::as_ptr(items).cast()) else {
        return String::new();
    };
    let text = join_items(&items.borrow(), separator, visited);
    visited.leave(ptr);
    text
}

fn join_items(items: &[Value], separator: &str, visited: &mut Visited) -> String {
    items
        .iter()
        .map(|item| {
            if item.is_nullish() {
                String::new()
            } else {
                item.display_in(visited)
            }
        })
        .collect::<Vec<_>>()
        .join(separator)
}

/// Containers on the current conversion path.
#[derive(Default)]
struct Visited(Vec<*const ()>);

impl Visited {
    /// Mark `ptr` as entered; `None` when it is already on the path.
    fn enter(&mut self, ptr: *const ()) -> Option<*const ()> {
        if self.0.contains(&ptr) {
            return None;
        }
        self.0.push(ptr);
        Some(ptr)
    }

    fn leave(&mut self, ptr: *const ()) {
        if let Some(pos) = self.0.iter().rposition(|p| *p == ptr) {
            self.0.remove(pos);
        }
    }
}

fn circular_json() -> RuntimeError {
    RuntimeError::Type("Converting circular structure to JSON".to_string())
}

fn index_of_key(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("false").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
        assert!(Value::object(IndexMap::new()).is_truthy());
    }

    #[test]
    fn test_display_matches_js_string() {
        assert_eq!(Value::Undefined.to_display(), "undefined");
        assert_eq!(Value::Null.to_display(), "null");
        assert_eq!(Value::Number(3.0).to_display(), "3");
        assert_eq!(Value::Number(-0.5).to_display(), "-0.5");
        assert_eq!(Value::Number(0.1 + 0.2).to_display(), "0.30000000000000004");
        assert_eq!(
            Value::from(json!([1, null, "a", [2, 3]])).to_display(),
            "1,,a,2,3"
        );
        assert_eq!(Value::from(json!({"a": 1})).to_display(), "[object Object]");
    }

    #[test]
    fn test_raw_output_drops_nullish() {
        assert_eq!(Value::Undefined.to_output(), "");
        assert_eq!(Value::Null.to_output(), "");
        assert_eq!(Value::Bool(false).to_output(), "false");
    }

    #[test]
    fn test_property_access() {
        let value = Value::from(json!({"users": [{"name": "tobi"}], "word": "hey"}));
        let users = value.get_property("users");
        assert_eq!(users.get_property("length"), Value::Number(1.0));
        assert_eq!(
            users.get_property("0").get_property("name"),
            Value::string("tobi")
        );
        assert_eq!(users.get_property("01"), Value::Undefined);
        assert_eq!(value.get_property("word").get_property("1"), Value::string("e"));
        assert_eq!(value.get_property("missing"), Value::Undefined);
    }

    #[test]
    fn test_equality() {
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        assert!(Value::Number(1.0).loose_eq(&Value::string("1")));
        assert!(Value::Bool(true).loose_eq(&Value::Number(1.0)));
        assert!(!Value::Number(0.0).loose_eq(&Value::Null));

        let a = Value::array(vec![]);
        assert!(a.strict_eq(&a.clone()));
        assert!(!a.strict_eq(&Value::array(vec![])));
    }

    #[test]
    fn test_json_round_trip_preserves_key_order() {
        let json = json!({"z": 1, "a": [true, null], "m": {"k": "v"}});
        assert_eq!(Value::from(&json).to_json().unwrap(), Some(json));
    }

    #[test]
    fn test_to_number() {
        assert_eq!(Value::string(" 42 ").to_number(), 42.0);
        assert_eq!(Value::string("").to_number(), 0.0);
        assert!(Value::string("abc").to_number().is_nan());
        assert!(Value::Undefined.to_number().is_nan());
        assert_eq!(Value::Null.to_number(), 0.0);
    }

    // ========================================================================
    // Self-referential values
    // ========================================================================

    fn self_containing_array() -> Value {
        let value = Value::array(vec![Value::Number(1.0)]);
        if let Value::Array(items) = &value {
            items.borrow_mut().push(value.clone());
        }
        value
    }

    #[test]
    fn test_cyclic_array_displays_empty_at_reentry() {
        let value = self_containing_array();
        assert_eq!(value.to_display(), "1,");
        if let Value::Array(items) = &value {
            assert_eq!(join_array(items, "-"), "1-");
        }
        // Break the cycle.
        if let Value::Array(items) = &value {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_cyclic_object_to_json_is_type_error() {
        let mut entries = IndexMap::new();
        entries.insert("name".to_string(), Value::string("tobi"));
        let value = Value::object(entries);
        if let Value::Object(map) = &value {
            map.borrow_mut().insert("me".to_string(), value.clone());
        }

        let err = value.to_json().unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Converting circular structure to JSON");
        assert_eq!(format!("{value:?}"), "[Circular]");
        assert_eq!(value, value.clone());

        if let Value::Object(map) = &value {
            map.borrow_mut().clear();
        }
    }

    #[test]
    fn test_shared_but_acyclic_values_convert() {
        let shared = Value::from(json!([1, 2]));
        let value = Value::array(vec![shared.clone(), shared]);
        assert_eq!(value.to_json().unwrap(), Some(json!([[1, 2], [1, 2]])));
        assert_eq!(value.to_display(), "1,2,1,2");
    }

    #[test]
    fn test_distinct_cyclic_arrays_compare_structurally() {
        let a = self_containing_array();
        let b = self_containing_array();
        assert_eq!(a, b);
        for value in [&a, &b] {
            if let Value::Array(items) = value {
                items.borrow_mut().clear();
            }
        }
    }
}
