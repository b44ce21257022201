use crate::context::Context;
use crate::error::BridgeError;
use crate::error::ScriptError;
use serde::ser::SerializeMap;
use serde::ser::SerializeSeq;
use serde::Serialize;
use serde::Serializer;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A script value as seen by the bridge.
///
/// Values are cheap to clone: compound payloads are reference counted and never mutated after
/// construction. Values are bound to their engine thread and are therefore `!Send`.
#[derive(Clone, Debug, Default)]
pub enum Value {
  #[default]
  Undefined,
  Null,
  Bool(bool),
  Number(f64),
  String(Rc<str>),
  Array(Rc<[Value]>),
  Object(Rc<BTreeMap<String, Value>>),
  Function(JsFunction),
  Error(ScriptError),
}

impl Value {
  pub fn string(s: impl AsRef<str>) -> Self {
    Value::String(Rc::from(s.as_ref()))
  }

  pub fn is_undefined(&self) -> bool {
    matches!(self, Value::Undefined)
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_function(&self) -> Option<&JsFunction> {
    match self {
      Value::Function(f) => Some(f),
      _ => None,
    }
  }

  /// Host-side string conversion, loosely following `ToString`.
  pub fn to_display_string(&self) -> String {
    match self {
      Value::Undefined => "undefined".to_string(),
      Value::Null => "null".to_string(),
      Value::Bool(b) => b.to_string(),
      Value::Number(n) => format_number(*n),
      Value::String(s) => s.to_string(),
      Value::Array(items) => items
        .iter()
        .map(|v| match v {
          Value::Undefined | Value::Null => String::new(),
          other => other.to_display_string(),
        })
        .collect::<Vec<_>>()
        .join(","),
      Value::Object(_) => "[object Object]".to_string(),
      Value::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
      Value::Error(err) => err.to_string(),
    }
  }

  /// Converts parsed JSON into a script value.
  pub fn from_json(json: serde_json::Value) -> Self {
    match json {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
      serde_json::Value::String(s) => Value::String(Rc::from(s)),
      serde_json::Value::Array(items) => {
        Value::Array(items.into_iter().map(Value::from_json).collect())
      }
      serde_json::Value::Object(map) => Value::Object(Rc::new(
        map
          .into_iter()
          .map(|(k, v)| (k, Value::from_json(v)))
          .collect(),
      )),
    }
  }

  /// Serializes this value to JSON text, following `JSON.stringify` for the value shapes the bridge
  /// knows about (non-finite numbers, `undefined` and functions become `null`).
  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Number(a), Value::Number(b)) => a == b,
      (Value::String(a), Value::String(b)) => a == b,
      (Value::Array(a), Value::Array(b)) => a == b,
      (Value::Object(a), Value::Object(b)) => a == b,
      (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
      (Value::Error(a), Value::Error(b)) => a == b,
      _ => false,
    }
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::Number(n)
  }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self {
    Value::Number(n as f64)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::string(s)
  }
}

impl From<JsFunction> for Value {
  fn from(f: JsFunction) -> Self {
    Value::Function(f)
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Value::Undefined | Value::Null | Value::Function(_) => serializer.serialize_unit(),
      Value::Bool(b) => serializer.serialize_bool(*b),
      Value::Number(n) if !n.is_finite() => serializer.serialize_unit(),
      Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
        serializer.serialize_i64(*n as i64)
      }
      Value::Number(n) => serializer.serialize_f64(*n),
      Value::String(s) => serializer.serialize_str(s),
      Value::Array(items) => {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items.iter() {
          seq.serialize_element(item)?;
        }
        seq.end()
      }
      Value::Object(map) => {
        let mut out = serializer.serialize_map(None)?;
        for (k, v) in map.iter() {
          if matches!(v, Value::Undefined | Value::Function(_)) {
            continue;
          }
          out.serialize_entry(k, v)?;
        }
        out.end()
      }
      // Error objects have no enumerable own properties.
      Value::Error(_) => serializer.serialize_map(Some(0))?.end(),
    }
  }
}

fn format_number(n: f64) -> String {
  if n.is_nan() {
    "NaN".to_string()
  } else if n.is_infinite() {
    let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
    s.to_string()
  } else if n == 0.0 {
    "0".to_string()
  } else if n.fract() == 0.0 && n.abs() < 1e21 {
    format!("{n:.0}")
  } else {
    n.to_string()
  }
}

/// The body of a script function.
///
/// Receives the calling context, the `this` value and the arguments.
pub type ScriptFn = dyn Fn(&Context, Value, &[Value]) -> Result<Value, BridgeError>;

/// A callable script function.
///
/// The bridge treats script functions as opaque callables; cloning shares the same function
/// object, and equality is identity.
#[derive(Clone)]
pub struct JsFunction {
  name: Rc<str>,
  call: Rc<ScriptFn>,
}

impl JsFunction {
  pub fn new(
    name: impl AsRef<str>,
    call: impl Fn(&Context, Value, &[Value]) -> Result<Value, BridgeError> + 'static,
  ) -> Self {
    Self {
      name: Rc::from(name.as_ref()),
      call: Rc::new(call),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Calls the function. The caller must be on the context's engine thread.
  pub fn call(&self, ctx: &Context, this: Value, args: &[Value]) -> Result<Value, BridgeError> {
    (self.call)(ctx, this, args)
  }

  /// Whether `self` and `other` are the same function object.
  pub fn ptr_eq(&self, other: &JsFunction) -> bool {
    Rc::ptr_eq(&self.call, &other.call)
  }
}

impl fmt::Debug for JsFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JsFunction").field("name", &self.name).finish()
  }
}
