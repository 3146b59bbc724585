// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Materialized values

use classify::QualifiedName;
use num_bigint::BigInt;

/// An owned value produced by a restricted load
///
/// Integers are normalized: anything that fits in an `i64` is [`Value::Int`],
/// only larger magnitudes use [`Value::BigInt`]. Dictionaries keep insertion
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    FrozenSet(Vec<Value>),
    /// An instance of an allowed class without a native representation
    Object(Box<Object>),
    /// An allowed symbol that was imported but never called
    Global(QualifiedName),
    /// Placeholder for a persistent id the resolver did not replace
    Persistent(Box<Value>),
}

/// Everything a stream did to an opaque instance
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub class: QualifiedName,
    pub args: Vec<Value>,
    pub kwargs: Vec<(Value, Value)>,
    /// Argument of `BUILD`, if any
    pub state: Option<Value>,
    /// Items added by `APPEND` / `APPENDS`
    pub list_items: Vec<Value>,
    /// Items added by `SETITEM` / `SETITEMS`
    pub dict_items: Vec<(Value, Value)>,
}

impl Object {
    pub fn new(class: QualifiedName) -> Self {
        Self {
            class,
            args: Vec::new(),
            kwargs: Vec::new(),
            state: None,
            list_items: Vec::new(),
            dict_items: Vec::new(),
        }
    }
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::BigInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::ByteArray(_) => "bytearray",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::Object(_) => "object",
            Value::Global(_) => "global",
            Value::Persistent(_) => "persistent",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Entries of a `Dict`, or the items set on an `Object`.
    pub fn entries(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(items) => Some(items),
            Value::Object(object) => Some(&object.dict_items),
            _ => None,
        }
    }

    /// Look up `key` in a `Dict` or in the items of an `Object`.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Look up a string key, see [`Value::get`].
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
