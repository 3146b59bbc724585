// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Symbol resolution
//!
//! The interpreter only asks a [`Resolver`] about names that already passed
//! the allow-list. Resolvers decide how an allowed name behaves when called:
//! natively (builtin containers and scalars) or as an opaque class whose
//! calls are recorded in a [`Value::Object`](crate::Value::Object).

use classify::QualifiedName;

use crate::{RuntimeResult, Value};

/// Types constructed natively by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    Str,
    Int,
    Float,
    Bool,
    Bytes,
    ByteArray,
    /// `collections.OrderedDict`, materialized as an ordered `Dict`
    OrderedDict,
    /// `collections.deque`, materialized as a `List`
    Deque,
}

impl Builtin {
    /// Native constructor for a well-known name, if there is one.
    pub fn for_name(name: &QualifiedName) -> Option<Self> {
        let builtin = match (name.module(), name.symbol()) {
            ("builtins" | "__builtin__", "list") => Builtin::List,
            ("builtins" | "__builtin__", "tuple") => Builtin::Tuple,
            ("builtins" | "__builtin__", "dict") => Builtin::Dict,
            ("builtins" | "__builtin__", "set") => Builtin::Set,
            ("builtins" | "__builtin__", "frozenset") => Builtin::FrozenSet,
            ("builtins" | "__builtin__", "str" | "unicode") => Builtin::Str,
            ("builtins" | "__builtin__", "int" | "long") => Builtin::Int,
            ("builtins" | "__builtin__", "float") => Builtin::Float,
            ("builtins" | "__builtin__", "bool") => Builtin::Bool,
            ("builtins" | "__builtin__", "bytes") => Builtin::Bytes,
            ("builtins" | "__builtin__", "bytearray") => Builtin::ByteArray,
            ("collections", "OrderedDict") => Builtin::OrderedDict,
            ("collections", "deque") => Builtin::Deque,
            _ => return None,
        };
        Some(builtin)
    }
}

/// How an allowed symbol behaves when the stream calls it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// Constructed natively
    Builtin(Builtin),
    /// Calls and state updates are recorded in an opaque object
    Opaque,
}

/// Resolution seam between the interpreter and the host
///
/// `resolve` is only called for names the allow-list accepted. Returning an
/// error aborts the load.
pub trait Resolver: Send + Sync {
    fn resolve(&self, name: &QualifiedName) -> RuntimeResult<Symbol>;

    /// Replace a persistent id (`PERSID`, `BINPERSID`) with a value.
    ///
    /// The default keeps the id as a [`Value::Persistent`] placeholder.
    fn persistent_load(&self, pid: Value) -> RuntimeResult<Value> {
        Ok(Value::Persistent(Box::new(pid)))
    }
}

/// Native builtins, everything else opaque
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve(&self, name: &QualifiedName) -> RuntimeResult<Symbol> {
        Ok(Builtin::for_name(name).map_or(Symbol::Opaque, Symbol::Builtin))
    }
}
