// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Restricted interpreter for pickle streams
//!
//! Replays a stream the way the reference unpickler would, except that every
//! import is checked against the allow-list in [`classify::Tables`] before an
//! injectable [`Resolver`] decides how the name behaves. Nothing is executed:
//! allowed builtins are built natively, every other allowed class becomes an
//! [`Object`] recording what the stream did to it.
//!
//! # Overview
//!
//! ```text
//! bytes ──Disassembler──► records ──Machine──► Heap (ObjId graph)
//!                                     │                │
//!                           find_class│                │materialize
//!                                     ▼                ▼
//!                          Tables ► Resolver         Value
//! ```
//!
//! Stack and memo hold `ObjId`s into a per-load heap, so a container that
//! is memoized before it is filled is shared correctly. The final graph is
//! copied into an owned [`Value`]; graphs that reach themselves, nest too
//! deeply, or expand past the node limit are rejected.
//!
//! # Errors
//!
//! [`RuntimeError::kind`] maps every failure onto [`classify::ErrorKind`]:
//! disallowed names and always-dangerous opcodes are
//! `DisallowedConstruction`, everything else is `MalformedStream`.
//!
//! # Thread Safety
//!
//! An [`Unpickler`] only borrows immutable tables and a `Send + Sync`
//! resolver. All mutable state lives in the per-call machine.

mod builtins;
mod error;
mod heap;
mod machine;
mod pickler;
mod resolver;
mod value;

pub use error::{RuntimeError, RuntimeResult};
pub use heap::{DEFAULT_NODE_LIMIT, MAX_DEPTH};
pub use machine::Unpickler;
pub use pickler::dumps;
#[cfg(test)]
pub use resolver::mock::RecordingResolver;
pub use resolver::{Builtin, DefaultResolver, Resolver, Symbol};
pub use value::{Object, Value};
