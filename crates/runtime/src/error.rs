// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the runtime crate

use classify::{ErrorKind, Opcode, QualifiedName};
use disasm::DecodeError;
use thiserror::Error;

/// Runtime errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("construction of {name} is not allowed (at {offset:#x})")]
    DisallowedConstruction { name: QualifiedName, offset: usize },

    #[error("{opcode} is not allowed (at {offset:#x})")]
    DisallowedOpcode { opcode: Opcode, offset: usize },

    #[error("resolver refused {name} at {offset:#x}: {reason}")]
    Unresolvable {
        name: QualifiedName,
        offset: usize,
        reason: String,
    },

    #[error("stack underflow at {opcode} ({offset:#x})")]
    StackUnderflow { opcode: Opcode, offset: usize },

    #[error("no mark for {opcode} at {offset:#x}")]
    MissingMark { opcode: Opcode, offset: usize },

    #[error("{opcode} at {offset:#x} expected {expected}, found {found}")]
    TypeMismatch {
        opcode: Opcode,
        offset: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{opcode} at {offset:#x}: {found} is not callable")]
    NotCallable {
        opcode: Opcode,
        offset: usize,
        found: &'static str,
    },

    #[error("memo index {index} was never stored (at {offset:#x})")]
    MemoMissing { index: i64, offset: usize },

    #[error("invalid literal at {offset:#x}: {reason}")]
    InvalidLiteral { offset: usize, reason: String },

    #[error("calling {name} at {offset:#x} failed: {reason}")]
    Construction {
        name: QualifiedName,
        offset: usize,
        reason: String,
    },

    #[error("out-of-band buffer at {offset:#x} is not supported")]
    UnsupportedBuffer { offset: usize },

    #[error("object graph refers to itself")]
    RecursiveGraph,

    #[error("object graph expands to more than {limit} nodes")]
    GraphTooLarge { limit: usize },

    #[error("object graph is nested deeper than {limit} levels")]
    GraphTooDeep { limit: usize },

    #[error("value cannot be pickled: {reason}")]
    Unpicklable { reason: String },
}

impl RuntimeError {
    /// Outward category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::DisallowedConstruction { .. }
            | RuntimeError::DisallowedOpcode { .. }
            | RuntimeError::Unresolvable { .. } => ErrorKind::DisallowedConstruction,
            _ => ErrorKind::MalformedStream,
        }
    }

    /// Byte offset the error refers to, when it has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            RuntimeError::Decode(e) => Some(e.offset()),
            RuntimeError::DisallowedConstruction { offset, .. }
            | RuntimeError::DisallowedOpcode { offset, .. }
            | RuntimeError::Unresolvable { offset, .. }
            | RuntimeError::StackUnderflow { offset, .. }
            | RuntimeError::MissingMark { offset, .. }
            | RuntimeError::TypeMismatch { offset, .. }
            | RuntimeError::NotCallable { offset, .. }
            | RuntimeError::MemoMissing { offset, .. }
            | RuntimeError::InvalidLiteral { offset, .. }
            | RuntimeError::Construction { offset, .. }
            | RuntimeError::UnsupportedBuffer { offset } => Some(*offset),
            RuntimeError::RecursiveGraph
            | RuntimeError::GraphTooLarge { .. }
            | RuntimeError::GraphTooDeep { .. }
            | RuntimeError::Unpicklable { .. } => None,
        }
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
