// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for stream decoding

use classify::Opcode;
use thiserror::Error;

/// Errors that can occur while disassembling a stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated {opcode} at {offset:#x}: argument extends past end of input")]
    Truncated { offset: usize, opcode: Opcode },

    #[error("unknown opcode {byte:#04x} at {offset:#x}")]
    UnknownOpcode { offset: usize, byte: u8 },

    #[error("invalid {opcode} argument at {offset:#x}: {reason}")]
    InvalidArgument {
        offset: usize,
        opcode: Opcode,
        reason: String,
    },

    #[error("stream ends at {offset:#x} without STOP")]
    MissingStop { offset: usize },

    #[error("negative length {length} for {opcode} at {offset:#x}")]
    NegativeLength {
        offset: usize,
        opcode: Opcode,
        length: i64,
    },
}

impl DecodeError {
    /// Byte offset of the opcode (or end of input) the error refers to.
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::Truncated { offset, .. }
            | DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::InvalidArgument { offset, .. }
            | DecodeError::MissingStop { offset }
            | DecodeError::NegativeLength { offset, .. } => *offset,
        }
    }

    /// The opcode being decoded, when the failure happened inside one.
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            DecodeError::Truncated { opcode, .. }
            | DecodeError::InvalidArgument { opcode, .. }
            | DecodeError::NegativeLength { opcode, .. } => Some(*opcode),
            DecodeError::UnknownOpcode { .. } | DecodeError::MissingStop { .. } => None,
        }
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;
