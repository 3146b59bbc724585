// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decoded opcode records

use std::borrow::Cow;

use classify::{Opcode, QualifiedName};

/// An arbitrary-precision integer argument, left undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LongArg<'a> {
    /// Validated decimal text with an optional sign (`INT`, `LONG`).
    Decimal(&'a str),
    /// Little-endian two's complement bytes (`LONG1`, `LONG4`). Empty is zero.
    TwosComplement(&'a [u8]),
}

/// Decoded inline argument of an opcode
///
/// Payloads borrow from the input buffer wherever the encoding allows it.
/// Only escaped text (`STRING`, `UNICODE`) is decoded into owned storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument<'a> {
    None,
    /// `INT` with the `00` / `01` boolean encoding
    Bool(bool),
    Int(i64),
    Long(LongArg<'a>),
    Float(f64),
    Bytes(Cow<'a, [u8]>),
    Str(Cow<'a, str>),
    /// `GLOBAL` / `INST` two-line name
    Name { module: &'a str, symbol: &'a str },
}

impl<'a> Argument<'a> {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Argument::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the qualified name carried by `GLOBAL` / `INST`.
    pub fn qualified_name(&self) -> Option<QualifiedName> {
        match self {
            Argument::Name { module, symbol } => Some(QualifiedName::new(*module, *symbol)),
            _ => None,
        }
    }
}

/// A single decoded opcode with its location
#[derive(Debug, Clone, PartialEq)]
pub struct OpcodeRecord<'a> {
    pub opcode: Opcode,
    pub arg: Argument<'a>,
    /// Offset of the opcode byte from the start of the stream
    pub offset: usize,
}
