// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pickle bytecode disassembler
//!
//! Decodes a pickle stream into its opcode sequence without interpreting it.
//! Both the static analyzer and the restricted interpreter consume the same
//! [`Disassembler`], so they always agree on where each opcode starts and
//! what its argument is.
//!
//! # Encodings
//!
//! | Encoding | Opcodes |
//! |----------|---------|
//! | Fixed-width little-endian ints (1, 2, 4, 8 bytes) | `BININT*`, `BINGET`, `PROTO`, `FRAME`, `EXT*`, ... |
//! | Big-endian IEEE-754 double | `BINFLOAT` |
//! | Length-prefixed payloads (1, 4, 8 byte lengths) | `SHORT_BINUNICODE`, `BINBYTES`, `LONG1`, ... |
//! | Newline-terminated text | `INT`, `LONG`, `FLOAT`, `GET`, `PUT`, `PERSID` |
//! | Quoted and escaped text | `STRING` |
//! | Raw-unicode-escape text | `UNICODE` |
//! | Two newline-terminated lines | `GLOBAL`, `INST` |
//!
//! Decoding never panics. Malformed input yields a [`DecodeError`] carrying
//! the offset of the offending opcode.

mod decode;
mod error;
mod record;
mod text;

pub use decode::{Disassembler, HIGHEST_PROTOCOL, disassemble};
pub use error::{DecodeError, DecodeResult};
pub use record::{Argument, LongArg, OpcodeRecord};
