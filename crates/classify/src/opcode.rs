// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pickle opcode classification
//!
//! Every opcode of protocols 0 through 5 is listed exactly once in
//! [`OPCODE_TABLE`], together with its byte value, the encoding of its inline
//! argument and its [`OpcodeClass`]. Bytes that are not in the table are not
//! opcodes; the disassembler rejects them.
//!
//! # Classes
//!
//! | Class | Opcodes | Meaning |
//! |-------|---------|---------|
//! | **DirectImport** | `GLOBAL`, `INST` | Resolves the name carried in its own argument |
//! | **StackImport** | `STACK_GLOBAL` | Resolves a name from two stack operands |
//! | **Invoke** | `REDUCE`, `NEWOBJ`, `NEWOBJ_EX`, `OBJ` | Calls a previously resolved target |
//! | **AlwaysDangerous** | `EXT1`, `EXT2`, `EXT4` | Extension registry lookup, no enumerable target |
//! | **Inert** | everything else | Pushes data or shapes the stack |
//!
//! `PERSID` and `BINPERSID` are inert here: persistent ids are handed to a
//! caller-supplied hook and never go through symbol import.

use std::{collections::HashMap, fmt};

use lazy_static::lazy_static;

/// A pickle opcode.
///
/// Variant names follow the mnemonics used by the reference disassembler.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    MARK,
    STOP,
    POP,
    POP_MARK,
    DUP,
    FLOAT,
    INT,
    BININT,
    BININT1,
    LONG,
    BININT2,
    NONE,
    PERSID,
    BINPERSID,
    REDUCE,
    STRING,
    BINSTRING,
    SHORT_BINSTRING,
    UNICODE,
    BINUNICODE,
    APPEND,
    BUILD,
    GLOBAL,
    DICT,
    EMPTY_DICT,
    APPENDS,
    GET,
    BINGET,
    INST,
    LONG_BINGET,
    LIST,
    EMPTY_LIST,
    OBJ,
    PUT,
    BINPUT,
    LONG_BINPUT,
    SETITEM,
    TUPLE,
    EMPTY_TUPLE,
    SETITEMS,
    BINFLOAT,
    // Protocol 2
    PROTO,
    NEWOBJ,
    EXT1,
    EXT2,
    EXT4,
    TUPLE1,
    TUPLE2,
    TUPLE3,
    NEWTRUE,
    NEWFALSE,
    LONG1,
    LONG4,
    // Protocol 3
    BINBYTES,
    SHORT_BINBYTES,
    // Protocol 4
    SHORT_BINUNICODE,
    BINUNICODE8,
    BINBYTES8,
    EMPTY_SET,
    ADDITEMS,
    FROZENSET,
    NEWOBJ_EX,
    STACK_GLOBAL,
    MEMOIZE,
    FRAME,
    // Protocol 5
    BYTEARRAY8,
    NEXT_BUFFER,
    READONLY_BUFFER,
}

impl Opcode {
    /// Look up the opcode encoded by `byte`, if any.
    pub fn from_byte(byte: u8) -> Option<Self> {
        BY_CODE.get(&byte).map(|c| c.opcode)
    }

    /// Returns the classification entry for this opcode.
    pub fn classify(self) -> &'static ClassifiedOpcode {
        // Every variant has a table entry (checked by `test_table_is_complete`).
        BY_OPCODE
            .get(&self)
            .copied()
            .unwrap_or(&ClassifiedOpcode::UNKNOWN)
    }

    /// The byte value of this opcode in a stream.
    pub fn code(self) -> u8 {
        self.classify().code
    }

    /// The reference mnemonic, e.g. `SHORT_BINUNICODE`.
    pub fn mnemonic(self) -> &'static str {
        self.classify().mnemonic
    }

    /// Encoding of the inline argument that follows the opcode byte.
    pub fn arg_kind(self) -> ArgKind {
        self.classify().arg
    }

    pub fn class(self) -> OpcodeClass {
        self.classify().class
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Encoding of an opcode's inline argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// No inline argument.
    None,
    /// Unsigned 1-byte integer.
    U1,
    /// Unsigned 2-byte little-endian integer.
    U2,
    /// Signed 4-byte little-endian integer.
    I4,
    /// Unsigned 4-byte little-endian integer.
    U4,
    /// Unsigned 8-byte little-endian integer.
    U8,
    /// IEEE-754 double, big-endian.
    Float8,
    /// Newline-terminated decimal integer (`INT`, `GET`, `PUT`).
    DecimalNlShort,
    /// Newline-terminated decimal integer with optional `L` suffix (`LONG`).
    DecimalNlLong,
    /// Newline-terminated float repr (`FLOAT`).
    FloatNl,
    /// Newline-terminated quoted and escaped string (`STRING`).
    StringNl,
    /// Newline-terminated string without escapes (`PERSID`).
    StringNlNoEscape,
    /// Two newline-terminated strings: module then symbol (`GLOBAL`, `INST`).
    NamePair,
    /// Newline-terminated raw-unicode-escape text (`UNICODE`).
    UnicodeNl,
    /// 1-byte length prefixed byte string.
    String1,
    /// Signed 4-byte length prefixed byte string.
    String4,
    /// 1-byte length prefixed bytes.
    Bytes1,
    /// 4-byte length prefixed bytes.
    Bytes4,
    /// 8-byte length prefixed bytes.
    Bytes8,
    /// 1-byte length prefixed UTF-8.
    Unicode1,
    /// 4-byte length prefixed UTF-8.
    Unicode4,
    /// 8-byte length prefixed UTF-8.
    Unicode8,
    /// 1-byte length prefixed two's complement integer.
    Long1,
    /// Signed 4-byte length prefixed two's complement integer.
    Long4,
}

/// Security class of an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeClass {
    /// Pushes data or reshapes the stack; never resolves or calls anything.
    Inert,
    /// Resolves the qualified name carried in its own argument.
    DirectImport,
    /// Resolves a qualified name popped from the stack.
    StackImport,
    /// Calls a target resolved earlier.
    Invoke,
    /// Rejected regardless of any target.
    AlwaysDangerous,
}

impl OpcodeClass {
    /// Construction opcodes may end up calling arbitrary code and are safe
    /// only when every target they touch is allowed.
    pub fn is_construction(self) -> bool {
        matches!(
            self,
            OpcodeClass::DirectImport | OpcodeClass::StackImport | OpcodeClass::Invoke
        )
    }
}

/// Classification entry for a single opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedOpcode {
    pub opcode: Opcode,
    /// Byte value in the stream
    pub code: u8,
    /// Reference mnemonic
    pub mnemonic: &'static str,
    /// Inline argument encoding
    pub arg: ArgKind,
    /// Security class
    pub class: OpcodeClass,
    /// First protocol version that defines this opcode
    pub proto: u8,
}

impl ClassifiedOpcode {
    const fn inert(
        opcode: Opcode,
        code: u8,
        mnemonic: &'static str,
        arg: ArgKind,
        proto: u8,
    ) -> Self {
        Self {
            opcode,
            code,
            mnemonic,
            arg,
            class: OpcodeClass::Inert,
            proto,
        }
    }

    const fn with_class(
        opcode: Opcode,
        code: u8,
        mnemonic: &'static str,
        arg: ArgKind,
        class: OpcodeClass,
        proto: u8,
    ) -> Self {
        Self {
            opcode,
            code,
            mnemonic,
            arg,
            class,
            proto,
        }
    }

    /// Placeholder for a missing table entry. Classified as always dangerous
    /// so a table gap can only ever reject.
    pub const UNKNOWN: Self = Self {
        opcode: Opcode::STOP,
        code: 0,
        mnemonic: "UNKNOWN",
        arg: ArgKind::None,
        class: OpcodeClass::AlwaysDangerous,
        proto: 0,
    };
}

use ArgKind as A;
use ClassifiedOpcode as C;
use Opcode as O;
use OpcodeClass as K;

/// Single source of truth: all classified opcodes
pub const OPCODE_TABLE: &[ClassifiedOpcode] = &[
    // Protocol 0/1: stack shaping
    C::inert(O::MARK, b'(', "MARK", A::None, 0),
    C::inert(O::STOP, b'.', "STOP", A::None, 0),
    C::inert(O::POP, b'0', "POP", A::None, 0),
    C::inert(O::POP_MARK, b'1', "POP_MARK", A::None, 1),
    C::inert(O::DUP, b'2', "DUP", A::None, 0),
    // Protocol 0/1: literals
    C::inert(O::FLOAT, b'F', "FLOAT", A::FloatNl, 0),
    C::inert(O::INT, b'I', "INT", A::DecimalNlShort, 0),
    C::inert(O::BININT, b'J', "BININT", A::I4, 1),
    C::inert(O::BININT1, b'K', "BININT1", A::U1, 1),
    C::inert(O::LONG, b'L', "LONG", A::DecimalNlLong, 0),
    C::inert(O::BININT2, b'M', "BININT2", A::U2, 1),
    C::inert(O::NONE, b'N', "NONE", A::None, 0),
    C::inert(O::PERSID, b'P', "PERSID", A::StringNlNoEscape, 0),
    C::inert(O::BINPERSID, b'Q', "BINPERSID", A::None, 1),
    C::inert(O::STRING, b'S', "STRING", A::StringNl, 0),
    C::inert(O::BINSTRING, b'T', "BINSTRING", A::String4, 1),
    C::inert(O::SHORT_BINSTRING, b'U', "SHORT_BINSTRING", A::String1, 1),
    C::inert(O::UNICODE, b'V', "UNICODE", A::UnicodeNl, 0),
    C::inert(O::BINUNICODE, b'X', "BINUNICODE", A::Unicode4, 1),
    C::inert(O::BINFLOAT, b'G', "BINFLOAT", A::Float8, 1),
    // Protocol 0/1: containers
    C::inert(O::APPEND, b'a', "APPEND", A::None, 0),
    C::inert(O::BUILD, b'b', "BUILD", A::None, 0),
    C::inert(O::DICT, b'd', "DICT", A::None, 0),
    C::inert(O::EMPTY_DICT, b'}', "EMPTY_DICT", A::None, 1),
    C::inert(O::APPENDS, b'e', "APPENDS", A::None, 1),
    C::inert(O::LIST, b'l', "LIST", A::None, 0),
    C::inert(O::EMPTY_LIST, b']', "EMPTY_LIST", A::None, 1),
    C::inert(O::SETITEM, b's', "SETITEM", A::None, 0),
    C::inert(O::TUPLE, b't', "TUPLE", A::None, 0),
    C::inert(O::EMPTY_TUPLE, b')', "EMPTY_TUPLE", A::None, 1),
    C::inert(O::SETITEMS, b'u', "SETITEMS", A::None, 1),
    // Protocol 0/1: memo
    C::inert(O::GET, b'g', "GET", A::DecimalNlShort, 0),
    C::inert(O::BINGET, b'h', "BINGET", A::U1, 1),
    C::inert(O::LONG_BINGET, b'j', "LONG_BINGET", A::U4, 1),
    C::inert(O::PUT, b'p', "PUT", A::DecimalNlShort, 0),
    C::inert(O::BINPUT, b'q', "BINPUT", A::U1, 1),
    C::inert(O::LONG_BINPUT, b'r', "LONG_BINPUT", A::U4, 1),
    // Construction
    C::with_class(O::GLOBAL, b'c', "GLOBAL", A::NamePair, K::DirectImport, 0),
    C::with_class(O::INST, b'i', "INST", A::NamePair, K::DirectImport, 0),
    C::with_class(O::REDUCE, b'R', "REDUCE", A::None, K::Invoke, 0),
    C::with_class(O::OBJ, b'o', "OBJ", A::None, K::Invoke, 1),
    C::with_class(O::NEWOBJ, 0x81, "NEWOBJ", A::None, K::Invoke, 2),
    C::with_class(O::NEWOBJ_EX, 0x92, "NEWOBJ_EX", A::None, K::Invoke, 4),
    C::with_class(O::STACK_GLOBAL, 0x93, "STACK_GLOBAL", A::None, K::StackImport, 4),
    // Extension registry
    C::with_class(O::EXT1, 0x82, "EXT1", A::U1, K::AlwaysDangerous, 2),
    C::with_class(O::EXT2, 0x83, "EXT2", A::U2, K::AlwaysDangerous, 2),
    C::with_class(O::EXT4, 0x84, "EXT4", A::I4, K::AlwaysDangerous, 2),
    // Protocol 2
    C::inert(O::PROTO, 0x80, "PROTO", A::U1, 2),
    C::inert(O::TUPLE1, 0x85, "TUPLE1", A::None, 2),
    C::inert(O::TUPLE2, 0x86, "TUPLE2", A::None, 2),
    C::inert(O::TUPLE3, 0x87, "TUPLE3", A::None, 2),
    C::inert(O::NEWTRUE, 0x88, "NEWTRUE", A::None, 2),
    C::inert(O::NEWFALSE, 0x89, "NEWFALSE", A::None, 2),
    C::inert(O::LONG1, 0x8a, "LONG1", A::Long1, 2),
    C::inert(O::LONG4, 0x8b, "LONG4", A::Long4, 2),
    // Protocol 3
    C::inert(O::BINBYTES, b'B', "BINBYTES", A::Bytes4, 3),
    C::inert(O::SHORT_BINBYTES, b'C', "SHORT_BINBYTES", A::Bytes1, 3),
    // Protocol 4
    C::inert(O::SHORT_BINUNICODE, 0x8c, "SHORT_BINUNICODE", A::Unicode1, 4),
    C::inert(O::BINUNICODE8, 0x8d, "BINUNICODE8", A::Unicode8, 4),
    C::inert(O::BINBYTES8, 0x8e, "BINBYTES8", A::Bytes8, 4),
    C::inert(O::EMPTY_SET, 0x8f, "EMPTY_SET", A::None, 4),
    C::inert(O::ADDITEMS, 0x90, "ADDITEMS", A::None, 4),
    C::inert(O::FROZENSET, 0x91, "FROZENSET", A::None, 4),
    C::inert(O::MEMOIZE, 0x94, "MEMOIZE", A::None, 4),
    C::inert(O::FRAME, 0x95, "FRAME", A::U8, 4),
    // Protocol 5
    C::inert(O::BYTEARRAY8, 0x96, "BYTEARRAY8", A::Bytes8, 5),
    C::inert(O::NEXT_BUFFER, 0x97, "NEXT_BUFFER", A::None, 5),
    C::inert(O::READONLY_BUFFER, 0x98, "READONLY_BUFFER", A::None, 5),
];

lazy_static! {
    /// Opcode table indexed by byte value
    pub static ref BY_CODE: HashMap<u8, &'static ClassifiedOpcode> =
        OPCODE_TABLE.iter().map(|c| (c.code, c)).collect();

    static ref BY_OPCODE: HashMap<Opcode, &'static ClassifiedOpcode> =
        OPCODE_TABLE.iter().map(|c| (c.opcode, c)).collect();
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{ArgKind, BY_CODE, OPCODE_TABLE, Opcode, OpcodeClass};

    #[test]
    fn test_table_is_complete() {
        assert_eq!(OPCODE_TABLE.len(), 68);
        assert_eq!(BY_CODE.len(), 68, "byte values must be unique");

        let opcodes: HashSet<_> = OPCODE_TABLE.iter().map(|c| c.opcode).collect();
        assert_eq!(opcodes.len(), 68, "each opcode must appear once");
    }

    #[test]
    fn test_from_byte() {
        assert_eq!(Opcode::from_byte(b'c'), Some(Opcode::GLOBAL));
        assert_eq!(Opcode::from_byte(0x93), Some(Opcode::STACK_GLOBAL));
        assert_eq!(Opcode::from_byte(0x80), Some(Opcode::PROTO));
        assert_eq!(Opcode::from_byte(0xff), None);
        assert_eq!(Opcode::from_byte(b'z'), None);
    }

    #[test]
    fn test_code_round_trips() {
        for entry in OPCODE_TABLE {
            assert_eq!(Opcode::from_byte(entry.code), Some(entry.opcode));
            assert_eq!(entry.opcode.code(), entry.code);
            assert_eq!(entry.opcode.mnemonic(), entry.mnemonic);
        }
    }

    #[test]
    fn test_construction_classes() {
        for op in [Opcode::GLOBAL, Opcode::INST] {
            assert_eq!(op.class(), OpcodeClass::DirectImport);
        }
        assert_eq!(Opcode::STACK_GLOBAL.class(), OpcodeClass::StackImport);
        for op in [Opcode::REDUCE, Opcode::NEWOBJ, Opcode::NEWOBJ_EX, Opcode::OBJ] {
            assert_eq!(op.class(), OpcodeClass::Invoke);
            assert!(op.class().is_construction());
        }
    }

    #[test]
    fn test_extension_opcodes_always_dangerous() {
        for op in [Opcode::EXT1, Opcode::EXT2, Opcode::EXT4] {
            assert_eq!(op.class(), OpcodeClass::AlwaysDangerous);
            assert!(!op.class().is_construction());
        }
    }

    #[test]
    fn test_persistent_ids_are_inert() {
        assert_eq!(Opcode::PERSID.class(), OpcodeClass::Inert);
        assert_eq!(Opcode::BINPERSID.class(), OpcodeClass::Inert);
    }

    #[test]
    fn test_arg_kinds() {
        assert_eq!(Opcode::GLOBAL.arg_kind(), ArgKind::NamePair);
        assert_eq!(Opcode::BININT.arg_kind(), ArgKind::I4);
        assert_eq!(Opcode::BINFLOAT.arg_kind(), ArgKind::Float8);
        assert_eq!(Opcode::FRAME.arg_kind(), ArgKind::U8);
        assert_eq!(Opcode::MARK.arg_kind(), ArgKind::None);
    }

    #[test]
    fn test_display_uses_mnemonic() {
        assert_eq!(Opcode::SHORT_BINUNICODE.to_string(), "SHORT_BINUNICODE");
    }
}
