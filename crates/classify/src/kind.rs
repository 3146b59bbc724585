// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Outward error categories shared by every layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The bytes do not decode as a well-formed stream.
    MalformedStream,
    /// A construction target or opcode is outside what is allowed.
    DisallowedConstruction,
    /// A construction target could not be determined statically.
    UnresolvedTarget,
    /// A pre-check or policy requirement failed before decoding.
    PolicyViolation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::MalformedStream => "malformed stream",
            ErrorKind::DisallowedConstruction => "disallowed construction",
            ErrorKind::UnresolvedTarget => "unresolved target",
            ErrorKind::PolicyViolation => "policy violation",
        };
        f.write_str(s)
    }
}
