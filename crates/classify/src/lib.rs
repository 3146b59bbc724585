// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Classification tables for pickle streams
//!
//! This crate is the single source of truth both engines consult:
//!
//! - [`opcode`]: every opcode of protocols 0-5 with its byte value, argument
//!   encoding and [`OpcodeClass`]
//! - [`name`]: [`QualifiedName`], the `module` / `symbol` pair a stream asks
//!   to import
//! - [`allowlist`]: exact and module-prefix rules over qualified names
//! - [`Tables`]: the immutable configuration object handed to the analyzer
//!   and to the interpreter

pub mod allowlist;
mod kind;
pub mod name;
pub mod opcode;
mod tables;

pub use allowlist::{AllowList, AllowListError, AllowRule, DEFAULT_ALLOWED};
pub use kind::ErrorKind;
pub use name::QualifiedName;
pub use opcode::{ArgKind, BY_CODE, ClassifiedOpcode, OPCODE_TABLE, Opcode, OpcodeClass};
pub use tables::Tables;
