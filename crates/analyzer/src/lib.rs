// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Static analyzer for pickle streams
//!
//! Classifies a stream as safe or unsafe without constructing any object.
//! The analyzer simulates the stream's stack and memo just far enough to
//! name what each construction opcode would import or call, and checks those
//! names against the allow-list in [`classify::Tables`].
//!
//! # Guarantees
//!
//! - Never imports, instantiates or invokes anything.
//! - Never returns an error for content: decode failures and stack faults
//!   become a `MalformedStream` finding and end the pass.
//! - Memory is bounded by the simulated stack and memo. Byte and string
//!   payloads borrow from the input; only escaped text is decoded into a copy.
//! - Deterministic: the same bytes and tables always give the same verdict.
//!
//! Safety at scan time is best-effort. A stream that computes its import
//! targets is reported as `UnresolvedTarget` rather than proven unsafe; the
//! restricted interpreter is what enforces the allow-list at load time.

mod analyze;
mod stack;
mod verdict;

pub use analyze::{Analyzer, analyze_bytes};
pub use stack::{SimValue, StackFault};
pub use verdict::{Finding, FindingKind, UnresolvedTarget, Verdict};
