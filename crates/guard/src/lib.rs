// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scan and load facade for pickle-based model files
//!
//! ```text
//!            +--------+    sniff     +-----------------------------+
//!   path --> | Guard  | -----------> | Stream | Zip | Inert | ???   |
//!            +--------+              +-----------------------------+
//!              |    |                    |      |
//!        scan  |    |  load              v      v
//!              v    v               analyzer  (per pickle member)
//!       ScanReport  runtime::Unpickler
//! ```
//!
//! [`Guard::scan`] never executes anything: it disassembles and analyzes
//! each pickle stream and reports what it found. [`Guard::load`] applies the
//! [`Policy`] (size limit, signatures, advisory scan) and then always goes
//! through the restricted interpreter, which refuses disallowed
//! constructions before they are resolved.
//!
//! [`adapter`] lets a host route its own model loader through a guard for
//! a bounded scope.

pub mod adapter;
mod error;
mod format;
mod guard;
mod policy;
mod report;
mod signature;

pub use adapter::{GuardedLoader, LoaderSlot, ModelLoader, PatchGuard};
pub use error::{GuardError, GuardResult, PolicyError};
pub use format::{Format, InertFormat, SUPPORTED_EXTENSIONS, is_pickle_stream, is_supported, sniff};
pub use guard::Guard;
pub use policy::Policy;
pub use report::{MemberReport, ScanReport};
pub use runtime::Value;
pub use signature::{SignatureVerifier, Signer, signature_path};
