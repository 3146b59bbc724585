// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Findings and the classification verdict

use std::fmt;

use classify::{ErrorKind, Opcode, QualifiedName};
use serde::Serialize;

/// Category of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FindingKind {
    /// An always-dangerous opcode, rejected regardless of any target.
    DangerousOpcode,
    /// An import of a name outside the allow-list, or a malformed name.
    DisallowedConstruction,
    /// A construction whose target could not be determined statically.
    UnresolvedTarget,
    /// The stream could not be decoded or simulated.
    MalformedStream,
}

impl FindingKind {
    /// Outward error category for this finding.
    pub fn error_kind(self) -> ErrorKind {
        match self {
            FindingKind::DangerousOpcode | FindingKind::DisallowedConstruction => {
                ErrorKind::DisallowedConstruction
            }
            FindingKind::UnresolvedTarget => ErrorKind::UnresolvedTarget,
            FindingKind::MalformedStream => ErrorKind::MalformedStream,
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FindingKind::DangerousOpcode => "DangerousOpcode",
            FindingKind::DisallowedConstruction => "DisallowedConstruction",
            FindingKind::UnresolvedTarget => "UnresolvedTarget",
            FindingKind::MalformedStream => "MalformedStream",
        };
        f.write_str(s)
    }
}

/// A single reason a stream is not provably safe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    /// Mnemonic of the opcode that raised the finding, if any
    #[serde(serialize_with = "serialize_opcode")]
    pub opcode: Option<Opcode>,
    /// Byte offset of the opcode (or of the decode failure)
    pub offset: usize,
    /// Dotted name of the construction target, when known
    pub target: Option<String>,
    pub detail: String,
}

fn serialize_opcode<S: serde::Serializer>(op: &Option<Opcode>, s: S) -> Result<S::Ok, S::Error> {
    match op {
        Some(op) => s.serialize_some(op.mnemonic()),
        None => s.serialize_none(),
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at byte {}", self.kind, self.detail, self.offset)
    }
}

/// A construction target that is only partially known
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedTarget {
    pub offset: usize,
    pub module: Option<String>,
    pub symbol: Option<String>,
}

impl UnresolvedTarget {
    /// `module.symbol` with `?` for unknown parts.
    pub fn describe(&self) -> String {
        format!(
            "{}.{}",
            self.module.as_deref().unwrap_or("?"),
            self.symbol.as_deref().unwrap_or("?")
        )
    }
}

/// Result of analyzing one stream
///
/// A stream is safe exactly when no finding was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    findings: Vec<Finding>,
    unresolved: Vec<UnresolvedTarget>,
    imports: Vec<String>,
    opcode_count: usize,
    protocol: Option<u8>,
}

impl Verdict {
    /// Returns true if no finding was recorded
    pub fn is_safe(&self) -> bool {
        self.findings.is_empty()
    }

    /// Findings in order of discovery (ascending byte offset)
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn unresolved(&self) -> &[UnresolvedTarget] {
        &self.unresolved
    }

    /// Every name imported by the stream, allowed or not, in stream order
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// Number of opcodes decoded before the pass ended
    pub fn opcode_count(&self) -> usize {
        self.opcode_count
    }

    /// Protocol declared by a leading `PROTO`, if any
    pub fn protocol(&self) -> Option<u8> {
        self.protocol
    }

    /// Returns true if any finding has the given kind
    pub fn has(&self, kind: FindingKind) -> bool {
        self.findings.iter().any(|f| f.kind == kind)
    }

    /// Consumes the verdict and returns the findings
    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    pub(crate) fn push(&mut self, finding: Finding) {
        tracing::debug!(
            kind = %finding.kind,
            offset = finding.offset,
            detail = %finding.detail,
            "finding"
        );
        self.findings.push(finding);
    }

    pub(crate) fn push_unresolved(&mut self, target: UnresolvedTarget) {
        self.unresolved.push(target);
    }

    pub(crate) fn record_import(&mut self, name: &QualifiedName) {
        self.imports.push(name.to_string());
    }

    pub(crate) fn count_opcode(&mut self) {
        self.opcode_count += 1;
    }

    pub(crate) fn set_protocol(&mut self, protocol: u8) {
        self.protocol.get_or_insert(protocol);
    }
}
