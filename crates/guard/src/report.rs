// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scan reports

use std::path::{Path, PathBuf};

use analyzer::{FindingKind, Verdict};
use classify::ErrorKind;
use serde::Serialize;

use crate::Format;

/// Result of scanning one pickle member of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberReport {
    pub name: String,
    pub is_safe: bool,
    pub opcode_count: usize,
    pub threats: Vec<String>,
    #[serde(skip)]
    kind: Option<ErrorKind>,
}

/// Uniform outward result of a scan
///
/// Threats read `"<kind>: <detail> at byte <offset>"`; archive threats are
/// prefixed with the member name. Failures to read or identify the file are
/// reported in `error` and make the report unsafe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub path: PathBuf,
    pub is_safe: bool,
    pub format: Format,
    pub threats: Vec<String>,
    pub opcode_count: usize,
    pub members: Vec<MemberReport>,
    pub error: Option<String>,
    #[serde(skip)]
    kind: Option<ErrorKind>,
}

impl ScanReport {
    /// Report for a file that could not be scanned.
    pub fn failed(path: &Path, format: Format, error: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            is_safe: false,
            format,
            threats: Vec::new(),
            opcode_count: 0,
            members: Vec::new(),
            error: Some(error.into()),
            kind: Some(ErrorKind::MalformedStream),
        }
    }

    /// Report for a file that is safe without being scanned.
    pub(crate) fn inert(path: &Path, format: Format) -> Self {
        Self {
            path: path.to_path_buf(),
            is_safe: true,
            format,
            threats: Vec::new(),
            opcode_count: 0,
            members: Vec::new(),
            error: None,
            kind: None,
        }
    }

    pub(crate) fn from_verdict(path: &Path, verdict: &Verdict) -> Self {
        Self {
            path: path.to_path_buf(),
            is_safe: verdict.is_safe(),
            format: Format::Stream,
            threats: threats(verdict),
            opcode_count: verdict.opcode_count(),
            members: Vec::new(),
            error: None,
            kind: verdict_kind(verdict),
        }
    }

    pub(crate) fn from_members(path: &Path, members: Vec<MemberReport>) -> Self {
        let threats = members
            .iter()
            .flat_map(|m| m.threats.iter().map(move |t| format!("{}: {t}", m.name)))
            .collect();
        let kind = members.iter().filter_map(|m| m.kind).max_by_key(|k| severity(*k));
        Self {
            path: path.to_path_buf(),
            is_safe: members.iter().all(|m| m.is_safe),
            format: Format::ZipContainer,
            threats,
            opcode_count: members.iter().map(|m| m.opcode_count).sum(),
            members,
            error: None,
            kind,
        }
    }

    /// Outward category of what made this report unsafe, `None` when safe.
    ///
    /// Streams that are only malformed are `MalformedStream`; anything that
    /// names or hides a construction target is `DisallowedConstruction`.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    /// Threats joined for a single error message.
    pub fn summary(&self) -> String {
        match (&self.error, self.threats.is_empty()) {
            (Some(error), _) => error.clone(),
            (None, false) => self.threats.join("; "),
            (None, true) => "unknown threats".to_string(),
        }
    }
}

impl MemberReport {
    pub(crate) fn from_verdict(name: &str, verdict: &Verdict) -> Self {
        Self {
            name: name.to_string(),
            is_safe: verdict.is_safe(),
            opcode_count: verdict.opcode_count(),
            threats: threats(verdict),
            kind: verdict_kind(verdict),
        }
    }
}

fn threats(verdict: &Verdict) -> Vec<String> {
    verdict.findings().iter().map(ToString::to_string).collect()
}

fn verdict_kind(verdict: &Verdict) -> Option<ErrorKind> {
    if verdict.is_safe() {
        return None;
    }
    let malformed_only = verdict
        .findings()
        .iter()
        .all(|f| f.kind == FindingKind::MalformedStream);
    Some(if malformed_only {
        ErrorKind::MalformedStream
    } else {
        ErrorKind::DisallowedConstruction
    })
}

fn severity(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::DisallowedConstruction => 2,
        _ => 1,
    }
}
