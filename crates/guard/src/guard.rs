// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scan and load entry points

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use analyzer::{Analyzer, FindingKind};
use classify::{ErrorKind, Tables};
use runtime::{DefaultResolver, Resolver, Unpickler, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::format::has_proto_header;
use crate::{
    Format, GuardError, GuardResult, MemberReport, Policy, PolicyError, ScanReport,
    SignatureVerifier, is_supported, signature_path, sniff,
};

/// Bytes read from an archive member to look for a `PROTO` header
const PROTO_HEADER_LEN: u64 = 2;

/// A pickle member extracted from an archive
struct Member {
    name: String,
    content: Vec<u8>,
}

/// Scans model files and loads them through the restricted interpreter.
///
/// Cheap to clone and safe to share between threads.
#[derive(Clone)]
pub struct Guard {
    policy: Arc<Policy>,
    tables: Arc<Tables>,
    resolver: Arc<dyn Resolver>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl Default for Guard {
    fn default() -> Self {
        Self {
            policy: Arc::new(Policy::default()),
            tables: Arc::new(Tables::default()),
            resolver: Arc::new(DefaultResolver),
            verifier: None,
        }
    }
}

impl Guard {
    pub fn new(policy: Policy) -> Result<Self, PolicyError> {
        let tables = policy.tables()?;
        Ok(Self {
            policy: Arc::new(policy),
            tables: Arc::new(tables),
            ..Self::default()
        })
    }

    /// Replace the resolver used by restricted loads.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Scan a file without executing any of it.
    ///
    /// Never fails: read errors and unknown formats produce an unsafe report
    /// with `error` set.
    pub fn scan(&self, path: &Path) -> ScanReport {
        let report = match self.pre_check(path).and_then(|_| read(path)) {
            Ok(data) => self.scan_bytes(path, &data),
            Err(err) => ScanReport::failed(path, Format::Unrecognized, err.to_string()),
        };
        info!(
            path = %path.display(),
            safe = report.is_safe,
            format = ?report.format,
            threats = report.threats.len(),
            "scanned"
        );
        report
    }

    /// Scan in-memory content; `path` is used for the report and for
    /// extension-based format hints.
    pub fn scan_bytes(&self, path: &Path, data: &[u8]) -> ScanReport {
        match sniff(path, data) {
            Format::Stream => {
                let verdict = Analyzer::new(&self.tables).analyze_bytes(data);
                ScanReport::from_verdict(path, &verdict)
            }
            Format::ZipContainer => match self.pickle_members(path, data) {
                Ok(members) => ScanReport::from_members(path, self.scan_members(&members)),
                Err(err) => ScanReport::failed(path, Format::ZipContainer, err.to_string()),
            },
            format @ Format::Inert(_) => {
                // Bytes a pickle loader would still act on are never inert
                let verdict = Analyzer::new(&self.tables).analyze_bytes(data);
                if verdict.findings().iter().all(|f| f.kind == FindingKind::MalformedStream) {
                    ScanReport::inert(path, format)
                } else {
                    let mut report = ScanReport::from_verdict(path, &verdict);
                    report.format = format;
                    report
                }
            }
            Format::Unrecognized => {
                ScanReport::failed(path, Format::Unrecognized, "unrecognized model format")
            }
        }
    }

    /// Scan every supported file under `dir`, in file name order.
    pub fn scan_dir(&self, dir: &Path, recursive: bool) -> Vec<ScanReport> {
        let mut walk = WalkDir::new(dir).sort_by_file_name();
        if !recursive {
            walk = walk.max_depth(1);
        }
        walk.into_iter()
            .filter_map(|entry| {
                entry
                    .map_err(|err| warn!(error = %err, "skipping unreadable directory entry"))
                    .ok()
            })
            .filter(|entry| entry.file_type().is_file() && is_supported(entry.path()))
            .map(|entry| self.scan(entry.path()))
            .collect()
    }

    /// Load a model through the restricted interpreter.
    ///
    /// The advisory scan only decides whether the load goes ahead; the
    /// interpreter enforces the allow-list on its own either way.
    pub fn load(&self, path: &Path) -> GuardResult<Value> {
        self.pre_check(path)?;
        self.verify_signature(path)?;
        let data = read(path)?;

        if self.policy.scan_on_load {
            let report = self.scan_bytes(path, &data);
            if !report.is_safe {
                let threats = report.summary();
                if self.policy.enforce {
                    warn!(path = %path.display(), %threats, "refusing unsafe model");
                    return Err(GuardError::MaliciousModel {
                        path: path.to_path_buf(),
                        kind: report.kind().unwrap_or(ErrorKind::DisallowedConstruction),
                        threats,
                    });
                }
                warn!(path = %path.display(), %threats, "loading unsafe model in warn mode");
            }
        }
        self.load_bytes(path, &data)
    }

    fn load_bytes(&self, path: &Path, data: &[u8]) -> GuardResult<Value> {
        let unpickler = Unpickler::new(&self.tables, &*self.resolver);
        let failed = |source| GuardError::Load {
            path: path.to_path_buf(),
            source,
        };
        match sniff(path, data) {
            Format::Stream => unpickler.load(data).map_err(failed),
            Format::ZipContainer => {
                let mut members = self.pickle_members(path, data)?;
                let index = members
                    .iter()
                    .position(|m| m.name.ends_with("data.pkl"))
                    .or_else(|| (members.len() == 1).then_some(0))
                    .ok_or_else(|| GuardError::NoPickleMember {
                        path: path.to_path_buf(),
                    })?;
                let member = members.swap_remove(index);
                debug!(path = %path.display(), member = %member.name, "loading archive member");
                unpickler.load(&member.content).map_err(failed)
            }
            Format::Inert(_) | Format::Unrecognized => Err(GuardError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn pre_check(&self, path: &Path) -> GuardResult<()> {
        let metadata = fs::metadata(path).map_err(|source| GuardError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(GuardError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }
        self.policy.pre_check(path, metadata.len())
    }

    fn verify_signature(&self, path: &Path) -> GuardResult<()> {
        if !self.policy.require_signatures {
            return Ok(());
        }
        let rejected = |reason: String| GuardError::Signature {
            path: path.to_path_buf(),
            reason,
        };
        let signature = signature_path(path);
        if !signature.is_file() {
            return Err(rejected(format!("missing signature {}", signature.display())));
        }
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| rejected("no signature verifier configured".to_string()))?;
        let signer = verifier.verify(path, &signature).map_err(rejected)?;
        if !self.policy.is_signer_trusted(&signer.identity) {
            return Err(rejected(format!("signer {} is not trusted", signer.identity)));
        }
        debug!(path = %path.display(), signer = %signer.identity, "signature verified");
        Ok(())
    }

    fn scan_members(&self, members: &[Member]) -> Vec<MemberReport> {
        let analyzer = Analyzer::new(&self.tables);
        members
            .iter()
            .map(|member| {
                let verdict = analyzer.analyze_bytes(&member.content);
                debug!(member = %member.name, safe = verdict.is_safe(), "scanned archive member");
                MemberReport::from_verdict(&member.name, &verdict)
            })
            .collect()
    }

    /// Extract the pickle members of a zip archive, in archive order.
    ///
    /// Members named `*.pkl` are always taken. Other members are taken when
    /// their first bytes are a `PROTO` header, except raw storage under a
    /// `data/` directory. Every member taken is bounded by the policy size
    /// limit after decompression.
    fn pickle_members(&self, path: &Path, data: &[u8]) -> GuardResult<Vec<Member>> {
        let archive_error = |reason: String| GuardError::Archive {
            path: path.to_path_buf(),
            reason,
        };
        let limit = self.policy.max_file_size();
        let mut archive =
            ZipArchive::new(Cursor::new(data)).map_err(|err| archive_error(err.to_string()))?;

        let mut members = Vec::new();
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|err| archive_error(err.to_string()))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let named = name.ends_with(".pkl");
            if !named && is_tensor_storage(&name) {
                continue;
            }

            let mut content = Vec::new();
            (&mut file)
                .take(PROTO_HEADER_LEN)
                .read_to_end(&mut content)
                .map_err(|err| archive_error(format!("{name}: {err}")))?;
            if !named && !has_proto_header(&content) {
                continue;
            }
            let rest = limit
                .saturating_add(1)
                .saturating_sub(content.len() as u64);
            file.take(rest)
                .read_to_end(&mut content)
                .map_err(|err| archive_error(format!("{name}: {err}")))?;
            if content.len() as u64 > limit {
                return Err(archive_error(format!(
                    "{name} expands past the limit of {limit} bytes"
                )));
            }
            members.push(Member { name, content });
        }
        Ok(members)
    }
}

/// Returns true for members stored under a `data/` directory, where
/// archives written by torch keep raw tensor bytes.
fn is_tensor_storage(name: &str) -> bool {
    name.split('/').rev().skip(1).any(|dir| dir == "data")
}

fn read(path: &Path) -> GuardResult<Vec<u8>> {
    fs::read(path).map_err(|source| GuardError::Io {
        path: path.to_path_buf(),
        source,
    })
}
