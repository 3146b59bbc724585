// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Identity a verifier vouches for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    pub identity: String,
    pub issuer: Option<String>,
}

/// Checks a detached signature for a model file.
///
/// Implementations talk to whatever signing service the host uses. An `Err`
/// carries the reason the signature was rejected.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, path: &Path, signature: &Path) -> Result<Signer, String>;
}

/// Location of the detached signature for `path`: the same name with
/// `.sig` appended.
pub fn signature_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".sig");
    PathBuf::from(name)
}
