// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the guard crate

use std::path::PathBuf;

use classify::{AllowListError, ErrorKind};
use runtime::RuntimeError;
use thiserror::Error;

/// Errors building a [`Policy`](crate::Policy) from configuration
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid policy document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    AllowList(#[from] AllowListError),
}

/// Guard errors
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is {size} bytes, over the limit of {limit} bytes")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("{path} is not a recognized model format")]
    UnsupportedFormat { path: PathBuf },

    #[error("malicious content detected in {path}: {threats}")]
    MaliciousModel {
        path: PathBuf,
        kind: ErrorKind,
        threats: String,
    },

    #[error("signature check failed for {path}: {reason}")]
    Signature { path: PathBuf, reason: String },

    #[error("cannot read archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("archive {path} has no pickle member to load")]
    NoPickleMember { path: PathBuf },

    #[error("restricted load of {path} failed: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl GuardError {
    /// Outward category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::FileTooLarge { .. }
            | GuardError::Signature { .. }
            | GuardError::Policy(_) => ErrorKind::PolicyViolation,
            GuardError::MaliciousModel { kind, .. } => *kind,
            GuardError::Load { source, .. } => source.kind(),
            GuardError::Io { .. }
            | GuardError::UnsupportedFormat { .. }
            | GuardError::Archive { .. }
            | GuardError::NoPickleMember { .. } => ErrorKind::MalformedStream,
        }
    }
}

/// Result type alias for guard operations
pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use classify::{ErrorKind, Opcode};
    use runtime::RuntimeError;

    use super::GuardError;

    #[test]
    fn test_kinds() {
        let path = PathBuf::from("model.pt");
        let load = GuardError::Load {
            path: path.clone(),
            source: RuntimeError::DisallowedOpcode {
                opcode: Opcode::EXT1,
                offset: 2,
            },
        };
        assert_eq!(load.kind(), ErrorKind::DisallowedConstruction);

        let too_large = GuardError::FileTooLarge {
            path,
            size: 10,
            limit: 1,
        };
        assert_eq!(too_large.kind(), ErrorKind::PolicyViolation);
        assert_eq!(too_large.to_string(), "model.pt is 10 bytes, over the limit of 1 bytes");
    }
}
