// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Resolved guard policy
//!
//! A [`Policy`] is one already-selected configuration document. Where it
//! came from (files, environment, flags) is decided by the caller.

use std::path::Path;

use classify::{AllowList, Tables};
use serde::{Deserialize, Serialize};

use crate::{GuardError, GuardResult, PolicyError};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Enforcement, scanning, size and signature settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    /// Reject unsafe models instead of logging a warning
    pub enforce: bool,
    /// Scan before every load
    pub scan_on_load: bool,
    pub max_file_size_mb: u64,
    pub require_signatures: bool,
    /// Signer identities accepted when signatures are required. Empty
    /// accepts any signer the verifier vouches for.
    pub trusted_signers: Vec<String>,
    /// Entries appended to the default allow-list (`module.symbol` or
    /// `module.*`)
    pub allow: Vec<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enforce: false,
            scan_on_load: true,
            max_file_size_mb: 1000,
            require_signatures: false,
            trusted_signers: Vec::new(),
            allow: Vec::new(),
        }
    }
}

impl Policy {
    /// Parse a TOML policy document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, PolicyError> {
        let policy: Policy = toml::from_str(s)?;
        // Validate allow entries up front.
        policy.allow_list()?;
        Ok(policy)
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn is_signer_trusted(&self, signer: &str) -> bool {
        self.trusted_signers.is_empty() || self.trusted_signers.iter().any(|s| s == signer)
    }

    /// The default allow-list extended with this policy's entries.
    pub fn allow_list(&self) -> Result<AllowList, PolicyError> {
        let extra = AllowList::from_entries(&self.allow)?;
        Ok(AllowList::default().extended(&extra))
    }

    pub fn tables(&self) -> Result<Tables, PolicyError> {
        Ok(Tables::new(self.allow_list()?))
    }

    /// Size check run before a file is read.
    pub fn pre_check(&self, path: &Path, size: u64) -> GuardResult<()> {
        let limit = self.max_file_size();
        if size > limit {
            return Err(GuardError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use classify::QualifiedName;
    use indoc::indoc;

    use super::Policy;
    use crate::PolicyError;

    #[test]
    fn test_defaults() {
        let policy = Policy::from_toml_str("").unwrap();
        assert_eq!(policy, Policy::default());
        assert!(!policy.enforce);
        assert!(policy.scan_on_load);
        assert_eq!(policy.max_file_size(), 1000 * 1024 * 1024);
    }

    #[test]
    fn test_parse() {
        let policy = Policy::from_toml_str(indoc! {r#"
            enforce = true
            max_file_size_mb = 2
            trusted_signers = ["ci@example.com"]
            allow = ["torchvision.*", "sklearn.tree.DecisionTreeClassifier"]
        "#})
        .unwrap();
        assert!(policy.enforce);
        assert!(policy.scan_on_load);
        assert!(policy.is_signer_trusted("ci@example.com"));
        assert!(!policy.is_signer_trusted("someone@example.com"));

        let tables = policy.tables().unwrap();
        assert!(tables.is_allowed(&QualifiedName::new("torchvision.models", "ResNet")));
        assert!(tables.is_allowed(&QualifiedName::new("builtins", "dict")));
        assert!(!tables.is_allowed(&QualifiedName::new("sklearn.tree", "export_text")));
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_entries() {
        assert!(matches!(
            Policy::from_toml_str("enforcement = true"),
            Err(PolicyError::Parse(_))
        ));
        assert!(matches!(
            Policy::from_toml_str(r#"allow = ["os"]"#),
            Err(PolicyError::AllowList(_))
        ));
    }

    #[test]
    fn test_pre_check() {
        let policy = Policy {
            max_file_size_mb: 1,
            ..Policy::default()
        };
        assert!(policy.pre_check(Path::new("a.pkl"), 1024 * 1024).is_ok());
        assert!(policy.pre_check(Path::new("a.pkl"), 1024 * 1024 + 1).is_err());
    }
}
