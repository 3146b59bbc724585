// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Allow-list of constructible symbols
//!
//! An [`AllowList`] is an ordered set of [`AllowRule`]s. A name is allowed if
//! it is well formed and at least one rule matches:
//!
//! - `Exact("module.symbol")` compares the joined dotted form.
//! - `Module("prefix")` matches when the module equals the prefix or starts
//!   with `prefix.`, and no segment of the symbol is a dunder name.
//!
//! Matching never falls back to plain string prefixes, so `torchvision` does
//! not match `Module("torch")`.

use std::fmt;

use thiserror::Error;

use crate::{QualifiedName, name::is_dotted_path};

/// Exact entries allowed when no policy overrides them
pub const DEFAULT_ALLOWED: &[&str] = &[
    // builtins
    "builtins.list",
    "builtins.tuple",
    "builtins.dict",
    "builtins.set",
    "builtins.frozenset",
    "builtins.str",
    "builtins.int",
    "builtins.float",
    "builtins.bool",
    "builtins.bytes",
    "builtins.bytearray",
    // collections
    "collections.OrderedDict",
    "collections.defaultdict",
    "collections.Counter",
    "collections.deque",
    // numpy
    "numpy.ndarray",
    "numpy.dtype",
    "numpy.core.multiarray._reconstruct",
    "numpy.core.multiarray.scalar",
    // torch
    "torch.Tensor",
    "torch.nn.parameter.Parameter",
    "torch._utils._rebuild_tensor_v2",
    "torch._utils._rebuild_parameter",
    "torch.Size",
    "torch.dtype",
    "torch.device",
    "torch.storage._TypedStorage",
    "torch.storage._UntypedStorage",
    "torch.FloatStorage",
    "torch.DoubleStorage",
    "torch.HalfStorage",
    "torch.BFloat16Storage",
    "torch.LongStorage",
    "torch.IntStorage",
    "torch.ShortStorage",
    "torch.CharStorage",
    "torch.ByteStorage",
    "torch.BoolStorage",
];

/// Errors building an allow-list from configuration text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllowListError {
    #[error("invalid allow-list entry {entry:?}: {reason}")]
    InvalidEntry { entry: String, reason: &'static str },
}

/// A single allow-list rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AllowRule {
    /// Joined `module.symbol` form
    Exact(String),
    /// Module path; covers the module and its submodules
    Module(String),
}

impl AllowRule {
    /// Parse a configuration entry.
    ///
    /// `torch.*` and `torch.` are module rules for `torch`; anything else is
    /// an exact rule and must contain at least one `.`.
    pub fn parse(entry: &str) -> Result<Self, AllowListError> {
        let entry = entry.trim();
        let invalid = |reason| AllowListError::InvalidEntry {
            entry: entry.to_string(),
            reason,
        };

        if let Some(prefix) = entry
            .strip_suffix(".*")
            .or_else(|| entry.strip_suffix('.'))
        {
            if !is_dotted_path(prefix) {
                return Err(invalid("module prefix is not a dotted identifier path"));
            }
            return Ok(AllowRule::Module(prefix.to_string()));
        }

        if !is_dotted_path(entry) {
            return Err(invalid("not a dotted identifier path"));
        }
        if !entry.contains('.') {
            return Err(invalid("exact entry needs a module and a symbol"));
        }
        Ok(AllowRule::Exact(entry.to_string()))
    }

    /// Returns true if this rule matches a well-formed `name`.
    fn matches(&self, name: &QualifiedName, dotted: &str) -> bool {
        match self {
            AllowRule::Exact(exact) => exact == dotted,
            AllowRule::Module(prefix) => {
                let module = name.module();
                let in_module = module == prefix
                    || (module.len() > prefix.len()
                        && module.starts_with(prefix.as_str())
                        && module.as_bytes()[prefix.len()] == b'.');
                in_module && !name.has_dunder_segment()
            }
        }
    }
}

impl fmt::Display for AllowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowRule::Exact(exact) => f.write_str(exact),
            AllowRule::Module(prefix) => write!(f, "{prefix}.*"),
        }
    }
}

/// Ordered, immutable set of allow rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    rules: Vec<AllowRule>,
}

impl AllowList {
    /// An allow-list that allows nothing.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn from_rules(rules: impl IntoIterator<Item = AllowRule>) -> Self {
        let mut out: Vec<AllowRule> = Vec::new();
        for rule in rules {
            if !out.contains(&rule) {
                out.push(rule);
            }
        }
        Self { rules: out }
    }

    /// Build from configuration entries, see [`AllowRule::parse`].
    pub fn from_entries<S: AsRef<str>>(
        entries: impl IntoIterator<Item = S>,
    ) -> Result<Self, AllowListError> {
        let rules = entries
            .into_iter()
            .map(|e| AllowRule::parse(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_rules(rules))
    }

    /// A new list with `other`'s rules appended after this list's rules.
    pub fn extended(&self, other: &AllowList) -> Self {
        Self::from_rules(self.rules.iter().chain(other.rules.iter()).cloned())
    }

    pub fn rules(&self) -> &[AllowRule] {
        &self.rules
    }

    pub fn is_allowed(&self, name: &QualifiedName) -> bool {
        if !name.is_well_formed() {
            return false;
        }
        let dotted = name.dotted();
        self.rules.iter().any(|rule| rule.matches(name, &dotted))
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::from_rules(
            DEFAULT_ALLOWED
                .iter()
                .map(|entry| AllowRule::Exact(entry.to_string())),
        )
    }
}
