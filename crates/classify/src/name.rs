// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Qualified names of constructible symbols

use std::fmt;

/// A `module` / `symbol` pair as carried by `GLOBAL`, `INST` and
/// `STACK_GLOBAL`.
///
/// Both parts are dotted identifier paths (`torch._utils`,
/// `core.multiarray._reconstruct`). A name with an empty part, an empty
/// segment or a segment that is not an ASCII identifier is malformed and is
/// never allowed by any rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    module: String,
    symbol: String,
}

impl QualifiedName {
    pub fn new(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    /// Split `module.symbol` on the last `.`.
    ///
    /// Allow-list entries with a nested symbol (`torch.nn.parameter.Parameter`)
    /// compare on the joined form, so the split position only matters for
    /// display and prefix checks.
    pub fn parse(dotted: &str) -> Option<Self> {
        let (module, symbol) = dotted.rsplit_once('.')?;
        Some(Self::new(module, symbol))
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The joined `module.symbol` form used for exact matching.
    pub fn dotted(&self) -> String {
        format!("{}.{}", self.module, self.symbol)
    }

    /// Returns true if both parts are well-formed dotted identifier paths.
    pub fn is_well_formed(&self) -> bool {
        is_dotted_path(&self.module) && is_dotted_path(&self.symbol)
    }

    /// Returns true if any segment of the symbol path is a dunder name
    /// (`__globals__`, `__builtins__`, ...).
    pub fn has_dunder_segment(&self) -> bool {
        self.symbol.split('.').any(|s| s.starts_with("__"))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.symbol)
    }
}

pub(crate) fn is_dotted_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_identifier)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
