// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The immutable configuration shared by the analyzer and the interpreter

use std::collections::HashSet;

use crate::{AllowList, Opcode, OpcodeClass, QualifiedName};

/// Opcode classification plus the allow-list.
///
/// Both engines take a `&Tables` at construction so that they agree on what
/// is dangerous. Share one instance behind an `Arc` across threads.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    allow_list: AllowList,
    escalated: HashSet<Opcode>,
}

impl Tables {
    pub fn new(allow_list: AllowList) -> Self {
        Self {
            allow_list,
            escalated: HashSet::new(),
        }
    }

    /// Returns a copy of these tables with `opcode` treated as always
    /// dangerous. Classes can only be escalated, never downgraded.
    pub fn with_always_dangerous(mut self, opcode: Opcode) -> Self {
        self.escalated.insert(opcode);
        self
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Effective class of `opcode` after escalation.
    pub fn class_of(&self, opcode: Opcode) -> OpcodeClass {
        if self.escalated.contains(&opcode) {
            OpcodeClass::AlwaysDangerous
        } else {
            opcode.class()
        }
    }

    pub fn is_always_dangerous(&self, opcode: Opcode) -> bool {
        self.class_of(opcode) == OpcodeClass::AlwaysDangerous
    }

    pub fn is_construction_opcode(&self, opcode: Opcode) -> bool {
        self.class_of(opcode).is_construction()
    }

    pub fn is_allowed(&self, name: &QualifiedName) -> bool {
        self.allow_list.is_allowed(name)
    }
}
