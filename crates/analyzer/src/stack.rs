// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulated stack and memo
//!
//! The analyzer tracks just enough about each stack slot to name the target
//! of a construction opcode. Everything it cannot name is [`SimValue::Unknown`].
//! String operands borrow from the input, so a pass holds no copy of the
//! payload beyond escaped text.

use std::borrow::Cow;
use std::collections::HashMap;

use classify::QualifiedName;

/// Abstract value of one stack slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimValue<'a> {
    /// A string literal pushed by the stream
    Str(Cow<'a, str>),
    /// A `MARK` boundary
    Mark,
    /// A symbol imported by `GLOBAL` or `STACK_GLOBAL`
    Global(QualifiedName, bool),
    /// A symbol import whose name could not be determined. Already reported.
    Unresolved,
    Unknown,
}

/// Stack simulation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackFault {
    /// An operand was needed but the stack (above the last mark) was empty.
    Underflow,
    /// A mark-delimited operation found no mark.
    MissingMark,
}

impl std::fmt::Display for StackFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackFault::Underflow => write!(f, "stack underflow"),
            StackFault::MissingMark => write!(f, "no mark on the stack"),
        }
    }
}

pub(crate) type StackResult<T> = Result<T, StackFault>;

#[derive(Debug, Default)]
pub(crate) struct SimStack<'a> {
    slots: Vec<SimValue<'a>>,
    marks: usize,
}

impl<'a> SimStack<'a> {
    pub fn push(&mut self, value: SimValue<'a>) {
        if value == SimValue::Mark {
            self.marks += 1;
        }
        self.slots.push(value);
    }

    /// Pop an operand. Marks are not operands.
    pub fn pop(&mut self) -> StackResult<SimValue<'a>> {
        match self.slots.last() {
            None | Some(SimValue::Mark) => Err(StackFault::Underflow),
            Some(_) => self.slots.pop().ok_or(StackFault::Underflow),
        }
    }

    /// Pop the top slot, mark or operand (`POP`).
    pub fn pop_any(&mut self) -> StackResult<()> {
        match self.slots.pop() {
            None => Err(StackFault::Underflow),
            Some(SimValue::Mark) => {
                self.marks -= 1;
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// Returns the top operand without popping it.
    pub fn top(&self) -> StackResult<&SimValue<'a>> {
        match self.slots.last() {
            None | Some(SimValue::Mark) => Err(StackFault::Underflow),
            Some(top) => Ok(top),
        }
    }

    /// Pop everything above the topmost mark, and the mark itself.
    pub fn pop_mark(&mut self) -> StackResult<Vec<SimValue<'a>>> {
        if self.marks == 0 {
            return Err(StackFault::MissingMark);
        }
        let at = self
            .slots
            .iter()
            .rposition(|v| *v == SimValue::Mark)
            .ok_or(StackFault::MissingMark)?;
        let items = self.slots.split_off(at + 1);
        self.slots.pop();
        self.marks -= 1;
        Ok(items)
    }

    /// Pop `n` operands, returned bottom first.
    pub fn pop_n(&mut self, n: usize) -> StackResult<Vec<SimValue<'a>>> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(self.pop()?);
        }
        items.reverse();
        Ok(items)
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }
}

/// Analysis-flavored memo: recalls exactly what was stored
#[derive(Debug, Default)]
pub(crate) struct Memo<'a> {
    entries: HashMap<i64, SimValue<'a>>,
}

impl<'a> Memo<'a> {
    pub fn store(&mut self, index: i64, value: SimValue<'a>) {
        self.entries.insert(index, value);
    }

    /// Store at the next free index (`MEMOIZE`).
    pub fn memoize(&mut self, value: SimValue<'a>) {
        let index = self.entries.len() as i64;
        self.entries.insert(index, value);
    }

    /// An index that was never stored recalls as `Unknown`.
    pub fn recall(&self, index: i64) -> SimValue<'a> {
        self.entries.get(&index).cloned().unwrap_or(SimValue::Unknown)
    }
}
