// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Single-pass static analysis
//!
//! [`Analyzer`] replays a stream's stack effects on a [`SimStack`] without
//! importing, instantiating or invoking anything. Construction opcodes are
//! checked against the allow-list using whatever the simulation knows about
//! their operands:
//!
//! | Opcode | Target | Finding when not allowed |
//! |--------|--------|--------------------------|
//! | `GLOBAL`, `INST` | name in the argument | `DisallowedConstruction` |
//! | `STACK_GLOBAL` | two string operands | `DisallowedConstruction` |
//! | `REDUCE`, `NEWOBJ`, `NEWOBJ_EX`, `OBJ` | callable operand | `UnresolvedTarget` |
//!
//! `STACK_GLOBAL` reports `UnresolvedTarget` instead when either operand is
//! not a known string. Invocations are only reported when the callable is not
//! an import, allowed or not.
//! | `EXT1`, `EXT2`, `EXT4` | none | `DangerousOpcode`, always |
//!
//! A callable that was imported but disallowed was reported at its import and
//! adds no second finding when invoked.

use classify::{Opcode, OpcodeClass, QualifiedName, Tables};
use disasm::{Argument, DecodeResult, Disassembler, OpcodeRecord};

use crate::{
    Finding, FindingKind, UnresolvedTarget, Verdict,
    stack::{Memo, SimStack, SimValue, StackFault, StackResult},
};

/// Static analyzer bound to a set of classification tables
#[derive(Debug, Clone, Copy)]
pub struct Analyzer<'t> {
    tables: &'t Tables,
}

/// Mutable state of one pass over a stream borrowed for `'a`
#[derive(Default)]
struct Pass<'a> {
    stack: SimStack<'a>,
    memo: Memo<'a>,
    verdict: Verdict,
    stopped: bool,
}

impl<'t> Analyzer<'t> {
    pub fn new(tables: &'t Tables) -> Self {
        Self { tables }
    }

    /// Analyze an already disassembled stream.
    pub fn analyze(&self, records: &[OpcodeRecord<'_>]) -> Verdict {
        self.run(records.iter().cloned().map(Ok))
    }

    /// Disassemble and analyze in one streaming pass.
    ///
    /// Decode errors become a `MalformedStream` finding; this never fails.
    pub fn analyze_bytes(&self, data: &[u8]) -> Verdict {
        self.run(Disassembler::new(data))
    }

    fn run<'a>(
        &self,
        records: impl IntoIterator<Item = DecodeResult<OpcodeRecord<'a>>>,
    ) -> Verdict {
        let mut pass = Pass::default();
        let mut end = 0;

        for record in records {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    pass.verdict.push(Finding {
                        kind: FindingKind::MalformedStream,
                        opcode: e.opcode(),
                        offset: e.offset(),
                        target: None,
                        detail: e.to_string(),
                    });
                    return pass.verdict;
                }
            };

            pass.verdict.count_opcode();
            end = record.offset + 1;
            if let Err(fault) = self.step(&mut pass, &record) {
                pass.verdict.push(Finding {
                    kind: FindingKind::MalformedStream,
                    opcode: Some(record.opcode),
                    offset: record.offset,
                    target: None,
                    detail: format!("{fault} at {}", record.opcode),
                });
                return pass.verdict;
            }
            if pass.stopped {
                return pass.verdict;
            }
        }

        pass.verdict.push(Finding {
            kind: FindingKind::MalformedStream,
            opcode: None,
            offset: end,
            target: None,
            detail: "stream ends without STOP".into(),
        });
        pass.verdict
    }

    /// Apply one opcode to the simulation.
    fn step<'a>(&self, pass: &mut Pass<'a>, record: &OpcodeRecord<'a>) -> StackResult<()> {
        let op = record.opcode;
        let offset = record.offset;

        if self.tables.is_always_dangerous(op) {
            pass.verdict.push(Finding {
                kind: FindingKind::DangerousOpcode,
                opcode: Some(op),
                offset,
                target: None,
                detail: format!("{op} is always rejected"),
            });
        }

        let stack = &mut pass.stack;
        match op {
            Opcode::STOP => {
                stack.pop()?;
                pass.stopped = true;
            }
            Opcode::PROTO => {
                if let Some(p) = record.arg.as_int() {
                    pass.verdict.set_protocol(p as u8);
                }
            }
            Opcode::FRAME => {}

            // Stack shaping
            Opcode::MARK => stack.push(SimValue::Mark),
            Opcode::POP => stack.pop_any()?,
            Opcode::POP_MARK => {
                stack.pop_mark()?;
            }
            Opcode::DUP => {
                let top = stack.top()?.clone();
                stack.push(top);
            }

            // String literals are tracked, every other literal is opaque
            Opcode::STRING
            | Opcode::BINSTRING
            | Opcode::SHORT_BINSTRING
            | Opcode::UNICODE
            | Opcode::BINUNICODE
            | Opcode::SHORT_BINUNICODE
            | Opcode::BINUNICODE8 => match &record.arg {
                Argument::Str(s) => stack.push(SimValue::Str(s.clone())),
                _ => stack.push(SimValue::Unknown),
            },
            Opcode::NONE
            | Opcode::NEWTRUE
            | Opcode::NEWFALSE
            | Opcode::INT
            | Opcode::BININT
            | Opcode::BININT1
            | Opcode::BININT2
            | Opcode::LONG
            | Opcode::LONG1
            | Opcode::LONG4
            | Opcode::FLOAT
            | Opcode::BINFLOAT
            | Opcode::BINBYTES
            | Opcode::SHORT_BINBYTES
            | Opcode::BINBYTES8
            | Opcode::BYTEARRAY8
            | Opcode::EMPTY_LIST
            | Opcode::EMPTY_TUPLE
            | Opcode::EMPTY_DICT
            | Opcode::EMPTY_SET
            | Opcode::PERSID
            | Opcode::NEXT_BUFFER => stack.push(SimValue::Unknown),
            Opcode::BINPERSID => {
                stack.pop()?;
                stack.push(SimValue::Unknown);
            }
            Opcode::READONLY_BUFFER => {
                stack.top()?;
            }

            // Containers
            Opcode::LIST | Opcode::TUPLE | Opcode::DICT | Opcode::FROZENSET => {
                stack.pop_mark()?;
                stack.push(SimValue::Unknown);
            }
            Opcode::TUPLE1 | Opcode::TUPLE2 | Opcode::TUPLE3 => {
                let n = match op {
                    Opcode::TUPLE1 => 1,
                    Opcode::TUPLE2 => 2,
                    _ => 3,
                };
                stack.pop_n(n)?;
                stack.push(SimValue::Unknown);
            }
            Opcode::APPEND | Opcode::BUILD => {
                stack.pop()?;
                stack.top()?;
            }
            Opcode::SETITEM => {
                stack.pop_n(2)?;
                stack.top()?;
            }
            Opcode::APPENDS | Opcode::SETITEMS | Opcode::ADDITEMS => {
                stack.pop_mark()?;
                stack.top()?;
            }

            // Memo
            Opcode::PUT | Opcode::BINPUT | Opcode::LONG_BINPUT => {
                let top = stack.top()?.clone();
                pass.memo.store(record.arg.as_int().unwrap_or_default(), top);
            }
            Opcode::MEMOIZE => {
                let top = stack.top()?.clone();
                pass.memo.memoize(top);
            }
            Opcode::GET | Opcode::BINGET | Opcode::LONG_BINGET => {
                let value = record
                    .arg
                    .as_int()
                    .map_or(SimValue::Unknown, |i| pass.memo.recall(i));
                stack.push(value);
            }

            // Construction
            Opcode::GLOBAL => {
                let value = match record.arg.qualified_name() {
                    Some(name) if self.tables.is_construction_opcode(op) => {
                        let allowed = self.check_import(&mut pass.verdict, op, offset, &name);
                        SimValue::Global(name, allowed)
                    }
                    _ => SimValue::Unresolved,
                };
                pass.stack.push(value);
            }
            Opcode::INST => {
                stack.pop_mark()?;
                if let Some(name) = record.arg.qualified_name() {
                    if self.tables.is_construction_opcode(op) {
                        self.check_import(&mut pass.verdict, op, offset, &name);
                    }
                }
                pass.stack.push(SimValue::Unknown);
            }
            Opcode::STACK_GLOBAL => {
                let symbol = stack.pop()?;
                let module = stack.pop()?;
                let value = if self.tables.is_construction_opcode(op) {
                    self.check_stack_import(&mut pass.verdict, offset, module, symbol)
                } else {
                    SimValue::Unresolved
                };
                pass.stack.push(value);
            }
            Opcode::REDUCE | Opcode::NEWOBJ => {
                stack.pop()?;
                let callable = stack.pop()?;
                self.check_callable(&mut pass.verdict, op, offset, &callable);
                pass.stack.push(SimValue::Unknown);
            }
            Opcode::NEWOBJ_EX => {
                stack.pop_n(2)?;
                let callable = stack.pop()?;
                self.check_callable(&mut pass.verdict, op, offset, &callable);
                pass.stack.push(SimValue::Unknown);
            }
            Opcode::OBJ => {
                let items = stack.pop_mark()?;
                let callable = items.into_iter().next().ok_or(StackFault::Underflow)?;
                self.check_callable(&mut pass.verdict, op, offset, &callable);
                pass.stack.push(SimValue::Unknown);
            }

            Opcode::EXT1 | Opcode::EXT2 | Opcode::EXT4 => stack.push(SimValue::Unknown),
        }
        Ok(())
    }

    /// Check a fully known import. Returns whether it is allowed.
    fn check_import(
        &self,
        verdict: &mut Verdict,
        op: Opcode,
        offset: usize,
        name: &QualifiedName,
    ) -> bool {
        verdict.record_import(name);
        if self.tables.is_allowed(name) {
            tracing::trace!(%name, offset, "allowed import");
            return true;
        }
        let detail = if name.is_well_formed() {
            format!("{name} is not in the allow-list")
        } else {
            format!("malformed name {:?}", name.to_string())
        };
        verdict.push(Finding {
            kind: FindingKind::DisallowedConstruction,
            opcode: Some(op),
            offset,
            target: Some(name.to_string()),
            detail,
        });
        false
    }

    fn check_stack_import<'a>(
        &self,
        verdict: &mut Verdict,
        offset: usize,
        module: SimValue<'a>,
        symbol: SimValue<'a>,
    ) -> SimValue<'a> {
        match (module, symbol) {
            (SimValue::Str(module), SimValue::Str(symbol)) => {
                let name = QualifiedName::new(module, symbol);
                let allowed = self.check_import(verdict, Opcode::STACK_GLOBAL, offset, &name);
                SimValue::Global(name, allowed)
            }
            (module, symbol) => {
                let known = |v: SimValue<'_>| match v {
                    SimValue::Str(s) => Some(s.into_owned()),
                    _ => None,
                };
                let target = UnresolvedTarget {
                    offset,
                    module: known(module),
                    symbol: known(symbol),
                };
                verdict.push(Finding {
                    kind: FindingKind::UnresolvedTarget,
                    opcode: Some(Opcode::STACK_GLOBAL),
                    offset,
                    target: Some(target.describe()),
                    detail: format!(
                        "STACK_GLOBAL operands are not string literals ({})",
                        target.describe()
                    ),
                });
                verdict.push_unresolved(target);
                SimValue::Unresolved
            }
        }
    }

    fn check_callable(
        &self,
        verdict: &mut Verdict,
        op: Opcode,
        offset: usize,
        callable: &SimValue<'_>,
    ) {
        if self.tables.class_of(op) != OpcodeClass::Invoke {
            return;
        }
        match callable {
            SimValue::Global(_, _) | SimValue::Unresolved => {}
            SimValue::Str(_) | SimValue::Mark | SimValue::Unknown => {
                verdict.push(Finding {
                    kind: FindingKind::UnresolvedTarget,
                    opcode: Some(op),
                    offset,
                    target: None,
                    detail: format!("{op} target could not be determined"),
                });
                verdict.push_unresolved(UnresolvedTarget {
                    offset,
                    module: None,
                    symbol: None,
                });
            }
        }
    }
}

/// Analyze `data` with the given tables.
pub fn analyze_bytes(tables: &Tables, data: &[u8]) -> Verdict {
    Analyzer::new(tables).analyze_bytes(data)
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use classify::{AllowList, AllowRule, Opcode, Tables};
    use disasm::disassemble;

    use super::{Analyzer, Pass};
    use crate::{FindingKind, SimValue};

    fn analyze(data: &[u8]) -> crate::Verdict {
        Analyzer::new(&Tables::default()).analyze_bytes(data)
    }

    #[test]
    fn test_plain_values_are_safe() {
        // {'a': [1, 2]} at protocol 2
        let verdict = analyze(b"\x80\x02}q\x00X\x01\x00\x00\x00aq\x01]q\x02(K\x01K\x02es.");
        assert!(verdict.is_safe(), "{:?}", verdict.findings());
        assert_eq!(verdict.opcode_count(), 13);
        assert_eq!(verdict.protocol(), Some(2));
    }

    #[test]
    fn test_allowed_global_and_reduce() {
        // collections.OrderedDict() via GLOBAL + REDUCE
        let data = b"\x80\x02ccollections\nOrderedDict\nq\x00)Rq\x01X\x01\x00\x00\x00aq\x02K\x01s.";
        let verdict = analyze(data);
        assert!(verdict.is_safe(), "{:?}", verdict.findings());
        assert_eq!(verdict.imports(), ["collections.OrderedDict"]);
    }

    #[test]
    fn test_disallowed_global_reported_once() {
        let data = [
            0x80, 0x02, // PROTO 2
            b'c', b'o', b's', b'\n', b's', b'y', b's', b't', b'e', b'm', b'\n', // GLOBAL os system
            0x8c, 0x02, b'l', b's', // SHORT_BINUNICODE "ls"
            0x85, // TUPLE1
            b'R', // REDUCE
            b'.', // STOP
        ];
        let verdict = analyze(&data);
        assert!(!verdict.is_safe());
        assert_eq!(verdict.findings().len(), 1);
        let finding = &verdict.findings()[0];
        assert_eq!(finding.kind, FindingKind::DisallowedConstruction);
        assert_eq!(finding.offset, 2);
        assert_eq!(finding.target.as_deref(), Some("os.system"));
        assert_eq!(finding.opcode, Some(Opcode::GLOBAL));
    }

    #[test]
    fn test_stack_global_with_literals() {
        let data = [
            0x80, 0x04, // PROTO 4
            0x8c, 0x02, b'o', b's', // SHORT_BINUNICODE "os"
            0x94, // MEMOIZE
            0x8c, 0x06, b's', b'y', b's', b't', b'e', b'm', // SHORT_BINUNICODE "system"
            0x94, // MEMOIZE
            0x93, // STACK_GLOBAL
            0x29, // EMPTY_TUPLE
            b'R', // REDUCE
            b'.', // STOP
        ];
        let verdict = analyze(&data);
        assert_eq!(verdict.findings().len(), 1);
        assert_eq!(verdict.findings()[0].kind, FindingKind::DisallowedConstruction);
        assert_eq!(verdict.findings()[0].offset, 16);
    }

    #[test]
    fn test_stack_global_through_memo() {
        let data = [
            0x8c, 0x02, b'o', b's', // SHORT_BINUNICODE "os"
            b'q', 0x07, // BINPUT 7
            b'0', // POP
            0x8c, 0x06, b's', b'y', b's', b't', b'e', b'm', // SHORT_BINUNICODE "system"
            b'h', 0x07, // BINGET 7
            b'h', 0x07, // BINGET 7
            b'0', // POP
            b'0', // POP
            b'h', 0x07, // BINGET 7 -> "os"
            0x8c, 0x06, b's', b'y', b's', b't', b'e', b'm', // SHORT_BINUNICODE "system"
            0x93, // STACK_GLOBAL
            b'.', // STOP
        ];
        let verdict = analyze(&data);
        assert!(verdict.has(FindingKind::DisallowedConstruction));
        assert!(verdict.unresolved().is_empty());
    }

    #[test]
    fn test_memo_never_stored_is_unresolved() {
        let data = [
            b'h', 0x01, // BINGET 1 (never stored)
            0x8c, 0x06, b's', b'y', b's', b't', b'e', b'm', // SHORT_BINUNICODE "system"
            0x93, // STACK_GLOBAL
            b')', // EMPTY_TUPLE
            b'R', // REDUCE
            b'.', // STOP
        ];
        let verdict = analyze(&data);
        assert!(!verdict.is_safe());
        assert_eq!(verdict.findings().len(), 1, "{:?}", verdict.findings());
        assert_eq!(verdict.findings()[0].kind, FindingKind::UnresolvedTarget);
        assert_eq!(verdict.unresolved().len(), 1);
        assert_eq!(verdict.unresolved()[0].module, None);
        assert_eq!(verdict.unresolved()[0].symbol.as_deref(), Some("system"));
    }

    #[test]
    fn test_reduce_on_unknown_callable() {
        let data = [
            b']', // EMPTY_LIST
            b')', // EMPTY_TUPLE
            b'R', // REDUCE
            b'.', // STOP
        ];
        let verdict = analyze(&data);
        assert_eq!(verdict.findings().len(), 1);
        assert_eq!(verdict.findings()[0].kind, FindingKind::UnresolvedTarget);
        assert_eq!(verdict.findings()[0].offset, 2);
    }

    #[test]
    fn test_ext_opcode_always_dangerous() {
        let verdict = analyze(&[0x80, 0x02, 0x82, 0x01, b'.']);
        assert!(!verdict.is_safe());
        assert_eq!(verdict.findings()[0].kind, FindingKind::DangerousOpcode);
        assert_eq!(verdict.findings()[0].offset, 2);
    }

    #[test]
    fn test_obj_and_inst() {
        // INST builtins.dict with no args, then OBJ on an allowed GLOBAL
        let data = b"(ibuiltins\ndict\n0(cbuiltins\nlist\no.";
        let verdict = analyze(data);
        assert!(verdict.is_safe(), "{:?}", verdict.findings());

        let data = b"(ios\nsystem\n.";
        let verdict = analyze(data);
        assert!(verdict.has(FindingKind::DisallowedConstruction));
    }

    #[test]
    fn test_underflow_stops_pass() {
        let verdict = analyze(b"a.");
        assert_eq!(verdict.findings().len(), 1);
        assert_eq!(verdict.findings()[0].kind, FindingKind::MalformedStream);
        assert_eq!(verdict.opcode_count(), 1);
    }

    #[test]
    fn test_missing_mark() {
        let verdict = analyze(b"Nl.");
        assert!(verdict.has(FindingKind::MalformedStream));
    }

    #[test]
    fn test_truncated_is_malformed() {
        let verdict = analyze(&[0x80, 0x04, 0x8c, 0x05, b'a']);
        assert_eq!(verdict.findings().len(), 1);
        assert_eq!(verdict.findings()[0].kind, FindingKind::MalformedStream);
        assert_eq!(verdict.findings()[0].offset, 2);
    }

    #[test]
    fn test_prefix_rule_at_boundary() {
        let tables = Tables::new(AllowList::from_rules([AllowRule::Module("torch".into())]));
        let analyzer = Analyzer::new(&tables);

        let verdict = analyzer.analyze_bytes(b"ctorch.nn\nModule\n)R.");
        assert!(verdict.is_safe(), "{:?}", verdict.findings());

        let verdict = analyzer.analyze_bytes(b"ctorchvision\nmodels\n)R.");
        assert!(verdict.has(FindingKind::DisallowedConstruction));
    }

    #[test]
    fn test_escalated_opcode() {
        let tables = Tables::default().with_always_dangerous(Opcode::BUILD);
        let analyzer = Analyzer::new(&tables);
        let verdict = analyzer.analyze_bytes(b"}}b.");
        assert_eq!(verdict.findings().len(), 1);
        assert_eq!(verdict.findings()[0].kind, FindingKind::DangerousOpcode);
        assert!(Analyzer::new(&Tables::default()).analyze_bytes(b"}}b.").is_safe());
    }

    #[test]
    fn test_analyze_records_matches_bytes() {
        let data = b"cos\nsystem\n)R.";
        let records = disassemble(data).unwrap();
        let tables = Tables::default();
        let analyzer = Analyzer::new(&tables);
        assert_eq!(analyzer.analyze(&records), analyzer.analyze_bytes(data));
    }

    #[test]
    fn test_records_without_stop() {
        let records = disassemble(b"N.").unwrap();
        let tables = Tables::default();
        let verdict = Analyzer::new(&tables).analyze(&records[..1]);
        assert!(verdict.has(FindingKind::MalformedStream));
    }

    #[test]
    fn test_string_operands_borrow_input() {
        // SHORT_BINUNICODE "os", BINPUT 0, BINGET 0
        let data = b"\x8c\x02osq\x00h\x00.";
        let records = disassemble(data).unwrap();
        let tables = Tables::default();
        let analyzer = Analyzer::new(&tables);
        let mut pass = Pass::default();
        for record in records.iter().filter(|r| r.opcode != Opcode::STOP) {
            analyzer.step(&mut pass, record).unwrap();
        }
        assert_eq!(pass.stack.depth(), 2);
        let Ok(SimValue::Str(Cow::Borrowed(recalled))) = pass.stack.top() else {
            panic!("expected a borrowed string, got {:?}", pass.stack.top());
        };
        assert_eq!(*recalled, "os");
        assert!(data.as_ptr_range().contains(&recalled.as_ptr()));
    }
}
