// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Restricted interpreter
//!
//! Replays a stream opcode by opcode against a [`Heap`]. Every name the
//! stream imports goes through [`Unpickler::find_class`], which checks the
//! allow-list before the resolver ever sees the name. Opcodes the tables mark
//! as always dangerous abort the load before they are executed.

use std::collections::HashMap;

use classify::{Opcode, QualifiedName, Tables};
use disasm::{Argument, DecodeError, Disassembler, LongArg, OpcodeRecord};
use num_bigint::BigInt;
use tracing::{debug, warn};

use crate::{
    Resolver, RuntimeError, RuntimeResult, Symbol, Value, builtins,
    heap::{DEFAULT_NODE_LIMIT, DictNode, Heap, Node, ObjId, ObjectNode, SetNode},
};

/// Longest decimal integer literal accepted, in digits
const MAX_DECIMAL_DIGITS: usize = 4300;

/// Restricted deserializer bound to one set of tables and one resolver
///
/// Holds no per-load state; a single instance can serve concurrent loads.
pub struct Unpickler<'t> {
    tables: &'t Tables,
    resolver: &'t dyn Resolver,
    node_limit: usize,
}

impl<'t> Unpickler<'t> {
    pub fn new(tables: &'t Tables, resolver: &'t dyn Resolver) -> Self {
        Self {
            tables,
            resolver,
            node_limit: DEFAULT_NODE_LIMIT,
        }
    }

    /// Cap the number of nodes the materialized result may contain.
    pub fn with_node_limit(mut self, node_limit: usize) -> Self {
        self.node_limit = node_limit;
        self
    }

    /// Resolve a name the stream wants to import.
    ///
    /// Names outside the allow-list are rejected here and never reach the
    /// resolver.
    pub fn find_class(&self, name: &QualifiedName, offset: usize) -> RuntimeResult<Symbol> {
        if !self.tables.is_allowed(name) {
            warn!(%name, offset, "rejected construction target");
            return Err(RuntimeError::DisallowedConstruction {
                name: name.clone(),
                offset,
            });
        }
        let symbol = self.resolver.resolve(name).map_err(|e| match e {
            RuntimeError::Unresolvable { name, reason, .. } => RuntimeError::Unresolvable {
                name,
                offset,
                reason,
            },
            other => other,
        })?;
        debug!(%name, offset, ?symbol, "resolved");
        Ok(symbol)
    }

    /// Replay `data` and return the value it builds.
    pub fn load(&self, data: &[u8]) -> RuntimeResult<Value> {
        let mut machine = Machine::new(self);
        for record in Disassembler::new(data) {
            if let Some(root) = machine.step(&record?)? {
                return machine.heap.materialize(root, self.node_limit);
            }
        }
        Err(DecodeError::MissingStop { offset: data.len() }.into())
    }
}

/// Opcode and offset of the instruction being executed
#[derive(Debug, Clone, Copy)]
struct Site {
    opcode: Opcode,
    offset: usize,
}

impl Site {
    fn underflow(self) -> RuntimeError {
        RuntimeError::StackUnderflow {
            opcode: self.opcode,
            offset: self.offset,
        }
    }

    fn mismatch(self, expected: &'static str, found: &'static str) -> RuntimeError {
        RuntimeError::TypeMismatch {
            opcode: self.opcode,
            offset: self.offset,
            expected,
            found,
        }
    }

    fn invalid(self, reason: impl Into<String>) -> RuntimeError {
        RuntimeError::InvalidLiteral {
            offset: self.offset,
            reason: reason.into(),
        }
    }
}

/// Per-load interpreter state
struct Machine<'u, 't> {
    unpickler: &'u Unpickler<'t>,
    heap: Heap,
    stack: Vec<ObjId>,
    /// Stack heights recorded by `MARK`
    marks: Vec<usize>,
    memo: HashMap<i64, ObjId>,
    site: Site,
}

impl<'u, 't> Machine<'u, 't> {
    fn new(unpickler: &'u Unpickler<'t>) -> Self {
        Self {
            unpickler,
            heap: Heap::default(),
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            site: Site {
                opcode: Opcode::STOP,
                offset: 0,
            },
        }
    }

    /// Execute one record. Returns the root once `STOP` is reached.
    fn step(&mut self, record: &OpcodeRecord<'_>) -> RuntimeResult<Option<ObjId>> {
        let site = Site {
            opcode: record.opcode,
            offset: record.offset,
        };
        self.site = site;

        if self.unpickler.tables.is_always_dangerous(record.opcode) {
            warn!(opcode = %record.opcode, offset = record.offset, "rejected opcode");
            return Err(RuntimeError::DisallowedOpcode {
                opcode: record.opcode,
                offset: record.offset,
            });
        }

        match record.opcode {
            Opcode::PROTO | Opcode::FRAME => {}
            Opcode::STOP => return self.pop().map(Some),

            // Stack shaping
            Opcode::MARK => self.marks.push(self.stack.len()),
            Opcode::POP => {
                if self.stack.len() > self.base() {
                    self.stack.pop();
                } else if self.marks.pop().is_none() {
                    return Err(site.underflow());
                }
            }
            Opcode::POP_MARK => {
                self.pop_mark()?;
            }
            Opcode::DUP => {
                let top = self.top()?;
                self.stack.push(top);
            }

            // Literals
            Opcode::NONE => self.push(Node::None),
            Opcode::NEWTRUE => self.push(Node::Bool(true)),
            Opcode::NEWFALSE => self.push(Node::Bool(false)),
            Opcode::INT
            | Opcode::BININT
            | Opcode::BININT1
            | Opcode::BININT2
            | Opcode::LONG
            | Opcode::LONG1
            | Opcode::LONG4
            | Opcode::FLOAT
            | Opcode::BINFLOAT
            | Opcode::STRING
            | Opcode::BINSTRING
            | Opcode::SHORT_BINSTRING
            | Opcode::UNICODE
            | Opcode::BINUNICODE
            | Opcode::SHORT_BINUNICODE
            | Opcode::BINUNICODE8
            | Opcode::BINBYTES
            | Opcode::SHORT_BINBYTES
            | Opcode::BINBYTES8 => {
                let node = literal(site, &record.arg)?;
                self.push(node);
            }
            Opcode::BYTEARRAY8 => match &record.arg {
                Argument::Bytes(b) => self.push(Node::ByteArray(b.to_vec())),
                _ => return Err(site.invalid("expected a byte payload")),
            },

            // Containers
            Opcode::EMPTY_LIST => self.push(Node::List(Vec::new())),
            Opcode::EMPTY_TUPLE => self.push(Node::Tuple(Vec::new())),
            Opcode::EMPTY_DICT => self.push(Node::Dict(DictNode::default())),
            Opcode::EMPTY_SET => self.push(Node::Set(SetNode::default())),
            Opcode::LIST => {
                let items = self.pop_mark()?;
                self.push(Node::List(items));
            }
            Opcode::TUPLE => {
                let items = self.pop_mark()?;
                self.push(Node::Tuple(items));
            }
            Opcode::TUPLE1 | Opcode::TUPLE2 | Opcode::TUPLE3 => {
                let n = match record.opcode {
                    Opcode::TUPLE1 => 1,
                    Opcode::TUPLE2 => 2,
                    _ => 3,
                };
                let items = self.pop_n(n)?;
                self.push(Node::Tuple(items));
            }
            Opcode::DICT => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                let mut dict = DictNode::default();
                for (key, value) in pairs {
                    self.heap.dict_insert(&mut dict, key, value);
                }
                self.push(Node::Dict(dict));
            }
            Opcode::FROZENSET => {
                let items = self.pop_mark()?;
                let mut set = SetNode::default();
                for item in items {
                    self.require_hashable(item)?;
                    self.heap.set_insert(&mut set, item);
                }
                self.push(Node::FrozenSet(set));
            }
            Opcode::APPEND => {
                let value = self.pop()?;
                let target = self.top()?;
                self.append(target, vec![value])?;
            }
            Opcode::APPENDS => {
                let items = self.pop_mark()?;
                let target = self.top()?;
                self.append(target, items)?;
            }
            Opcode::SETITEM => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.require_hashable(key)?;
                let target = self.top()?;
                self.set_items(target, vec![(key, value)])?;
            }
            Opcode::SETITEMS => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                let target = self.top()?;
                self.set_items(target, pairs)?;
            }
            Opcode::ADDITEMS => {
                let items = self.pop_mark()?;
                let target = self.top()?;
                self.add_items(target, items)?;
            }
            Opcode::BUILD => {
                let state = self.pop()?;
                let target = self.top()?;
                match self.heap.get_mut(target) {
                    Node::Object(_, node) => node.state = Some(state),
                    Node::Dict(dict) if dict.class.is_some() => dict.state = Some(state),
                    other => return Err(site.mismatch("object", other.type_name())),
                }
            }

            // Memo
            Opcode::PUT | Opcode::BINPUT | Opcode::LONG_BINPUT => {
                let index = memo_index(site, &record.arg)?;
                let top = self.top()?;
                self.memo.insert(index, top);
            }
            Opcode::MEMOIZE => {
                let top = self.top()?;
                let index =
                    i64::try_from(self.memo.len()).map_err(|_| site.invalid("memo is full"))?;
                self.memo.insert(index, top);
            }
            Opcode::GET | Opcode::BINGET | Opcode::LONG_BINGET => {
                let index = memo_index(site, &record.arg)?;
                let id = *self.memo.get(&index).ok_or(RuntimeError::MemoMissing {
                    index,
                    offset: site.offset,
                })?;
                self.stack.push(id);
            }

            // Persistent ids
            Opcode::PERSID => {
                let pid = match &record.arg {
                    Argument::Str(s) => Value::Str(s.to_string()),
                    _ => return Err(site.invalid("expected a persistent id")),
                };
                self.persistent(pid)?;
            }
            Opcode::BINPERSID => {
                let id = self.pop()?;
                let pid = self.heap.materialize(id, self.unpickler.node_limit)?;
                self.persistent(pid)?;
            }

            // Construction
            Opcode::GLOBAL => {
                let name = qualified_name(site, &record.arg)?;
                let symbol = self.unpickler.find_class(&name, site.offset)?;
                self.push(Node::Global(name, symbol));
            }
            Opcode::STACK_GLOBAL => {
                let symbol = self.pop()?;
                let module = self.pop()?;
                let name = match (self.heap.get(module), self.heap.get(symbol)) {
                    (Node::Str(module), Node::Str(symbol)) => {
                        QualifiedName::new(module.as_str(), symbol.as_str())
                    }
                    (Node::Str(_), other) | (other, _) => {
                        return Err(site.mismatch("str", other.type_name()));
                    }
                };
                let symbol = self.unpickler.find_class(&name, site.offset)?;
                self.push(Node::Global(name, symbol));
            }
            Opcode::INST => {
                let name = qualified_name(site, &record.arg)?;
                let symbol = self.unpickler.find_class(&name, site.offset)?;
                let args = self.pop_mark()?;
                let class = self.heap.alloc(Node::Global(name, symbol));
                let id = self.call(class, args, Vec::new())?;
                self.stack.push(id);
            }
            Opcode::OBJ => {
                let mut items = self.pop_mark()?.into_iter();
                let class = items.next().ok_or_else(|| site.underflow())?;
                let id = self.call(class, items.collect(), Vec::new())?;
                self.stack.push(id);
            }
            Opcode::REDUCE | Opcode::NEWOBJ => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let args = self.tuple_items(args)?;
                let id = self.call(callable, args, Vec::new())?;
                self.stack.push(id);
            }
            Opcode::NEWOBJ_EX => {
                let kwargs = self.pop()?;
                let args = self.pop()?;
                let class = self.pop()?;
                let args = self.tuple_items(args)?;
                let kwargs = match self.heap.get(kwargs) {
                    Node::Dict(dict) => dict.items().to_vec(),
                    other => return Err(site.mismatch("dict", other.type_name())),
                };
                let id = self.call(class, args, kwargs)?;
                self.stack.push(id);
            }
            Opcode::EXT1 | Opcode::EXT2 | Opcode::EXT4 => {
                return Err(RuntimeError::DisallowedOpcode {
                    opcode: site.opcode,
                    offset: site.offset,
                });
            }

            // Out-of-band buffers
            Opcode::NEXT_BUFFER => {
                return Err(RuntimeError::UnsupportedBuffer {
                    offset: site.offset,
                });
            }
            Opcode::READONLY_BUFFER => {
                self.top()?;
            }
        }
        Ok(None)
    }

    /// Stack height at the innermost mark.
    fn base(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    fn push(&mut self, node: Node) {
        let id = self.heap.alloc(node);
        self.stack.push(id);
    }

    /// Pop one item. Never crosses a mark.
    fn pop(&mut self) -> RuntimeResult<ObjId> {
        if self.stack.len() <= self.base() {
            return Err(self.site.underflow());
        }
        self.stack.pop().ok_or_else(|| self.site.underflow())
    }

    fn top(&self) -> RuntimeResult<ObjId> {
        if self.stack.len() <= self.base() {
            return Err(self.site.underflow());
        }
        self.stack.last().copied().ok_or_else(|| self.site.underflow())
    }

    fn pop_n(&mut self, n: usize) -> RuntimeResult<Vec<ObjId>> {
        if self.stack.len() < self.base() + n {
            return Err(self.site.underflow());
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    /// Pop everything above the innermost mark, and the mark.
    fn pop_mark(&mut self) -> RuntimeResult<Vec<ObjId>> {
        let mark = self.marks.pop().ok_or(RuntimeError::MissingMark {
            opcode: self.site.opcode,
            offset: self.site.offset,
        })?;
        Ok(self.stack.split_off(mark))
    }

    fn require_hashable(&self, id: ObjId) -> RuntimeResult<()> {
        if self.heap.is_hashable(id) {
            Ok(())
        } else {
            Err(self.site.mismatch("hashable value", self.heap.get(id).type_name()))
        }
    }

    /// Group a flat run of items into hashable-key pairs.
    fn pairs(&self, items: Vec<ObjId>) -> RuntimeResult<Vec<(ObjId, ObjId)>> {
        if items.len() % 2 != 0 {
            return Err(self.site.mismatch("key-value pairs", "odd number of items"));
        }
        let pairs: Vec<_> = items.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect();
        for &(key, _) in &pairs {
            self.require_hashable(key)?;
        }
        Ok(pairs)
    }

    fn tuple_items(&self, id: ObjId) -> RuntimeResult<Vec<ObjId>> {
        match self.heap.get(id) {
            Node::Tuple(items) => Ok(items.clone()),
            other => Err(self.site.mismatch("tuple", other.type_name())),
        }
    }

    fn append(&mut self, target: ObjId, items: Vec<ObjId>) -> RuntimeResult<()> {
        let site = self.site;
        match self.heap.get_mut(target) {
            Node::List(list) => list.extend(items),
            Node::Object(_, node) => node.list_items.extend(items),
            other => return Err(site.mismatch("list", other.type_name())),
        }
        Ok(())
    }

    fn set_items(&mut self, target: ObjId, pairs: Vec<(ObjId, ObjId)>) -> RuntimeResult<()> {
        let site = self.site;
        let mut dict = match self.heap.get_mut(target) {
            Node::Dict(dict) => std::mem::take(dict),
            Node::Object(_, node) => {
                node.dict_items.extend(pairs);
                return Ok(());
            }
            other => return Err(site.mismatch("dict", other.type_name())),
        };
        for (key, value) in pairs {
            self.heap.dict_insert(&mut dict, key, value);
        }
        if let Node::Dict(slot) = self.heap.get_mut(target) {
            *slot = dict;
        }
        Ok(())
    }

    fn add_items(&mut self, target: ObjId, items: Vec<ObjId>) -> RuntimeResult<()> {
        let site = self.site;
        let mut set = match self.heap.get_mut(target) {
            Node::Set(set) => std::mem::take(set),
            Node::Object(_, node) => {
                node.list_items.extend(items);
                return Ok(());
            }
            other => return Err(site.mismatch("set", other.type_name())),
        };
        let mut result = Ok(());
        for item in items {
            if let Err(e) = self.require_hashable(item) {
                result = Err(e);
                break;
            }
            self.heap.set_insert(&mut set, item);
        }
        if let Node::Set(slot) = self.heap.get_mut(target) {
            *slot = set;
        }
        result
    }

    fn persistent(&mut self, pid: Value) -> RuntimeResult<()> {
        let value = self.unpickler.resolver.persistent_load(pid)?;
        let id = self.heap.import(value);
        self.stack.push(id);
        Ok(())
    }

    /// Invoke a resolved callable.
    fn call(
        &mut self,
        callable: ObjId,
        args: Vec<ObjId>,
        kwargs: Vec<(ObjId, ObjId)>,
    ) -> RuntimeResult<ObjId> {
        let site = self.site;
        let (name, symbol) = match self.heap.get(callable) {
            Node::Global(name, symbol) => (name.clone(), *symbol),
            other => {
                return Err(RuntimeError::NotCallable {
                    opcode: site.opcode,
                    offset: site.offset,
                    found: other.type_name(),
                });
            }
        };
        // Globals can also arrive through a persistent load.
        if !self.unpickler.tables.is_allowed(&name) {
            warn!(%name, offset = site.offset, "rejected construction target");
            return Err(RuntimeError::DisallowedConstruction {
                name,
                offset: site.offset,
            });
        }

        let node = match symbol {
            Symbol::Builtin(builtin) => builtins::construct(&self.heap, builtin, &args, &kwargs)
                .map_err(|reason| RuntimeError::Construction {
                    name: name.clone(),
                    offset: site.offset,
                    reason,
                })?,
            Symbol::Opaque => Node::Object(
                name,
                ObjectNode {
                    args,
                    kwargs,
                    ..Default::default()
                },
            ),
        };
        Ok(self.heap.alloc(node))
    }
}

fn literal(site: Site, arg: &Argument<'_>) -> RuntimeResult<Node> {
    let node = match arg {
        Argument::Bool(b) => Node::Bool(*b),
        Argument::Int(i) => Node::Int(*i),
        Argument::Long(long) => builtins::int_node(big_int(site, long)?),
        Argument::Float(f) => Node::Float(*f),
        Argument::Str(s) => Node::Str(s.to_string()),
        Argument::Bytes(b) => Node::Bytes(b.to_vec()),
        Argument::None | Argument::Name { .. } => return Err(site.invalid("missing literal")),
    };
    Ok(node)
}

fn big_int(site: Site, arg: &LongArg<'_>) -> RuntimeResult<BigInt> {
    match arg {
        LongArg::Decimal(text) => {
            let digits = text.trim_start_matches(['+', '-']).len();
            if digits > MAX_DECIMAL_DIGITS {
                return Err(site.invalid(format!("integer literal has {digits} digits")));
            }
            text.parse::<BigInt>().map_err(|e| site.invalid(e.to_string()))
        }
        LongArg::TwosComplement(bytes) => Ok(BigInt::from_signed_bytes_le(bytes)),
    }
}

fn memo_index(site: Site, arg: &Argument<'_>) -> RuntimeResult<i64> {
    arg.as_int().ok_or_else(|| site.invalid("expected a memo index"))
}

fn qualified_name(site: Site, arg: &Argument<'_>) -> RuntimeResult<QualifiedName> {
    arg.qualified_name().ok_or_else(|| site.invalid("expected a module and symbol"))
}
