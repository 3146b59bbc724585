// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Object heap for one load
//!
//! Nodes live in an arena and refer to each other by [`ObjId`]. The stack and
//! the memo hold ids, so a container that is memoized first and filled later
//! is seen filled through every reference, the way the stream expects.
//!
//! Dicts and sets keep their entries in insertion order next to a hash index,
//! so every insert is a constant number of key comparisons. Keys compare the
//! way the stream's producer compared them: `True`, `1` and `1.0` are the
//! same key.
//!
//! The final graph is copied out into an owned [`Value`] tree. Shared
//! sub-graphs are duplicated; a graph that reaches itself is rejected.

use std::collections::HashMap;
use std::collections::hash_map::{Entry, RandomState};
use std::hash::{BuildHasher, Hash, Hasher};

use classify::QualifiedName;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use crate::{Object, RuntimeError, RuntimeResult, Symbol, Value};

/// Upper bound on nodes produced by materializing one graph
pub const DEFAULT_NODE_LIMIT: usize = 10_000_000;

/// Upper bound on nesting depth of a materialized value
pub const MAX_DEPTH: usize = 1_000;

/// Index of a node in the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(usize);

#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectNode {
    pub args: Vec<ObjId>,
    pub kwargs: Vec<(ObjId, ObjId)>,
    pub state: Option<ObjId>,
    pub list_items: Vec<ObjId>,
    pub dict_items: Vec<(ObjId, ObjId)>,
}

/// Positions of entries by key hash
///
/// Most hashes map to one entry; the rare collisions spill into `overflow`.
#[derive(Debug, Clone, Default)]
struct KeyIndex {
    slots: HashMap<u64, usize>,
    overflow: HashMap<u64, Vec<usize>>,
}

impl KeyIndex {
    fn candidates(&self, hash: u64) -> impl Iterator<Item = usize> + '_ {
        let spilled = self.overflow.get(&hash).into_iter().flatten();
        self.slots.get(&hash).into_iter().chain(spilled).copied()
    }

    fn insert(&mut self, hash: u64, position: usize) {
        match self.slots.entry(hash) {
            Entry::Vacant(slot) => {
                slot.insert(position);
            }
            Entry::Occupied(_) => self.overflow.entry(hash).or_default().push(position),
        }
    }
}

/// Insertion-ordered dict entries
#[derive(Debug, Clone, Default)]
pub(crate) struct DictNode {
    items: Vec<(ObjId, ObjId)>,
    index: KeyIndex,
    /// Class that built the dict, when instances of it carry attributes
    pub class: Option<QualifiedName>,
    /// Argument of `BUILD`, if any
    pub state: Option<ObjId>,
}

impl DictNode {
    /// An empty dict that accepts `BUILD`, like `collections.OrderedDict`.
    pub fn with_class(class: QualifiedName) -> Self {
        Self {
            class: Some(class),
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[(ObjId, ObjId)] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Insertion-ordered set members
#[derive(Debug, Clone, Default)]
pub(crate) struct SetNode {
    items: Vec<ObjId>,
    index: KeyIndex,
}

impl SetNode {
    pub fn items(&self) -> &[ObjId] {
        &self.items
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    List(Vec<ObjId>),
    Tuple(Vec<ObjId>),
    Dict(DictNode),
    Set(SetNode),
    FrozenSet(SetNode),
    Object(QualifiedName, ObjectNode),
    Global(QualifiedName, Symbol),
    Persistent(ObjId),
}

impl Node {
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::None => "None",
            Node::Bool(_) => "bool",
            Node::Int(_) | Node::BigInt(_) => "int",
            Node::Float(_) => "float",
            Node::Str(_) => "str",
            Node::Bytes(_) => "bytes",
            Node::ByteArray(_) => "bytearray",
            Node::List(_) => "list",
            Node::Tuple(_) => "tuple",
            Node::Dict(_) => "dict",
            Node::Set(_) => "set",
            Node::FrozenSet(_) => "frozenset",
            Node::Object(..) => "object",
            Node::Global(..) => "global",
            Node::Persistent(_) => "persistent",
        }
    }
}

/// A numeric key in the form it is compared in
#[derive(Debug, PartialEq)]
enum Numeric {
    Int(i64),
    /// Integers outside the `i64` range
    Big(BigInt),
    /// Floats with a fractional part, infinities and NaN
    Float(f64),
}

impl Numeric {
    fn of(node: &Node) -> Option<Self> {
        let numeric = match node {
            Node::Bool(b) => Numeric::Int(i64::from(*b)),
            Node::Int(i) => Numeric::Int(*i),
            Node::BigInt(i) => Numeric::integral(i.clone()),
            Node::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                match BigInt::from_f64(*f) {
                    Some(i) => Numeric::integral(i),
                    None => Numeric::Float(*f),
                }
            }
            Node::Float(f) => Numeric::Float(*f),
            _ => return None,
        };
        Some(numeric)
    }

    fn integral(i: BigInt) -> Self {
        match i.to_i64() {
            Some(small) => Numeric::Int(small),
            None => Numeric::Big(i),
        }
    }

    fn write_to<H: Hasher>(&self, state: &mut H) {
        match self {
            Numeric::Int(i) => (0u8, i).hash(state),
            Numeric::Big(i) => (1u8, i).hash(state),
            Numeric::Float(f) => (2u8, f.to_bits()).hash(state),
        }
    }
}

/// Arena of nodes for a single load
#[derive(Debug, Default)]
pub(crate) struct Heap {
    nodes: Vec<Node>,
    hasher: RandomState,
}

impl Heap {
    pub fn alloc(&mut self, node: Node) -> ObjId {
        self.nodes.push(node);
        ObjId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: ObjId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: ObjId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Copy an owned value into the heap.
    pub fn import(&mut self, value: Value) -> ObjId {
        let node = match value {
            Value::None => Node::None,
            Value::Bool(b) => Node::Bool(b),
            Value::Int(i) => Node::Int(i),
            Value::BigInt(i) => Node::BigInt(i),
            Value::Float(f) => Node::Float(f),
            Value::Str(s) => Node::Str(s),
            Value::Bytes(b) => Node::Bytes(b),
            Value::ByteArray(b) => Node::ByteArray(b),
            Value::List(items) => Node::List(self.import_all(items)),
            Value::Tuple(items) => Node::Tuple(self.import_all(items)),
            Value::Set(items) => Node::Set(self.import_set(items)),
            Value::FrozenSet(items) => Node::FrozenSet(self.import_set(items)),
            Value::Dict(items) => {
                let pairs = self.import_pairs(items);
                let mut dict = DictNode::default();
                for (key, value) in pairs {
                    self.dict_insert(&mut dict, key, value);
                }
                Node::Dict(dict)
            }
            Value::Object(object) => {
                let Object {
                    class,
                    args,
                    kwargs,
                    state,
                    list_items,
                    dict_items,
                } = *object;
                let node = ObjectNode {
                    args: self.import_all(args),
                    kwargs: self.import_pairs(kwargs),
                    state: state.map(|s| self.import(s)),
                    list_items: self.import_all(list_items),
                    dict_items: self.import_pairs(dict_items),
                };
                Node::Object(class, node)
            }
            Value::Global(name) => Node::Global(name, Symbol::Opaque),
            Value::Persistent(pid) => Node::Persistent(self.import(*pid)),
        };
        self.alloc(node)
    }

    fn import_all(&mut self, items: Vec<Value>) -> Vec<ObjId> {
        items.into_iter().map(|v| self.import(v)).collect()
    }

    fn import_pairs(&mut self, items: Vec<(Value, Value)>) -> Vec<(ObjId, ObjId)> {
        items
            .into_iter()
            .map(|(k, v)| (self.import(k), self.import(v)))
            .collect()
    }

    fn import_set(&mut self, items: Vec<Value>) -> SetNode {
        let members = self.import_all(items);
        let mut set = SetNode::default();
        for member in members {
            self.set_insert(&mut set, member);
        }
        set
    }

    /// Returns true if the node can be used as a dict key or set member.
    pub fn is_hashable(&self, id: ObjId) -> bool {
        self.hashable_within(id, MAX_DEPTH)
    }

    fn hashable_within(&self, id: ObjId, depth: usize) -> bool {
        let items = match self.get(id) {
            Node::List(_) | Node::Dict(_) | Node::Set(_) | Node::ByteArray(_) => return false,
            Node::Tuple(items) => items.as_slice(),
            Node::FrozenSet(set) => set.items(),
            _ => return true,
        };
        depth > 0 && items.iter().all(|&item| self.hashable_within(item, depth - 1))
    }

    /// Structural equality for key lookup.
    ///
    /// Only hashable nodes are compared; opaque objects compare by identity.
    pub fn key_eq(&self, a: ObjId, b: ObjId) -> bool {
        self.key_eq_within(a, b, MAX_DEPTH)
    }

    fn key_eq_within(&self, a: ObjId, b: ObjId, depth: usize) -> bool {
        if a == b {
            return true;
        }
        if depth == 0 {
            return false;
        }
        let (x, y) = (self.get(a), self.get(b));
        if let (Some(x), Some(y)) = (Numeric::of(x), Numeric::of(y)) {
            return x == y;
        }
        match (x, y) {
            (Node::None, Node::None) => true,
            (Node::Str(x), Node::Str(y)) => x == y,
            (Node::Bytes(x), Node::Bytes(y)) => x == y,
            (Node::Tuple(x), Node::Tuple(y)) => {
                x.len() == y.len()
                    && x.iter().zip(y).all(|(&p, &q)| self.key_eq_within(p, q, depth - 1))
            }
            (Node::FrozenSet(x), Node::FrozenSet(y)) => {
                x.items.len() == y.items.len()
                    && x.items.iter().all(|&p| {
                        y.items.iter().any(|&q| self.key_eq_within(p, q, depth - 1))
                    })
            }
            (Node::Global(x, _), Node::Global(y, _)) => x == y,
            _ => false,
        }
    }

    /// Hash consistent with [`Heap::key_eq`].
    pub fn key_hash(&self, id: ObjId) -> u64 {
        self.hash_within(id, MAX_DEPTH)
    }

    fn hash_within(&self, id: ObjId, depth: usize) -> u64 {
        let mut state = self.hasher.build_hasher();
        if depth == 0 {
            return state.finish();
        }
        let node = self.get(id);
        if let Some(numeric) = Numeric::of(node) {
            numeric.write_to(&mut state);
            return state.finish();
        }
        match node {
            Node::None => 3u8.hash(&mut state),
            Node::Str(s) => (4u8, s).hash(&mut state),
            Node::Bytes(b) => (5u8, b).hash(&mut state),
            Node::Tuple(items) => {
                (6u8, items.len()).hash(&mut state);
                for &item in items {
                    self.hash_within(item, depth - 1).hash(&mut state);
                }
            }
            Node::FrozenSet(set) => {
                // Member order must not matter
                let sum = set.items.iter().fold(0u64, |sum, &item| {
                    sum.wrapping_add(self.hash_within(item, depth - 1))
                });
                (7u8, set.items.len(), sum).hash(&mut state);
            }
            Node::Global(name, _) => (8u8, name).hash(&mut state),
            _ => (9u8, id).hash(&mut state),
        }
        state.finish()
    }

    /// Insert or replace `key`. A replaced entry keeps its original key.
    pub fn dict_insert(&self, dict: &mut DictNode, key: ObjId, value: ObjId) {
        let hash = self.key_hash(key);
        let found = dict
            .index
            .candidates(hash)
            .find(|&pos| self.key_eq(dict.items[pos].0, key));
        match found {
            Some(pos) => dict.items[pos].1 = value,
            None => {
                dict.index.insert(hash, dict.items.len());
                dict.items.push((key, value));
            }
        }
    }

    /// Insert `item` unless an equal member is already present.
    pub fn set_insert(&self, set: &mut SetNode, item: ObjId) {
        let hash = self.key_hash(item);
        if set
            .index
            .candidates(hash)
            .any(|pos| self.key_eq(set.items[pos], item))
        {
            return;
        }
        set.index.insert(hash, set.items.len());
        set.items.push(item);
    }

    /// Copy the graph reachable from `root` into an owned value.
    pub fn materialize(&self, root: ObjId, limit: usize) -> RuntimeResult<Value> {
        let mut walk = Walk {
            heap: self,
            on_path: vec![false; self.nodes.len()],
            produced: 0,
            depth: 0,
            limit,
        };
        walk.value(root)
    }
}

struct Walk<'h> {
    heap: &'h Heap,
    on_path: Vec<bool>,
    produced: usize,
    depth: usize,
    limit: usize,
}

impl Walk<'_> {
    fn value(&mut self, id: ObjId) -> RuntimeResult<Value> {
        if self.on_path[id.0] {
            return Err(RuntimeError::RecursiveGraph);
        }
        self.produced += 1;
        if self.produced > self.limit {
            return Err(RuntimeError::GraphTooLarge { limit: self.limit });
        }
        if self.depth >= MAX_DEPTH {
            return Err(RuntimeError::GraphTooDeep { limit: MAX_DEPTH });
        }

        self.depth += 1;
        self.on_path[id.0] = true;
        let heap = self.heap;
        let value = match heap.get(id) {
            Node::None => Value::None,
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(i) => Value::Int(*i),
            Node::BigInt(i) => Value::BigInt(i.clone()),
            Node::Float(f) => Value::Float(*f),
            Node::Str(s) => Value::Str(s.clone()),
            Node::Bytes(b) => Value::Bytes(b.clone()),
            Node::ByteArray(b) => Value::ByteArray(b.clone()),
            Node::List(items) => Value::List(self.values(items)?),
            Node::Tuple(items) => Value::Tuple(self.values(items)?),
            Node::Set(set) => Value::Set(self.values(set.items())?),
            Node::FrozenSet(set) => Value::FrozenSet(self.values(set.items())?),
            Node::Dict(dict) => self.dict(dict)?,
            Node::Object(class, node) => Value::Object(Box::new(Object {
                class: class.clone(),
                args: self.values(&node.args)?,
                kwargs: self.pairs(&node.kwargs)?,
                state: node.state.map(|s| self.value(s)).transpose()?,
                list_items: self.values(&node.list_items)?,
                dict_items: self.pairs(&node.dict_items)?,
            })),
            Node::Global(name, _) => Value::Global(name.clone()),
            Node::Persistent(pid) => Value::Persistent(Box::new(self.value(*pid)?)),
        };
        self.on_path[id.0] = false;
        self.depth -= 1;
        Ok(value)
    }

    fn values(&mut self, ids: &[ObjId]) -> RuntimeResult<Vec<Value>> {
        ids.iter().map(|&id| self.value(id)).collect()
    }

    /// A dict that received attributes stays an instance of its class so
    /// the attributes survive.
    fn dict(&mut self, dict: &DictNode) -> RuntimeResult<Value> {
        let (Some(class), Some(state)) = (&dict.class, dict.state) else {
            return Ok(Value::Dict(self.pairs(dict.items())?));
        };
        let mut object = Object::new(class.clone());
        object.dict_items = self.pairs(dict.items())?;
        object.state = Some(self.value(state)?);
        Ok(Value::Object(Box::new(object)))
    }

    fn pairs(&mut self, ids: &[(ObjId, ObjId)]) -> RuntimeResult<Vec<(Value, Value)>> {
        ids.iter()
            .map(|&(k, v)| Ok((self.value(k)?, self.value(v)?)))
            .collect()
    }
}
