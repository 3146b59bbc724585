// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Native constructors for builtin types

use classify::QualifiedName;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive, Zero};

use crate::{
    Builtin,
    heap::{DictNode, Heap, Node, ObjId, SetNode},
};

/// Normalize an integer: `Int` when it fits in an `i64`.
pub(crate) fn int_node(value: BigInt) -> Node {
    match value.to_i64() {
        Some(i) => Node::Int(i),
        None => Node::BigInt(value),
    }
}

/// Build the node produced by calling `builtin` with the given arguments.
///
/// Errors carry a reason only; the caller knows the name and offset.
pub(crate) fn construct(
    heap: &Heap,
    builtin: Builtin,
    args: &[ObjId],
    kwargs: &[(ObjId, ObjId)],
) -> Result<Node, String> {
    if !kwargs.is_empty() && !matches!(builtin, Builtin::Dict | Builtin::OrderedDict) {
        return Err("keyword arguments are not supported".into());
    }

    match builtin {
        Builtin::List => Ok(Node::List(optional_items(heap, args, 1)?)),
        Builtin::Tuple => Ok(Node::Tuple(optional_items(heap, args, 1)?)),
        Builtin::Deque => {
            // deque(iterable, maxlen); the bound is not kept
            Ok(Node::List(optional_items(heap, args, 2)?))
        }
        Builtin::Set => unique(heap, optional_items(heap, args, 1)?).map(Node::Set),
        Builtin::FrozenSet => unique(heap, optional_items(heap, args, 1)?).map(Node::FrozenSet),
        Builtin::Dict | Builtin::OrderedDict => {
            let mut items = match args {
                [] => Vec::new(),
                [source] => pairs_of(heap, *source)?,
                _ => return Err(arity(1, args.len())),
            };
            items.extend_from_slice(kwargs);
            let mut out = match builtin {
                Builtin::OrderedDict => {
                    DictNode::with_class(QualifiedName::new("collections", "OrderedDict"))
                }
                _ => DictNode::default(),
            };
            for (key, value) in items {
                if !heap.is_hashable(key) {
                    return Err(format!("unhashable key of type {}", heap.get(key).type_name()));
                }
                heap.dict_insert(&mut out, key, value);
            }
            Ok(Node::Dict(out))
        }
        Builtin::Str => match args {
            [] => Ok(Node::Str(String::new())),
            [arg] => to_str(heap.get(*arg)).map(Node::Str),
            _ => Err(arity(1, args.len())),
        },
        Builtin::Int => match args {
            [] => Ok(Node::Int(0)),
            [arg] => to_int(heap.get(*arg), 10),
            [arg, base] => match heap.get(*base) {
                Node::Int(base @ 2..=36) => to_int(heap.get(*arg), *base as u32),
                other => Err(format!("invalid base {}", other.type_name())),
            },
            _ => Err(arity(2, args.len())),
        },
        Builtin::Float => match args {
            [] => Ok(Node::Float(0.0)),
            [arg] => to_float(heap.get(*arg)).map(Node::Float),
            _ => Err(arity(1, args.len())),
        },
        Builtin::Bool => match args {
            [] => Ok(Node::Bool(false)),
            [arg] => Ok(Node::Bool(truthy(heap.get(*arg)))),
            _ => Err(arity(1, args.len())),
        },
        Builtin::Bytes => to_bytes(heap, args).map(Node::Bytes),
        Builtin::ByteArray => to_bytes(heap, args).map(Node::ByteArray),
    }
}

fn arity(max: usize, found: usize) -> String {
    format!("expected at most {max} arguments, got {found}")
}

/// Items of an optional iterable first argument.
fn optional_items(heap: &Heap, args: &[ObjId], max: usize) -> Result<Vec<ObjId>, String> {
    if args.len() > max {
        return Err(arity(max, args.len()));
    }
    match args.first() {
        None => Ok(Vec::new()),
        Some(&source) => items_of(heap, source),
    }
}

fn items_of(heap: &Heap, id: ObjId) -> Result<Vec<ObjId>, String> {
    match heap.get(id) {
        Node::List(items) | Node::Tuple(items) => Ok(items.clone()),
        Node::Set(set) | Node::FrozenSet(set) => Ok(set.items().to_vec()),
        Node::Dict(dict) => Ok(dict.items().iter().map(|&(k, _)| k).collect()),
        other => Err(format!("{} is not iterable", other.type_name())),
    }
}

fn pairs_of(heap: &Heap, id: ObjId) -> Result<Vec<(ObjId, ObjId)>, String> {
    if let Node::Dict(dict) = heap.get(id) {
        return Ok(dict.items().to_vec());
    }
    items_of(heap, id)?
        .into_iter()
        .map(|item| match heap.get(item) {
            Node::Tuple(pair) | Node::List(pair) if pair.len() == 2 => Ok((pair[0], pair[1])),
            other => Err(format!("expected a key-value pair, found {}", other.type_name())),
        })
        .collect()
}

fn unique(heap: &Heap, items: Vec<ObjId>) -> Result<SetNode, String> {
    let mut out = SetNode::default();
    for item in items {
        if !heap.is_hashable(item) {
            return Err(format!("unhashable member of type {}", heap.get(item).type_name()));
        }
        heap.set_insert(&mut out, item);
    }
    Ok(out)
}

fn to_str(node: &Node) -> Result<String, String> {
    match node {
        Node::Str(s) => Ok(s.clone()),
        Node::None => Ok("None".into()),
        Node::Bool(true) => Ok("True".into()),
        Node::Bool(false) => Ok("False".into()),
        Node::Int(i) => Ok(i.to_string()),
        Node::BigInt(i) => Ok(i.to_string()),
        other => Err(format!("cannot convert {} to str", other.type_name())),
    }
}

fn to_int(node: &Node, radix: u32) -> Result<Node, String> {
    match node {
        Node::Int(i) if radix == 10 => Ok(Node::Int(*i)),
        Node::BigInt(i) if radix == 10 => Ok(Node::BigInt(i.clone())),
        Node::Bool(b) if radix == 10 => Ok(Node::Int(i64::from(*b))),
        Node::Float(f) if radix == 10 && f.is_finite() => {
            BigInt::from_f64(f.trunc())
                .map(int_node)
                .ok_or_else(|| format!("cannot convert {f} to int"))
        }
        Node::Str(s) => {
            let text = s.trim().replace('_', "");
            BigInt::parse_bytes(text.as_bytes(), radix)
                .map(int_node)
                .ok_or_else(|| format!("invalid literal for int(): {s:?}"))
        }
        other => Err(format!("cannot convert {} to int", other.type_name())),
    }
}

fn to_float(node: &Node) -> Result<f64, String> {
    match node {
        Node::Float(f) => Ok(*f),
        Node::Int(i) => Ok(*i as f64),
        Node::BigInt(i) => i.to_f64().ok_or_else(|| "int too large to convert to float".into()),
        Node::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Node::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("could not convert string to float: {s:?}")),
        other => Err(format!("cannot convert {} to float", other.type_name())),
    }
}

fn truthy(node: &Node) -> bool {
    match node {
        Node::None => false,
        Node::Bool(b) => *b,
        Node::Int(i) => *i != 0,
        Node::BigInt(i) => !i.is_zero(),
        Node::Float(f) => *f != 0.0,
        Node::Str(s) => !s.is_empty(),
        Node::Bytes(b) | Node::ByteArray(b) => !b.is_empty(),
        Node::List(items) | Node::Tuple(items) => !items.is_empty(),
        Node::Set(set) | Node::FrozenSet(set) => !set.items().is_empty(),
        Node::Dict(dict) => !dict.is_empty(),
        Node::Object(..) | Node::Global(..) | Node::Persistent(_) => true,
    }
}

/// `bytes(...)` / `bytearray(...)`, including the `(text, 'latin-1')` form
/// written by protocols below 3.
fn to_bytes(heap: &Heap, args: &[ObjId]) -> Result<Vec<u8>, String> {
    match args {
        [] => Ok(Vec::new()),
        [source] => match heap.get(*source) {
            Node::Bytes(b) | Node::ByteArray(b) => Ok(b.clone()),
            Node::List(items) | Node::Tuple(items) => items
                .iter()
                .map(|&item| match heap.get(item) {
                    Node::Int(i) => u8::try_from(*i).map_err(|_| format!("byte {i} out of range")),
                    other => Err(format!("expected int, found {}", other.type_name())),
                })
                .collect(),
            other => Err(format!("cannot convert {} to bytes", other.type_name())),
        },
        [text, encoding] => {
            let (Node::Str(text), Node::Str(encoding)) = (heap.get(*text), heap.get(*encoding))
            else {
                return Err("expected a string and an encoding".into());
            };
            encode(text, encoding)
        }
        _ => Err(arity(2, args.len())),
    }
}

fn encode(text: &str, encoding: &str) -> Result<Vec<u8>, String> {
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => Ok(text.as_bytes().to_vec()),
        "latin-1" | "latin1" | "iso-8859-1" => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).map_err(|_| format!("{c:?} is not latin-1")))
            .collect(),
        "ascii" => text
            .chars()
            .map(|c| if c.is_ascii() { Ok(c as u8) } else { Err(format!("{c:?} is not ascii")) })
            .collect(),
        other => Err(format!("unsupported encoding {other}")),
    }
}
