// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Protocol 4 writer for plain values

use classify::{Opcode, QualifiedName};
use num_bigint::BigInt;

use crate::{Object, RuntimeError, RuntimeResult, Value};

/// Items written per `APPENDS` / `SETITEMS` / `ADDITEMS` batch
const BATCH_SIZE: usize = 1000;

/// Serialize `value` as a protocol 4 stream.
///
/// No memo is written, so shared sub-values are duplicated. Objects are
/// written as a call of their class followed by their recorded state.
pub fn dumps(value: &Value) -> RuntimeResult<Vec<u8>> {
    let mut writer = Writer { out: Vec::new() };
    writer.op(Opcode::PROTO);
    writer.out.push(4);
    writer.value(value, 0)?;
    writer.op(Opcode::STOP);
    Ok(writer.out)
}

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn op(&mut self, opcode: Opcode) {
        self.out.push(opcode.code());
    }

    fn value(&mut self, value: &Value, depth: usize) -> RuntimeResult<()> {
        if depth > crate::heap::MAX_DEPTH {
            return Err(RuntimeError::Unpicklable {
                reason: "value is nested too deeply".into(),
            });
        }
        let depth = depth + 1;
        match value {
            Value::None => self.op(Opcode::NONE),
            Value::Bool(true) => self.op(Opcode::NEWTRUE),
            Value::Bool(false) => self.op(Opcode::NEWFALSE),
            Value::Int(i) => self.int(*i),
            Value::BigInt(i) => self.long(i),
            Value::Float(f) => {
                self.op(Opcode::BINFLOAT);
                self.out.extend_from_slice(&f.to_be_bytes());
            }
            Value::Str(s) => self.str(s),
            Value::Bytes(b) => self.bytes(b),
            Value::ByteArray(b) => {
                self.global(&QualifiedName::new("builtins", "bytearray"));
                self.bytes(b);
                self.op(Opcode::TUPLE1);
                self.op(Opcode::REDUCE);
            }
            Value::List(items) => {
                self.op(Opcode::EMPTY_LIST);
                self.batched(items, Opcode::APPENDS, depth)?;
            }
            Value::Tuple(items) => self.tuple(items, depth)?,
            Value::Dict(items) => {
                self.op(Opcode::EMPTY_DICT);
                self.batched_pairs(items, depth)?;
            }
            Value::Set(items) => {
                self.op(Opcode::EMPTY_SET);
                self.batched(items, Opcode::ADDITEMS, depth)?;
            }
            Value::FrozenSet(items) => {
                self.op(Opcode::MARK);
                for item in items {
                    self.value(item, depth)?;
                }
                self.op(Opcode::FROZENSET);
            }
            Value::Object(object) => self.object(object, depth)?,
            Value::Global(name) => self.global(name),
            Value::Persistent(pid) => {
                self.value(pid, depth)?;
                self.op(Opcode::BINPERSID);
            }
        }
        Ok(())
    }

    fn int(&mut self, i: i64) {
        match i {
            0..=0xff => {
                self.op(Opcode::BININT1);
                self.out.push(i as u8);
            }
            0x100..=0xffff => {
                self.op(Opcode::BININT2);
                self.out.extend_from_slice(&(i as u16).to_le_bytes());
            }
            _ => match i32::try_from(i) {
                Ok(small) => {
                    self.op(Opcode::BININT);
                    self.out.extend_from_slice(&small.to_le_bytes());
                }
                Err(_) => self.long(&BigInt::from(i)),
            },
        }
    }

    fn long(&mut self, i: &BigInt) {
        let bytes = i.to_signed_bytes_le();
        match u8::try_from(bytes.len()) {
            Ok(len) => {
                self.op(Opcode::LONG1);
                self.out.push(len);
            }
            Err(_) => {
                self.op(Opcode::LONG4);
                self.out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            }
        }
        self.out.extend_from_slice(&bytes);
    }

    fn str(&mut self, s: &str) {
        match s.len() {
            len @ 0..=0xff => {
                self.op(Opcode::SHORT_BINUNICODE);
                self.out.push(len as u8);
            }
            len => match u32::try_from(len) {
                Ok(len) => {
                    self.op(Opcode::BINUNICODE);
                    self.out.extend_from_slice(&len.to_le_bytes());
                }
                Err(_) => {
                    self.op(Opcode::BINUNICODE8);
                    self.out.extend_from_slice(&(len as u64).to_le_bytes());
                }
            },
        }
        self.out.extend_from_slice(s.as_bytes());
    }

    fn bytes(&mut self, b: &[u8]) {
        match b.len() {
            len @ 0..=0xff => {
                self.op(Opcode::SHORT_BINBYTES);
                self.out.push(len as u8);
            }
            len => match u32::try_from(len) {
                Ok(len) => {
                    self.op(Opcode::BINBYTES);
                    self.out.extend_from_slice(&len.to_le_bytes());
                }
                Err(_) => {
                    self.op(Opcode::BINBYTES8);
                    self.out.extend_from_slice(&(len as u64).to_le_bytes());
                }
            },
        }
        self.out.extend_from_slice(b);
    }

    fn global(&mut self, name: &QualifiedName) {
        self.str(name.module());
        self.str(name.symbol());
        self.op(Opcode::STACK_GLOBAL);
    }

    fn tuple(&mut self, items: &[Value], depth: usize) -> RuntimeResult<()> {
        let short = match items.len() {
            0 => {
                self.op(Opcode::EMPTY_TUPLE);
                return Ok(());
            }
            1 => Some(Opcode::TUPLE1),
            2 => Some(Opcode::TUPLE2),
            3 => Some(Opcode::TUPLE3),
            _ => None,
        };
        if short.is_none() {
            self.op(Opcode::MARK);
        }
        for item in items {
            self.value(item, depth)?;
        }
        self.op(short.unwrap_or(Opcode::TUPLE));
        Ok(())
    }

    fn batched(&mut self, items: &[Value], opcode: Opcode, depth: usize) -> RuntimeResult<()> {
        for chunk in items.chunks(BATCH_SIZE) {
            self.op(Opcode::MARK);
            for item in chunk {
                self.value(item, depth)?;
            }
            self.op(opcode);
        }
        Ok(())
    }

    fn batched_pairs(&mut self, items: &[(Value, Value)], depth: usize) -> RuntimeResult<()> {
        for chunk in items.chunks(BATCH_SIZE) {
            self.op(Opcode::MARK);
            for (key, value) in chunk {
                self.value(key, depth)?;
                self.value(value, depth)?;
            }
            self.op(Opcode::SETITEMS);
        }
        Ok(())
    }

    fn object(&mut self, object: &Object, depth: usize) -> RuntimeResult<()> {
        self.global(&object.class);
        self.tuple(&object.args, depth)?;
        if object.kwargs.is_empty() {
            self.op(Opcode::REDUCE);
        } else {
            self.op(Opcode::EMPTY_DICT);
            self.batched_pairs(&object.kwargs, depth)?;
            self.op(Opcode::NEWOBJ_EX);
        }
        self.batched(&object.list_items, Opcode::APPENDS, depth)?;
        self.batched_pairs(&object.dict_items, depth)?;
        if let Some(state) = &object.state {
            self.value(state, depth)?;
            self.op(Opcode::BUILD);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use classify::{Opcode, QualifiedName};
    use disasm::disassemble;
    use num_bigint::BigInt;

    use super::dumps;
    use crate::Value;

    fn opcodes(data: &[u8]) -> Vec<Opcode> {
        disassemble(data).unwrap().into_iter().map(|r| r.opcode).collect()
    }

    #[test]
    fn test_small_values() {
        assert_eq!(dumps(&Value::None).unwrap(), b"\x80\x04N.");
        assert_eq!(dumps(&Value::Int(1)).unwrap(), b"\x80\x04K\x01.");
        assert_eq!(dumps(&Value::Int(-1)).unwrap(), b"\x80\x04J\xff\xff\xff\xff.");
        assert_eq!(dumps(&"a".into()).unwrap(), b"\x80\x04\x8c\x01a.");
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(opcodes(&dumps(&Value::Int(300)).unwrap())[1], Opcode::BININT2);
        assert_eq!(opcodes(&dumps(&Value::Int(1 << 40)).unwrap())[1], Opcode::LONG1);
        let big = Value::BigInt(BigInt::from(1u8) << 3000usize);
        assert_eq!(opcodes(&dumps(&big).unwrap())[1], Opcode::LONG4);
    }

    #[test]
    fn test_dict_layout() {
        let value = Value::Dict(vec![("a".into(), 1.into())]);
        assert_eq!(dumps(&value).unwrap(), b"\x80\x04}(\x8c\x01aK\x01u.");
    }

    #[test]
    fn test_object_layout() {
        let mut object = crate::Object::new(QualifiedName::new("numpy", "dtype"));
        object.args = vec!["f8".into()];
        object.state = Some(Value::None);
        let ops = opcodes(&dumps(&Value::Object(Box::new(object))).unwrap());
        assert_eq!(
            ops,
            vec![
                Opcode::PROTO,
                Opcode::SHORT_BINUNICODE,
                Opcode::SHORT_BINUNICODE,
                Opcode::STACK_GLOBAL,
                Opcode::SHORT_BINUNICODE,
                Opcode::TUPLE1,
                Opcode::REDUCE,
                Opcode::NONE,
                Opcode::BUILD,
                Opcode::STOP,
            ]
        );
    }
}
