//! Integration tests for disasm
//!
//! The fixtures below were produced by the reference pickler for the same
//! value, `{'a': [1, 2]}`, at different protocols. Each must decode to the
//! expected opcode sequence ending in `STOP`.

use classify::Opcode;
use disasm::{Argument, Disassembler, disassemble};
use proptest::prelude::*;

const DICT_PROTO0: &[u8] = b"(dp0\nVa\np1\n(lp2\nI1\naI2\nas.";
const DICT_PROTO2: &[u8] = b"\x80\x02}q\x00X\x01\x00\x00\x00aq\x01]q\x02(K\x01K\x02es.";
const DICT_PROTO4: &[u8] =
    b"\x80\x04\x95\x10\x00\x00\x00\x00\x00\x00\x00}\x94\x8c\x01a\x94]\x94(K\x01K\x02es.";
const ORDERED_DICT_PROTO4: &[u8] = b"\x80\x04\x95)\x00\x00\x00\x00\x00\x00\x00\x8c\x0bcollections\x94\x8c\x0bOrderedDict\x94\x93\x94)R\x94\x8c\x01a\x94K\x01s.";

fn opcodes(data: &[u8]) -> Vec<Opcode> {
    disassemble(data)
        .expect("decode failed")
        .into_iter()
        .map(|r| r.opcode)
        .collect()
}

#[test]
fn test_protocol_0() {
    use Opcode::*;
    assert_eq!(
        opcodes(DICT_PROTO0),
        [MARK, DICT, PUT, UNICODE, PUT, MARK, LIST, PUT, INT, APPEND, INT, APPEND, SETITEM, STOP]
    );
}

#[test]
fn test_protocol_2() {
    use Opcode::*;
    assert_eq!(
        opcodes(DICT_PROTO2),
        [
            PROTO, EMPTY_DICT, BINPUT, BINUNICODE, BINPUT, EMPTY_LIST, BINPUT, MARK, BININT1,
            BININT1, APPENDS, SETITEM, STOP
        ]
    );
}

#[test]
fn test_protocol_4() {
    use Opcode::*;
    let records = disassemble(DICT_PROTO4).expect("decode failed");
    let ops: Vec<_> = records.iter().map(|r| r.opcode).collect();
    assert_eq!(
        ops,
        [
            PROTO, FRAME, EMPTY_DICT, MEMOIZE, SHORT_BINUNICODE, MEMOIZE, EMPTY_LIST, MEMOIZE,
            MARK, BININT1, BININT1, APPENDS, SETITEM, STOP
        ]
    );
    assert_eq!(records[0].arg, Argument::Int(4));
    assert_eq!(records[1].arg, Argument::Int(16));
    assert_eq!(records[4].arg.as_str(), Some("a"));
    assert_eq!(records.last().map(|r| r.offset), Some(DICT_PROTO4.len() - 1));
}

#[test]
fn test_stack_global_operands() {
    let records = disassemble(ORDERED_DICT_PROTO4).expect("decode failed");
    let strings: Vec<_> = records.iter().filter_map(|r| r.arg.as_str()).collect();
    assert_eq!(strings, ["collections", "OrderedDict", "a"]);
    assert!(records.iter().any(|r| r.opcode == Opcode::STACK_GLOBAL));
    assert!(records.iter().any(|r| r.opcode == Opcode::REDUCE));
}

#[test]
fn test_every_prefix_fails_cleanly() {
    for fixture in [DICT_PROTO0, DICT_PROTO2, DICT_PROTO4, ORDERED_DICT_PROTO4] {
        for end in 0..fixture.len() {
            assert!(
                disassemble(&fixture[..end]).is_err(),
                "prefix of {end} bytes should not decode"
            );
        }
    }
}

#[test]
fn test_streaming_matches_collect() {
    let streamed: Vec<_> = Disassembler::new(DICT_PROTO4)
        .map(|r| r.expect("decode failed"))
        .collect();
    assert_eq!(streamed, disassemble(DICT_PROTO4).expect("decode failed"));
}

proptest! {
    #[test]
    fn test_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut dis = Disassembler::new(&data);
        let mut last_offset = None;
        for record in dis.by_ref() {
            match record {
                Ok(r) => {
                    prop_assert!(last_offset.is_none_or(|o| r.offset > o));
                    last_offset = Some(r.offset);
                }
                Err(e) => prop_assert!(e.offset() <= data.len()),
            }
        }
        prop_assert!(dis.position() <= data.len());
    }
}
