//! Integration tests for the runtime crate
//!
//! Streams are either produced by the reference pickler or by [`dumps`], and
//! loaded through the public [`Unpickler`] API.

use std::sync::Mutex;

use classify::{AllowList, ErrorKind, QualifiedName, Tables};
use num_bigint::BigInt;
use proptest::prelude::*;
use runtime::{
    DefaultResolver, Resolver, RuntimeError, RuntimeResult, Symbol, Unpickler, Value, dumps,
};

/// `OrderedDict([('a', 1), ('b', [2, 3])])` at protocol 4
const ORDERED_DICT: &[u8] = b"\x80\x04\x956\x00\x00\x00\x00\x00\x00\x00\x8c\x0bcollections\x94\x8c\x0bOrderedDict\x94\x93\x94)R\x94(\x8c\x01a\x94K\x01\x8c\x01b\x94]\x94(K\x02K\x03eu.";

/// A mapping of mixed scalars and containers at protocol 5
const MIXED_MAPPING: &[u8] = b"\x80\x05\x95s\x00\x00\x00\x00\x00\x00\x00}\x94(\x8c\x04name\x94\x8c\x01w\x94\x8c\x05shape\x94K\x02K\x03\x86\x94\x8c\x05flags\x94\x8f\x94(K\x01K\x02\x90\x8c\x01f\x94(K\x03\x91\x94\x8c\x03big\x94\x8a\t\x00\x00\x00\x00\x00\x00\x00\x00@\x8c\x03neg\x94J\xf9\xff\xff\xff\x8c\x01x\x94G?\xf8\x00\x00\x00\x00\x00\x00\x8c\x01b\x94C\x02\x00\x01\x94\x8c\x01n\x94N\x8c\x01t\x94\x88u.";

/// `bytearray(b'xy')` at protocol 5
const BYTEARRAY: &[u8] = b"\x80\x05\x95\r\x00\x00\x00\x00\x00\x00\x00\x96\x02\x00\x00\x00\x00\x00\x00\x00xy\x94.";

/// `collections.deque([1, 2])` at protocol 4
const DEQUE: &[u8] = b"\x80\x04\x95\"\x00\x00\x00\x00\x00\x00\x00\x8c\x0bcollections\x94\x8c\x05deque\x94\x93\x94)R\x94(K\x01K\x02e.";

/// `os.system('echo pwned')` via `GLOBAL` + `REDUCE` at protocol 2
const OS_SYSTEM: &[u8] = b"\x80\x02cos\nsystem\nq\x00X\n\x00\x00\x00echo pwnedq\x01\x85q\x02Rq\x03.";

/// A two-tensor state_dict as the reference pickler writes it into
/// `data.pkl`: storages are persistent ids, `_metadata` is set through BUILD
const STATE_DICT: &[u8] = b"\
    \x80\x02ccollections\nOrderedDict\nq\x00)Rq\x01(X\x06\x00\x00\x00weightq\x02ctor\
    ch._utils\n_rebuild_tensor_v2\nq\x03((X\x07\x00\x00\x00storageq\x04ctorch\nFloat\
    Storage\nq\x05X\x01\x00\x00\x000q\x06X\x03\x00\x00\x00cpuq\x07K\x04tq\x08QK\x00K\
    \x04\x85q\tK\x01\x85q\n\x89h\x00)Rq\x0btq\x0cRq\x0dX\x04\x00\x00\x00biasq\x0eh\
    \x03((h\x04h\x05X\x01\x00\x00\x001q\x0fh\x07K\x02tq\x10QK\x00K\x02\x85q\x11h\n\
    \x89h\x00)Rq\x12tq\x13Rq\x14u}q\x15X\t\x00\x00\x00_metadataq\x16h\x00)Rq\x17X\
    \x00\x00\x00\x00q\x18}q\x19X\x07\x00\x00\x00versionq\x1aK\x01sssb.";

/// Records every resolution and swaps persistent ids for their storage key
#[derive(Default)]
struct TrackingResolver {
    resolved: Mutex<Vec<String>>,
}

impl TrackingResolver {
    fn resolved(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }
}

impl Resolver for TrackingResolver {
    fn resolve(&self, name: &QualifiedName) -> RuntimeResult<Symbol> {
        self.resolved.lock().unwrap().push(name.to_string());
        DefaultResolver.resolve(name)
    }

    fn persistent_load(&self, pid: Value) -> RuntimeResult<Value> {
        match pid {
            Value::Tuple(items) if items.len() == 2 => Ok(items[1].clone()),
            other => Err(RuntimeError::Unpicklable {
                reason: format!("unexpected persistent id {other:?}"),
            }),
        }
    }
}

fn load(data: &[u8]) -> RuntimeResult<Value> {
    Unpickler::new(&Tables::default(), &DefaultResolver).load(data)
}

#[test]
fn test_ordered_dict() {
    let tables = Tables::default();
    let resolver = TrackingResolver::default();
    let value = Unpickler::new(&tables, &resolver).load(ORDERED_DICT).unwrap();
    assert_eq!(
        value,
        Value::Dict(vec![
            ("a".into(), 1.into()),
            ("b".into(), Value::List(vec![2.into(), 3.into()])),
        ])
    );
    assert_eq!(resolver.resolved(), vec!["collections.OrderedDict"]);
}

#[test]
fn test_state_dict() {
    let value = load(STATE_DICT).unwrap();
    let Value::Object(state_dict) = &value else {
        panic!("expected an object, got {value:?}");
    };
    assert_eq!(state_dict.class, QualifiedName::new("collections", "OrderedDict"));
    let keys: Vec<_> = state_dict.dict_items.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec![Some("weight"), Some("bias")]);

    let Some(Value::Object(weight)) = value.get_str("weight") else {
        panic!("expected a rebuilt tensor");
    };
    assert_eq!(weight.class, QualifiedName::new("torch._utils", "_rebuild_tensor_v2"));
    let storage = Value::Tuple(vec![
        "storage".into(),
        Value::Global(QualifiedName::new("torch", "FloatStorage")),
        "0".into(),
        "cpu".into(),
        4.into(),
    ]);
    assert_eq!(
        weight.args,
        vec![
            Value::Persistent(Box::new(storage)),
            0.into(),
            Value::Tuple(vec![4.into()]),
            Value::Tuple(vec![1.into()]),
            false.into(),
            Value::Dict(vec![]),
        ]
    );

    let version = Value::Dict(vec![("version".into(), 1.into())]);
    let metadata = Value::Dict(vec![("".into(), version)]);
    assert_eq!(
        state_dict.state,
        Some(Value::Dict(vec![("_metadata".into(), metadata)]))
    );
    assert_eq!(load(&dumps(&value).unwrap()).unwrap(), value);
}

#[test]
fn test_mixed_mapping() {
    let value = load(MIXED_MAPPING).unwrap();
    assert_eq!(value.get_str("name"), Some(&"w".into()));
    assert_eq!(value.get_str("shape"), Some(&Value::Tuple(vec![2.into(), 3.into()])));
    assert_eq!(value.get_str("flags"), Some(&Value::Set(vec![1.into(), 2.into()])));
    assert_eq!(value.get_str("f"), Some(&Value::FrozenSet(vec![3.into()])));
    assert_eq!(value.get_str("big"), Some(&Value::BigInt(BigInt::from(1u128 << 70))));
    assert_eq!(value.get_str("neg"), Some(&Value::Int(-7)));
    assert_eq!(value.get_str("x"), Some(&Value::Float(1.5)));
    assert_eq!(value.get_str("b"), Some(&Value::Bytes(vec![0, 1])));
    assert_eq!(value.get_str("n"), Some(&Value::None));
    assert_eq!(value.get_str("t"), Some(&Value::Bool(true)));
}

#[test]
fn test_bytearray_and_deque() {
    assert_eq!(load(BYTEARRAY).unwrap(), Value::ByteArray(b"xy".to_vec()));
    assert_eq!(load(DEQUE).unwrap(), Value::List(vec![1.into(), 2.into()]));
}

#[test]
fn test_fail_closed_before_resolution() {
    let tables = Tables::default();
    let resolver = TrackingResolver::default();
    let err = Unpickler::new(&tables, &resolver).load(OS_SYSTEM).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisallowedConstruction);
    assert_eq!(err.offset(), Some(2));
    assert!(resolver.resolved().is_empty());
}

#[test]
fn test_fail_closed_for_stack_global() {
    // Allowing a whole module does not allow its dunder attributes.
    let tables = Tables::new(AllowList::from_entries(["builtins.*"]).unwrap());
    let resolver = TrackingResolver::default();
    let data = b"\x80\x04\x8c\x08builtins\x8c\x13getattr.__globals__\x93)R.";
    let err = Unpickler::new(&tables, &resolver).load(data).unwrap_err();
    assert!(matches!(err, RuntimeError::DisallowedConstruction { offset: 33, .. }));
    assert!(resolver.resolved().is_empty());
}

#[test]
fn test_extension_opcode_is_rejected() {
    let tables = Tables::new(AllowList::from_entries(["builtins.*"]).unwrap());
    let err = Unpickler::new(&tables, &DefaultResolver)
        .load(&[0x80, 0x02, 0x82, 0x01, b'.'])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisallowedConstruction);
}

#[test]
fn test_truncated_stream_is_malformed() {
    for cut in 0..MIXED_MAPPING.len() {
        let err = load(&MIXED_MAPPING[..cut]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedStream, "cut at {cut}");
    }
}

#[test]
fn test_persistent_load_hook() {
    let tables = Tables::default();
    let resolver = TrackingResolver::default();
    // [persistent_id(('storage', 'key0'))]
    let data = b"\x80\x02]q\x00(X\x07\x00\x00\x00storageX\x04\x00\x00\x00key0\x86Qe.";
    let value = Unpickler::new(&tables, &resolver).load(data).unwrap();
    assert_eq!(value, Value::List(vec!["key0".into()]));
}

#[test]
fn test_plain_round_trip() {
    let value = Value::Dict(vec![
        ("list".into(), Value::List(vec![1.into(), Value::None, "x".into()])),
        ("tuple".into(), Value::Tuple(vec![true.into(), Value::Float(-0.5)])),
        ("long".into(), Value::BigInt(BigInt::from(-1) << 100usize)),
        ("bytes".into(), Value::ByteArray(vec![0xff; 300])),
        ("set".into(), Value::Set(vec![1.into(), 2.into()])),
        ("frozen".into(), Value::FrozenSet(vec!["a".into()])),
        ("empty".into(), Value::Tuple(vec![])),
    ]);
    assert_eq!(load(&dumps(&value).unwrap()).unwrap(), value);
}

fn plain_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::None),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-z]{0,8}".prop_map(Value::Str),
        proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            proptest::collection::vec(inner.clone(), 0..5).prop_map(Value::Tuple),
            proptest::collection::vec(("[a-z]{1,4}", inner), 0..4).prop_map(|pairs| {
                let mut items: Vec<(Value, Value)> = Vec::new();
                for (key, value) in pairs {
                    let key = Value::Str(key);
                    match items.iter_mut().find(|(k, _)| *k == key) {
                        Some(slot) => slot.1 = value,
                        None => items.push((key, value)),
                    }
                }
                Value::Dict(items)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn test_round_trip(value in plain_value()) {
        let data = dumps(&value).unwrap();
        prop_assert_eq!(load(&data).unwrap(), value);
    }

    #[test]
    fn test_load_never_panics(data in proptest::collection::vec(any::<u8>(), 0..200)) {
        let _ = load(&data);
    }
}
