// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Container identification

use std::path::Path;

use disasm::{Disassembler, HIGHEST_PROTOCOL};
use serde::Serialize;

/// File extensions the guard scans
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pkl", "pickle", "pth", "pt", "joblib", "h5", "hdf5", "pb", "onnx", "safetensors",
];

/// Extensions whose content is expected to be a pickle stream or an archive
/// of them
const PICKLE_EXTENSIONS: &[&str] = &["pkl", "pickle", "pth", "pt", "joblib"];

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const EMPTY_ZIP_MAGIC: &[u8] = b"PK\x05\x06";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

/// Formats that cannot carry bytecode and are not scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InertFormat {
    Hdf5,
    SafeTensors,
    Onnx,
    Protobuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Format {
    /// A bare pickle stream
    Stream,
    /// A zip archive whose pickle members are scanned
    ZipContainer,
    Inert(InertFormat),
    Unrecognized,
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Returns true if `path` has an extension the guard scans.
pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

/// Returns true if `data` starts like a pickle stream: a protocol 2+
/// `PROTO` header, or a protocol 0/1 container opcode.
pub fn is_pickle_stream(data: &[u8]) -> bool {
    match data {
        [0x80, proto, ..] => (2..=HIGHEST_PROTOCOL).contains(proto),
        [b'(' | b']' | b'}', _, ..] => true,
        _ => false,
    }
}

/// Returns true if `data` starts with a protocol 2+ `PROTO` header.
pub(crate) fn has_proto_header(data: &[u8]) -> bool {
    matches!(data, [0x80, proto, ..] if (2..=HIGHEST_PROTOCOL).contains(proto))
}

/// Returns true if `data` disassembles cleanly up to a `STOP`, which is all
/// an unpickler needs to run it.
fn decodes_as_pickle(data: &[u8]) -> bool {
    Disassembler::new(data).all(|record| record.is_ok())
}

fn is_safetensors(data: &[u8]) -> bool {
    let Some(header) = data.get(..8) else {
        return false;
    };
    let mut len = [0u8; 8];
    len.copy_from_slice(header);
    let len = u64::from_le_bytes(len);
    data.get(8) == Some(&b'{') && len <= (data.len() - 8) as u64
}

/// Identify the container format of a file from its content and name.
///
/// Content wins over the extension. Anything that decodes as a pickle stream
/// is a stream, whatever its name or leading magic. A file with a pickle
/// extension and no recognizable magic is still treated as a stream, so the
/// analyzer reports what is wrong with it. Only content that is not a pickle
/// is ever reported inert.
pub fn sniff(path: &Path, data: &[u8]) -> Format {
    if is_pickle_stream(data) {
        return Format::Stream;
    }
    if data.starts_with(ZIP_MAGIC) || data.starts_with(EMPTY_ZIP_MAGIC) {
        return Format::ZipContainer;
    }
    if decodes_as_pickle(data) {
        return Format::Stream;
    }
    if data.starts_with(HDF5_MAGIC) {
        return Format::Inert(InertFormat::Hdf5);
    }
    if is_safetensors(data) {
        return Format::Inert(InertFormat::SafeTensors);
    }
    match extension(path).as_deref() {
        Some("onnx") => Format::Inert(InertFormat::Onnx),
        Some("pb") => Format::Inert(InertFormat::Protobuf),
        Some(ext) if PICKLE_EXTENSIONS.contains(&ext) && !data.is_empty() => Format::Stream,
        _ => Format::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{Format, InertFormat, is_pickle_stream, is_safetensors, is_supported, sniff};

    #[test]
    fn test_pickle_detection() {
        assert!(is_pickle_stream(b"\x80\x02]."));
        assert!(is_pickle_stream(b"\x80\x05N."));
        assert!(is_pickle_stream(b"(lp0\n."));
        assert!(is_pickle_stream(b"}."));
        assert!(!is_pickle_stream(b"\x80\x06N."));
        assert!(!is_pickle_stream(b"\x80"));
        assert!(!is_pickle_stream(b"("));
    }

    #[test]
    fn test_sniff() {
        let p = Path::new("model.bin");
        assert_eq!(sniff(p, b"\x80\x04N."), Format::Stream);
        assert_eq!(sniff(p, b"PK\x03\x04rest"), Format::ZipContainer);
        assert_eq!(sniff(p, b"\x89HDF\r\n\x1a\nrest"), Format::Inert(InertFormat::Hdf5));
        assert_eq!(
            sniff(p, b"\x02\x00\x00\x00\x00\x00\x00\x00{}"),
            Format::Inert(InertFormat::SafeTensors)
        );
        assert_eq!(sniff(Path::new("m.onnx"), b"\x08\x07"), Format::Inert(InertFormat::Onnx));
        assert_eq!(sniff(Path::new("m.pb"), b"\x08\x07"), Format::Inert(InertFormat::Protobuf));
        assert_eq!(sniff(p, b"garbage"), Format::Unrecognized);
        // Protocol 0 streams may start with any opcode
        assert_eq!(sniff(Path::new("m.pkl"), b"cos\nsystem\n."), Format::Stream);
        assert_eq!(sniff(Path::new("m.pkl"), b""), Format::Unrecognized);
    }

    #[test]
    fn test_pickle_under_inert_name_is_a_stream() {
        let payload = b"cos\nsystem\n(S'id'\ntR.";
        for name in ["model.onnx", "model.pb", "model.h5", "model.safetensors", "model.bin"] {
            assert_eq!(sniff(Path::new(name), payload), Format::Stream, "{name}");
        }
        // A safetensors header whose length prefix is also a BINUNICODE opcode
        let mut disguised = b"X\x04\x00\x00\x00\x00\x00\x00{N.".to_vec();
        disguised.resize(2048, b' ');
        assert!(is_safetensors(&disguised));
        assert_eq!(sniff(Path::new("m.safetensors"), &disguised), Format::Stream);
        // Without a STOP the extension decides; the scan still analyzes it
        assert_eq!(
            sniff(Path::new("m.onnx"), b"cos\nsystem\n"),
            Format::Inert(InertFormat::Onnx)
        );
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported(Path::new("a/b/model.PT")));
        assert!(is_supported(Path::new("weights.safetensors")));
        assert!(!is_supported(Path::new("notes.txt")));
        assert!(!is_supported(Path::new("Makefile")));
    }
}
