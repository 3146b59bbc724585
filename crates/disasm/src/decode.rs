// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pickle stream decoding
//!
//! [`Disassembler`] walks a byte buffer one opcode at a time and yields
//! [`OpcodeRecord`]s whose arguments borrow from the buffer. It stops after
//! the first `STOP`; bytes after it are never read. It does not interpret
//! what opcodes do to the stack, it only validates their encodings.

use std::borrow::Cow;

use classify::{ArgKind, Opcode};

use crate::{
    Argument, DecodeError, DecodeResult, LongArg, OpcodeRecord,
    text::{self, bytes_or_str},
};

/// Highest protocol version understood by the decoder
pub const HIGHEST_PROTOCOL: u8 = 5;

/// Streaming decoder over a borrowed byte buffer
///
/// Yields `Ok` records up to and including `STOP`, or a single `Err` at the
/// first decode failure. The iterator is fused after either.
#[derive(Debug, Clone)]
pub struct Disassembler<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Disassembler<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            done: false,
        }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns true once the iterator is exhausted: after `STOP` was decoded,
    /// or after the first decode error.
    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, offset: usize, opcode: Opcode) -> DecodeResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated { offset, opcode });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(
        &mut self,
        offset: usize,
        opcode: Opcode,
    ) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, offset, opcode)?);
        Ok(out)
    }

    /// Read up to the next `\n`, returning the line without it.
    fn take_line(&mut self, offset: usize, opcode: Opcode) -> DecodeResult<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let Some(end) = rest.iter().position(|&b| b == b'\n') else {
            return Err(DecodeError::Truncated { offset, opcode });
        };
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// Read a length prefix encoded as `kind` and return the payload.
    fn take_sized(
        &mut self,
        kind: ArgKind,
        offset: usize,
        opcode: Opcode,
    ) -> DecodeResult<&'a [u8]> {
        let len: u64 = match kind {
            ArgKind::String1 | ArgKind::Bytes1 | ArgKind::Unicode1 | ArgKind::Long1 => {
                u64::from(self.take_array::<1>(offset, opcode)?[0])
            }
            ArgKind::String4 | ArgKind::Long4 => {
                let len = i32::from_le_bytes(self.take_array(offset, opcode)?);
                if len < 0 {
                    return Err(DecodeError::NegativeLength {
                        offset,
                        opcode,
                        length: i64::from(len),
                    });
                }
                len as u64
            }
            ArgKind::Bytes4 | ArgKind::Unicode4 => {
                u64::from(u32::from_le_bytes(self.take_array(offset, opcode)?))
            }
            _ => u64::from_le_bytes(self.take_array(offset, opcode)?),
        };
        let len = usize::try_from(len).map_err(|_| DecodeError::Truncated { offset, opcode })?;
        self.take(len, offset, opcode)
    }

    fn decode_arg(&mut self, opcode: Opcode, offset: usize) -> DecodeResult<Argument<'a>> {
        let invalid = |reason: String| DecodeError::InvalidArgument {
            offset,
            opcode,
            reason,
        };

        let kind = opcode.arg_kind();
        let arg = match kind {
            ArgKind::None => Argument::None,
            ArgKind::U1 => Argument::Int(i64::from(self.take_array::<1>(offset, opcode)?[0])),
            ArgKind::U2 => {
                let value = u16::from_le_bytes(self.take_array(offset, opcode)?);
                Argument::Int(i64::from(value))
            }
            ArgKind::I4 => {
                let value = i32::from_le_bytes(self.take_array(offset, opcode)?);
                Argument::Int(i64::from(value))
            }
            ArgKind::U4 => {
                let value = u32::from_le_bytes(self.take_array(offset, opcode)?);
                Argument::Int(i64::from(value))
            }
            ArgKind::U8 => {
                let value = u64::from_le_bytes(self.take_array(offset, opcode)?);
                let value =
                    i64::try_from(value).map_err(|_| invalid(format!("{value} out of range")))?;
                Argument::Int(value)
            }
            ArgKind::Float8 => {
                Argument::Float(f64::from_be_bytes(self.take_array(offset, opcode)?))
            }
            ArgKind::DecimalNlShort => {
                let line = self.take_line(offset, opcode)?;
                match line {
                    b"00" if opcode == Opcode::INT => Argument::Bool(false),
                    b"01" if opcode == Opcode::INT => Argument::Bool(true),
                    _ => {
                        let text = text::decimal(line).map_err(invalid)?;
                        match text.parse::<i64>() {
                            Ok(v) => Argument::Int(v),
                            Err(_) if opcode == Opcode::INT => {
                                Argument::Long(LongArg::Decimal(text))
                            }
                            Err(_) => return Err(invalid(format!("{text} out of range"))),
                        }
                    }
                }
            }
            ArgKind::DecimalNlLong => {
                let line = self.take_line(offset, opcode)?;
                let line = line.strip_suffix(b"L").unwrap_or(line);
                Argument::Long(LongArg::Decimal(text::decimal(line).map_err(invalid)?))
            }
            ArgKind::FloatNl => {
                let line = self.take_line(offset, opcode)?;
                Argument::Float(text::float(line).map_err(invalid)?)
            }
            ArgKind::StringNl => {
                let line = self.take_line(offset, opcode)?;
                match bytes_or_str(text::quoted_string(line).map_err(invalid)?) {
                    Ok(s) => Argument::Str(s),
                    Err(b) => Argument::Bytes(b),
                }
            }
            ArgKind::StringNlNoEscape => {
                let line = self.take_line(offset, opcode)?;
                let s = std::str::from_utf8(line).map_err(|e| invalid(e.to_string()))?;
                Argument::Str(Cow::Borrowed(s))
            }
            ArgKind::NamePair => {
                let module = self.take_line(offset, opcode)?;
                let symbol = self.take_line(offset, opcode)?;
                let module = std::str::from_utf8(module).map_err(|e| invalid(e.to_string()))?;
                let symbol = std::str::from_utf8(symbol).map_err(|e| invalid(e.to_string()))?;
                Argument::Name { module, symbol }
            }
            ArgKind::UnicodeNl => {
                let line = self.take_line(offset, opcode)?;
                Argument::Str(text::raw_unicode_escape(line).map_err(invalid)?)
            }
            ArgKind::String1 | ArgKind::String4 => {
                let payload = self.take_sized(kind, offset, opcode)?;
                match bytes_or_str(Cow::Borrowed(payload)) {
                    Ok(s) => Argument::Str(s),
                    Err(b) => Argument::Bytes(b),
                }
            }
            ArgKind::Bytes1 | ArgKind::Bytes4 | ArgKind::Bytes8 => {
                Argument::Bytes(Cow::Borrowed(self.take_sized(kind, offset, opcode)?))
            }
            ArgKind::Unicode1 | ArgKind::Unicode4 | ArgKind::Unicode8 => {
                let payload = self.take_sized(kind, offset, opcode)?;
                let s = std::str::from_utf8(payload).map_err(|e| invalid(e.to_string()))?;
                Argument::Str(Cow::Borrowed(s))
            }
            ArgKind::Long1 | ArgKind::Long4 => {
                Argument::Long(LongArg::TwosComplement(self.take_sized(kind, offset, opcode)?))
            }
        };

        match (opcode, &arg) {
            (Opcode::PROTO, Argument::Int(p)) if *p > i64::from(HIGHEST_PROTOCOL) => {
                Err(invalid(format!("unsupported protocol {p}")))
            }
            (Opcode::FRAME, Argument::Int(len)) if *len as u64 > self.remaining() as u64 => {
                Err(invalid(format!("frame of {len} bytes extends past end of input")))
            }
            (Opcode::PUT, Argument::Int(i)) if *i < 0 => {
                Err(invalid(format!("negative memo index {i}")))
            }
            _ => Ok(arg),
        }
    }

    fn decode_next(&mut self) -> DecodeResult<OpcodeRecord<'a>> {
        let offset = self.pos;
        let Some(&byte) = self.data.get(offset) else {
            return Err(DecodeError::MissingStop { offset });
        };
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { offset, byte })?;
        self.pos += 1;

        let arg = self.decode_arg(opcode, offset)?;
        Ok(OpcodeRecord { opcode, arg, offset })
    }
}

impl<'a> Iterator for Disassembler<'a> {
    type Item = DecodeResult<OpcodeRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.decode_next();
        match &result {
            Ok(record) if record.opcode != Opcode::STOP => {}
            _ => self.done = true,
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for Disassembler<'_> {}

/// Decode a whole stream up to and including `STOP`.
pub fn disassemble(data: &[u8]) -> DecodeResult<Vec<OpcodeRecord<'_>>> {
    Disassembler::new(data).collect()
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use classify::Opcode;

    use crate::{Argument, DecodeError, Disassembler, LongArg, disassemble};

    #[test]
    fn test_empty_input() {
        assert_eq!(disassemble(&[]), Err(DecodeError::MissingStop { offset: 0 }));
    }

    #[test]
    fn test_stop_only() {
        let records = disassemble(b".").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].opcode, Opcode::STOP);
        assert_eq!(records[0].arg, Argument::None);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let records = disassemble(b"N.garbage\xff").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_fixed_width_ints() {
        let data = [
            0x4b, 0xff, // BININT1 255
            0x4d, 0x01, 0x02, // BININT2 0x0201
            0x4a, 0xfe, 0xff, 0xff, 0xff, // BININT -2
            0x2e, // STOP
        ];
        let records = disassemble(&data).unwrap();
        assert_eq!(records[0].arg, Argument::Int(255));
        assert_eq!(records[1].arg, Argument::Int(0x0201));
        assert_eq!(records[1].offset, 2);
        assert_eq!(records[2].arg, Argument::Int(-2));
        assert_eq!(records[2].offset, 5);
    }

    #[test]
    fn test_binfloat_is_big_endian() {
        let mut data = vec![b'G'];
        data.extend_from_slice(&1.5f64.to_be_bytes());
        data.push(b'.');
        let records = disassemble(&data).unwrap();
        assert_eq!(records[0].arg, Argument::Float(1.5));
    }

    #[test]
    fn test_text_ints() {
        let records = disassemble(b"I01\nI00\nI-12\nI99999999999999999999\nL5L\n.").unwrap();
        assert_eq!(records[0].arg, Argument::Bool(true));
        assert_eq!(records[1].arg, Argument::Bool(false));
        assert_eq!(records[2].arg, Argument::Int(-12));
        assert_eq!(
            records[3].arg,
            Argument::Long(LongArg::Decimal("99999999999999999999"))
        );
        assert_eq!(records[4].arg, Argument::Long(LongArg::Decimal("5")));
    }

    #[test]
    fn test_global_name_pair() {
        let records = disassemble(b"cos\nsystem\n.").unwrap();
        assert_eq!(records[0].opcode, Opcode::GLOBAL);
        assert_eq!(
            records[0].arg,
            Argument::Name {
                module: "os",
                symbol: "system"
            }
        );
        assert_eq!(records[1].offset, 11);
    }

    #[test]
    fn test_strings_borrow_input() {
        let data = [
            0x8c, 0x02, b'h', b'i', // SHORT_BINUNICODE "hi"
            0x43, 0x01, 0x00, // SHORT_BINBYTES b"\0"
            0x2e, // STOP
        ];
        let records = disassemble(&data).unwrap();
        assert!(matches!(&records[0].arg, Argument::Str(Cow::Borrowed("hi"))));
        assert!(matches!(&records[1].arg, Argument::Bytes(Cow::Borrowed(b)) if **b == [0u8]));
    }

    #[test]
    fn test_quoted_string_opcode() {
        let records = disassemble(b"S'a\\nb'\nS'\\xff'\n.").unwrap();
        assert_eq!(records[0].arg.as_str(), Some("a\nb"));
        // Not UTF-8, kept as bytes
        assert!(matches!(&records[1].arg, Argument::Bytes(b) if b.as_ref() == [0xff]));
    }

    #[test]
    fn test_long1() {
        let data = [0x8a, 0x02, 0x00, 0x80, 0x2e];
        let records = disassemble(&data).unwrap();
        assert_eq!(
            records[0].arg,
            Argument::Long(LongArg::TwosComplement(&[0x00, 0x80]))
        );
    }

    #[test]
    fn test_unknown_opcode() {
        let data = [0x80, 0x04, 0xff, 0x2e];
        assert_eq!(
            disassemble(&data),
            Err(DecodeError::UnknownOpcode {
                offset: 2,
                byte: 0xff
            })
        );
    }

    #[test]
    fn test_truncated_argument() {
        let data = [0x80, 0x04, 0x8c, 0x05, b'a', b'b'];
        assert_eq!(
            disassemble(&data),
            Err(DecodeError::Truncated {
                offset: 2,
                opcode: Opcode::SHORT_BINUNICODE
            })
        );
    }

    #[test]
    fn test_truncated_line() {
        assert!(matches!(
            disassemble(b"cos\nsys"),
            Err(DecodeError::Truncated {
                offset: 0,
                opcode: Opcode::GLOBAL
            })
        ));
    }

    #[test]
    fn test_missing_stop() {
        let data = [0x80, 0x04, 0x4e];
        assert_eq!(
            disassemble(&data),
            Err(DecodeError::MissingStop { offset: 3 })
        );
    }

    #[test]
    fn test_negative_length() {
        let data = [0x54, 0xff, 0xff, 0xff, 0xff, 0x2e];
        assert!(matches!(
            disassemble(&data),
            Err(DecodeError::NegativeLength {
                offset: 0,
                opcode: Opcode::BINSTRING,
                length: -1
            })
        ));
    }

    #[test]
    fn test_huge_length_is_truncated() {
        let mut data = vec![0x8e];
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.push(b'.');
        assert!(matches!(
            disassemble(&data),
            Err(DecodeError::Truncated {
                opcode: Opcode::BINBYTES8,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(
            disassemble(&[0x80, 0x06, 0x2e]),
            Err(DecodeError::InvalidArgument {
                opcode: Opcode::PROTO,
                ..
            })
        ));
        assert!(matches!(
            disassemble(b"Ixyz\n."),
            Err(DecodeError::InvalidArgument {
                opcode: Opcode::INT,
                ..
            })
        ));
        assert!(matches!(
            disassemble(b"p-1\n."),
            Err(DecodeError::InvalidArgument {
                opcode: Opcode::PUT,
                ..
            })
        ));
        assert!(matches!(
            disassemble(&[0x8c, 0x01, 0xff, 0x2e]),
            Err(DecodeError::InvalidArgument {
                opcode: Opcode::SHORT_BINUNICODE,
                ..
            })
        ));
    }

    #[test]
    fn test_frame_past_end() {
        let mut data = vec![0x80, 0x04, 0x95];
        data.extend_from_slice(&100u64.to_le_bytes());
        data.push(b'.');
        assert!(matches!(
            disassemble(&data),
            Err(DecodeError::InvalidArgument {
                opcode: Opcode::FRAME,
                ..
            })
        ));
    }

    #[test]
    fn test_iterator_is_fused_after_error() {
        let mut dis = Disassembler::new(&[0x4e, 0xff, 0x2e]);
        assert!(matches!(dis.next(), Some(Ok(_))));
        assert!(!dis.is_finished());
        assert!(matches!(dis.next(), Some(Err(_))));
        assert!(dis.is_finished());
        assert!(dis.next().is_none());
        assert!(dis.next().is_none());
    }

    #[test]
    fn test_iterator_stops_after_stop() {
        let mut dis = Disassembler::new(b"N.N.");
        assert!(matches!(dis.next(), Some(Ok(_))));
        assert!(matches!(dis.next(), Some(Ok(r)) if r.opcode == Opcode::STOP));
        assert!(dis.is_finished());
        assert_eq!(dis.position(), 2);
        assert!(dis.next().is_none());
    }
}
