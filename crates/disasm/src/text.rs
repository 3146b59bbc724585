// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Text argument decoding for protocol 0 opcodes
//!
//! Protocol 0 carries its arguments as newline-terminated text. Three
//! encodings are used:
//!
//! - decimal integers, optionally signed (`INT`, `LONG`, `GET`, `PUT`)
//! - quoted strings with backslash escapes (`STRING`)
//! - raw-unicode-escape text where only `\uXXXX` and `\UXXXXXXXX` are
//!   escapes and every other byte is a Latin-1 code point (`UNICODE`)

use std::borrow::Cow;

/// Returns the text if it is an optionally signed run of ASCII digits.
pub(crate) fn decimal(line: &[u8]) -> Result<&str, String> {
    let text = std::str::from_utf8(line).map_err(|_| "non-ASCII decimal".to_string())?;
    let text = text.trim();
    let digits = text
        .strip_prefix('-')
        .or_else(|| text.strip_prefix('+'))
        .unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid decimal literal {text:?}"));
    }
    Ok(text)
}

pub(crate) fn float(line: &[u8]) -> Result<f64, String> {
    let text = std::str::from_utf8(line).map_err(|_| "non-ASCII float".to_string())?;
    text.trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid float literal {:?}", text.trim()))
}

/// Strip the quotes of a `STRING` argument and process its escapes.
pub(crate) fn quoted_string(line: &[u8]) -> Result<Cow<'_, [u8]>, String> {
    let inner = match line {
        [q, inner @ .., last] if (*q == b'\'' || *q == b'"') && q == last => inner,
        _ => return Err("argument must be quoted".into()),
    };
    if !inner.contains(&b'\\') {
        return Ok(Cow::Borrowed(inner));
    }

    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        let b = inner[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let Some(&esc) = inner.get(i) else {
            return Err("trailing backslash".into());
        };
        i += 1;
        match esc {
            b'\n' => {}
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(esc - b'0');
                for _ in 0..2 {
                    match inner.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                // Octal escapes above \377 wrap like the reference decoder.
                out.push((value & 0xff) as u8);
            }
            b'x' => {
                let hex = inner
                    .get(i..i + 2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| format!("invalid \\x escape at position {}", i - 2))?;
                out.push(hex);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(Cow::Owned(out))
}

/// Decode raw-unicode-escape text.
pub(crate) fn raw_unicode_escape(line: &[u8]) -> Result<Cow<'_, str>, String> {
    if line.is_ascii() && !line.contains(&b'\\') {
        // ASCII is valid UTF-8
        return std::str::from_utf8(line)
            .map(Cow::Borrowed)
            .map_err(|e| e.to_string());
    }

    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let b = line[i];
        if b != b'\\' {
            out.push(char::from(b));
            i += 1;
            continue;
        }

        // Only an odd run of backslashes introduces an escape.
        let run_start = i;
        while i < line.len() && line[i] == b'\\' {
            out.push('\\');
            i += 1;
        }
        let odd = (i - run_start) % 2 == 1;
        let width = match line.get(i) {
            Some(b'u') if odd => 4,
            Some(b'U') if odd => 8,
            _ => continue,
        };
        out.pop();
        i += 1;

        let code = line
            .get(i..i + width)
            .and_then(|h| std::str::from_utf8(h).ok())
            .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .ok_or_else(|| format!("truncated escape at position {}", i - 2))?;
        let ch = char::from_u32(code)
            .ok_or_else(|| format!("escape {code:#x} is not a unicode scalar value"))?;
        out.push(ch);
        i += width;
    }
    Ok(Cow::Owned(out))
}

/// Reinterpret decoded bytes as text when they are valid UTF-8.
pub(crate) fn bytes_or_str(bytes: Cow<'_, [u8]>) -> Result<Cow<'_, str>, Cow<'_, [u8]>> {
    match bytes {
        Cow::Borrowed(b) => std::str::from_utf8(b)
            .map(Cow::Borrowed)
            .map_err(|_| Cow::Borrowed(b)),
        Cow::Owned(v) => String::from_utf8(v)
            .map(Cow::Owned)
            .map_err(|e| Cow::Owned(e.into_bytes())),
    }
}
