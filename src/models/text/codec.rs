// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Login / Text key=value codec.
//!
//! A text buffer is a sequence of `key=value\0` records. Binary values use
//! the RFC 7143 § 6.1 encodings: `0x` + hex digits or `0b` + base64.

use core::fmt::Write;

use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};

use crate::error::{IscsiError, Result};

/// Base64 as used by iSCSI: standard alphabet, `=` padding required, loose
/// trailing bits tolerated.
const ISCSI_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

/// Bounded builder for a `key=value\0` payload.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl TextBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.min(8192)),
            capacity,
        }
    }

    /// Appends `key=value\0`.
    pub fn add_key_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.reserve_record(key, value.len())?;
        self.buf.extend_from_slice(key.as_bytes());
        self.buf.push(b'=');
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Appends `key=0x<HEX>\0` with uppercase hex digits.
    pub fn add_key_binary(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let encoded_len = 2 + value.len() * 2;
        self.reserve_record(key, encoded_len)?;
        let mut encoded = String::with_capacity(encoded_len);
        encoded.push_str("0x");
        for b in value {
            write!(&mut encoded, "{b:02X}").map_err(|_| IscsiError::BufferOverflow)?;
        }
        self.buf.extend_from_slice(key.as_bytes());
        self.buf.push(b'=');
        self.buf.extend_from_slice(encoded.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn reserve_record(&self, key: &str, value_len: usize) -> Result<()> {
        if self.buf.len() + key.len() + 1 + value_len + 1 > self.capacity {
            return Err(IscsiError::BufferOverflow);
        }
        Ok(())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Looks up `key` in a NUL-delimited buffer.
///
/// A record only matches when the key is followed by `=`, so `CHAP_A` never
/// matches `CHAP_AX=...`.
pub fn get_key_value<'a>(buf: &'a [u8], key: &str) -> Result<&'a str> {
    let key = key.as_bytes();
    for record in buf.split(|&b| b == 0) {
        if record.len() > key.len() && record.starts_with(key) && record[key.len()] == b'='
        {
            return std::str::from_utf8(&record[key.len() + 1..]).map_err(|_| {
                IscsiError::MalformedValue(format!(
                    "value of {} is not UTF-8",
                    String::from_utf8_lossy(key)
                ))
            });
        }
    }
    Err(IscsiError::KeyNotFound(
        String::from_utf8_lossy(key).into_owned(),
    ))
}

/// Decodes a long binary value (`0x...` hex or `0b...` base64) into at most
/// `capacity` bytes.
pub fn decode_binary(text: &str, capacity: usize) -> Result<Vec<u8>> {
    if text.len() < 3 {
        return Err(IscsiError::MalformedValue(format!("binary value too short: {text:?}")));
    }
    let (prefix, digits) = text.split_at(2);
    let out = match prefix {
        "0x" | "0X" => {
            let padded;
            let digits = if digits.len() % 2 == 1 {
                padded = format!("0{digits}");
                padded.as_str()
            } else {
                digits
            };
            if digits.len() / 2 > capacity {
                return Err(IscsiError::BufferOverflow);
            }
            hex::decode(digits)
                .map_err(|e| IscsiError::MalformedValue(format!("bad hex value: {e}")))?
        },
        "0b" | "0B" => {
            if digits.len() % 4 != 0 {
                return Err(IscsiError::MalformedValue(
                    "base64 length is not a multiple of 4".into(),
                ));
            }
            ISCSI_BASE64
                .decode(digits)
                .map_err(|e| IscsiError::MalformedValue(format!("bad base64 value: {e}")))?
        },
        _ => {
            return Err(IscsiError::MalformedValue(format!(
                "unknown binary encoding: {text:?}"
            )));
        },
    };
    if out.len() > capacity {
        return Err(IscsiError::BufferOverflow);
    }
    Ok(out)
}
