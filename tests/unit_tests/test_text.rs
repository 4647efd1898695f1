// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD};
use iscsi_initiator_rs::{
    error::IscsiError,
    models::text::codec::{TextBuffer, decode_binary, get_key_value},
    state_machine::login::login_plain::operational_keys,
};
use proptest::prelude::*;

#[test]
fn lookup_requires_exact_key() -> Result<()> {
    let mut t = TextBuffer::with_capacity(256);
    t.add_key_value("CHAP_AX", "1")?;
    t.add_key_value("CHAP_A", "5")?;
    t.add_key_value("TargetAlias", "")?;

    assert_eq!(get_key_value(t.as_bytes(), "CHAP_A")?, "5");
    assert_eq!(get_key_value(t.as_bytes(), "CHAP_AX")?, "1");
    assert!(matches!(
        get_key_value(t.as_bytes(), "CHAP"),
        Err(IscsiError::KeyNotFound(_))
    ));
    Ok(())
}

#[test]
fn overflow_leaves_buffer_untouched() -> Result<()> {
    let mut t = TextBuffer::with_capacity(16);
    t.add_key_value("Key", "value")?;
    let before = t.len();
    assert!(matches!(
        t.add_key_binary("CHAP_R", &[0u8; 16]),
        Err(IscsiError::BufferOverflow)
    ));
    assert_eq!(t.len(), before);
    Ok(())
}

#[test]
fn binary_encodings() -> Result<()> {
    assert_eq!(decode_binary("0xABC", 16)?, vec![0x0a, 0xbc]);
    assert_eq!(decode_binary("0X0102", 16)?, vec![1, 2]);
    assert_eq!(decode_binary("0bAQID", 16)?, vec![1, 2, 3]);
    assert_eq!(decode_binary("0BAQI=", 16)?, vec![1, 2]);

    assert!(matches!(decode_binary("0x", 16), Err(IscsiError::MalformedValue(_))));
    assert!(matches!(decode_binary("0xZZ", 16), Err(IscsiError::MalformedValue(_))));
    assert!(matches!(decode_binary("0bAQI", 16), Err(IscsiError::MalformedValue(_))));
    assert!(matches!(decode_binary("1234", 16), Err(IscsiError::MalformedValue(_))));
    assert!(matches!(decode_binary("0x010203", 2), Err(IscsiError::BufferOverflow)));
    assert!(matches!(decode_binary("0bAQID", 2), Err(IscsiError::BufferOverflow)));
    Ok(())
}

#[test]
fn operational_parameter_list() -> Result<()> {
    let mut t = TextBuffer::with_capacity(8192);
    operational_keys(&mut t, 262144)?;
    let data = t.as_bytes();
    for (key, value) in [
        ("HeaderDigest", "None"),
        ("DataDigest", "None"),
        ("MaxConnections", "1"),
        ("InitialR2T", "No"),
        ("ImmediateData", "Yes"),
        ("MaxRecvDataSegmentLength", "262144"),
        ("MaxBurstLength", "262144"),
        ("FirstBurstLength", "262144"),
        ("DefaultTime2Wait", "0"),
        ("DefaultTime2Retain", "60"),
        ("DataPDUInOrder", "Yes"),
        ("DataSequenceInOrder", "Yes"),
        ("ErrorRecoveryLevel", "0"),
        ("MaxOutstandingR2T", "1"),
    ] {
        assert_eq!(get_key_value(data, key)?, value, "{key}");
    }
    assert_eq!(data.iter().filter(|&&b| b == 0).count(), 14);
    Ok(())
}

proptest! {
    #[test]
    fn value_survives_lookup(key in "[A-Za-z][A-Za-z0-9_.]{0,30}", value in "[ -~]{0,64}") {
        let mut t = TextBuffer::with_capacity(1024);
        t.add_key_value("SessionType", "Normal").unwrap();
        t.add_key_value(&key, &value).unwrap();
        let expected = if key == "SessionType" { "Normal" } else { value.as_str() };
        prop_assert_eq!(get_key_value(t.as_bytes(), &key).unwrap(), expected);
    }

    #[test]
    fn hex_and_base64_decode(bytes in proptest::collection::vec(any::<u8>(), 1..128)) {
        let mut t = TextBuffer::with_capacity(512);
        t.add_key_binary("CHAP_C", &bytes).unwrap();
        let hex = get_key_value(t.as_bytes(), "CHAP_C").unwrap();
        prop_assert_eq!(decode_binary(hex, 1024).unwrap(), bytes.clone());

        let b64 = format!("0b{}", STANDARD.encode(&bytes));
        prop_assert_eq!(decode_binary(&b64, 1024).unwrap(), bytes);
    }
}
