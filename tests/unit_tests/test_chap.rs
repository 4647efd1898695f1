// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use hex_literal::hex;
use iscsi_initiator_rs::{
    models::text::codec::{TextBuffer, decode_binary, get_key_value},
    state_machine::login::login_chap::{
        CHAP_BINARY_CAPACITY, chap_md5_response, generate_challenge, verify_response,
    },
};

const CHALLENGE: [u8; 17] = hex!("0011223344556677889900aabbccddeeff");

#[test]
fn known_md5_vector() {
    let r = chap_md5_response(0x2a, b"verysecretpassword", &CHALLENGE);
    assert_eq!(r, hex!("8253d4fffefa63a1abb076998878e58c"));

    // MD5 of the single octet 0x00.
    assert_eq!(chap_md5_response(0, b"", &[]), hex!("93b885adfe0da089cdf634904fd59f71"));
}

#[test]
fn response_is_deterministic() {
    let a = chap_md5_response(7, b"secret", &CHALLENGE);
    let b = chap_md5_response(7, b"secret", &CHALLENGE);
    assert_eq!(a, b);
    assert_ne!(a, chap_md5_response(8, b"secret", &CHALLENGE));
    assert_ne!(a, chap_md5_response(7, b"Secret", &CHALLENGE));
}

#[test]
fn response_travels_as_hex() -> Result<()> {
    let r = chap_md5_response(0x2a, b"verysecretpassword", &CHALLENGE);
    let mut t = TextBuffer::with_capacity(128);
    t.add_key_binary("CHAP_R", &r)?;
    assert_eq!(
        get_key_value(t.as_bytes(), "CHAP_R")?,
        "0x8253D4FFFEFA63A1ABB076998878E58C"
    );
    let back = decode_binary(get_key_value(t.as_bytes(), "CHAP_R")?, CHAP_BINARY_CAPACITY)?;
    assert!(verify_response(0x2a, b"verysecretpassword", &CHALLENGE, &back));
    Ok(())
}

#[test]
fn verify_rejects_wrong_answers() {
    let challenge = generate_challenge();
    let good = chap_md5_response(3, b"target-secret", &challenge);
    assert!(verify_response(3, b"target-secret", &challenge, &good));
    assert!(!verify_response(4, b"target-secret", &challenge, &good));
    assert!(!verify_response(3, b"target-secret", &challenge, &good[..15]));
}
