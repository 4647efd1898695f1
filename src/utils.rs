// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::IpAddr;

use tracing::warn;

/// Fixed upper 32 bits of the ISID: random-qualifier format (`0x80`) plus a
/// constant naming authority. The low 16 bits carry the local TCP port.
pub const ISID_BASE: u64 = 0x8000_0000_0000 | 0x0012_3456_0000;

/// Basename for the initiator name when none is configured.
pub const DEFAULT_INITIATOR_BASENAME: &str = "iqn.2009-08.com.sun.virtualbox.initiator";

/// Folds the local source port into the ISID so concurrent sessions from
/// one host stay distinct.
pub fn isid_with_port(isid: u64, local_port: u16) -> u64 {
    (isid & !0xffff) | u64::from(local_port)
}

/// The ISID as the 6 octets carried by a Login Request.
pub fn isid_bytes(isid: u64) -> [u8; 6] {
    let be = isid.to_be_bytes();
    [be[2], be[3], be[4], be[5], be[6], be[7]]
}

/// `<basename>:01:<local address>`, with IPv6 addresses in brackets.
pub fn auto_initiator_name(local: IpAddr) -> String {
    match local {
        IpAddr::V4(v4) => format!("{DEFAULT_INITIATOR_BASENAME}:01:{v4}"),
        IpAddr::V6(v6) => format!("{DEFAULT_INITIATOR_BASENAME}:01:[{v6}]"),
    }
}

/// Logs every non-empty segment of a packet as a hex dump.
pub fn dump_packet(target: &str, request: bool, reason: &str, segments: &[&[u8]]) {
    warn!(
        "iSCSI{{{target}}}: dumping {} packet ({reason})",
        if request { "request" } else { "response" }
    );
    for (i, seg) in segments.iter().enumerate().filter(|(_, s)| !s.is_empty()) {
        warn!(
            "iSCSI{{{target}}}: segment {i}, size {}\n{}",
            seg.len(),
            hex_dump(seg)
        );
    }
}

fn hex_dump(buf: &[u8]) -> String {
    buf.chunks(16)
        .enumerate()
        .map(|(row, chunk)| format!("{:08x}: {}", row * 16, hex::encode(chunk)))
        .collect::<Vec<_>>()
        .join("\n")
}
