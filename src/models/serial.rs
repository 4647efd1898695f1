// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! RFC 1982 serial-number arithmetic for 32-bit CmdSN / StatSN values.
//!
//! Two numbers exactly 2^31 apart are incomparable: neither is less nor
//! greater than the other.

const HALF: u32 = 0x8000_0000;

/// `s1 < s2` in serial space.
#[inline]
pub const fn serial_less(s1: u32, s2: u32) -> bool {
    (s1 < s2 && s2 - s1 < HALF) || (s1 > s2 && s1 - s2 > HALF)
}

/// `s1 > s2` in serial space.
#[inline]
pub const fn serial_greater(s1: u32, s2: u32) -> bool {
    (s1 < s2 && s2 - s1 > HALF) || (s1 > s2 && s1 - s2 < HALF)
}
