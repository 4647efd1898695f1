// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! First octet of every BHS: the immediate bit and a 6-bit opcode.
//!
//! ```text
//!  7   6   5 .. 0
//! | . | I | OPCODE |
//! ```

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const OPCODE_MASK: u8 = 0x3f;
pub const IMMEDIATE_BIT: u8 = 0x40;

/// RFC 7143 § 11.2.1.2
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    #[default]
    NopOut = 0x00,
    ScsiCommandReq = 0x01,
    ScsiTaskMgmtReq = 0x02,
    LoginReq = 0x03,
    TextReq = 0x04,
    ScsiDataOut = 0x05,
    LogoutReq = 0x06,
    NopIn = 0x20,
    ScsiCommandResp = 0x21,
    ScsiTaskMgmtResp = 0x22,
    LoginResp = 0x23,
    TextResp = 0x24,
    ScsiDataIn = 0x25,
    LogoutResp = 0x26,
    ReadyToTransfer = 0x31,
    AsyncMessage = 0x32,
    Reject = 0x3f,
}

impl TryFrom<u8> for Opcode {
    /// The unassigned code.
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        let op = match code & OPCODE_MASK {
            0x00 => Self::NopOut,
            0x01 => Self::ScsiCommandReq,
            0x02 => Self::ScsiTaskMgmtReq,
            0x03 => Self::LoginReq,
            0x04 => Self::TextReq,
            0x05 => Self::ScsiDataOut,
            0x06 => Self::LogoutReq,
            0x20 => Self::NopIn,
            0x21 => Self::ScsiCommandResp,
            0x22 => Self::ScsiTaskMgmtResp,
            0x23 => Self::LoginResp,
            0x24 => Self::TextResp,
            0x25 => Self::ScsiDataIn,
            0x26 => Self::LogoutResp,
            0x31 => Self::ReadyToTransfer,
            0x32 => Self::AsyncMessage,
            0x3f => Self::Reject,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// Typed form used by the request builders.
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct BhsOpcode {
    pub immediate: bool,
    pub opcode: Opcode,
}

impl From<BhsOpcode> for u8 {
    fn from(b: BhsOpcode) -> u8 {
        match b.immediate {
            true => b.opcode as u8 | IMMEDIATE_BIT,
            false => b.opcode as u8,
        }
    }
}

/// The octet as stored inside a zerocopy header.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawBhsOpcode(u8);

impl RawBhsOpcode {
    #[inline]
    pub const fn from_raw(v: u8) -> Self {
        Self(v)
    }

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_immediate(&self) -> bool {
        self.0 & IMMEDIATE_BIT != 0
    }

    #[inline]
    pub const fn opcode_raw(&self) -> u8 {
        self.0 & OPCODE_MASK
    }

    #[inline]
    pub fn opcode_known(&self) -> Option<Opcode> {
        Opcode::try_from(self.0).ok()
    }

    /// Replaces the opcode, keeping the immediate bit.
    #[inline]
    pub fn set_opcode_known(&mut self, op: Opcode) {
        self.0 = (self.0 & !OPCODE_MASK) | op as u8;
    }
}

impl From<BhsOpcode> for RawBhsOpcode {
    fn from(b: BhsOpcode) -> Self {
        Self(b.into())
    }
}

impl fmt::Debug for RawBhsOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode_known() {
            Some(op) if self.is_immediate() => write!(f, "{op:?}(I)"),
            Some(op) => write!(f, "{op:?}"),
            None => write!(f, "Opcode(0x{:02x})", self.opcode_raw()),
        }
    }
}
