// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::{
    error::{IscsiError, Result},
    models::opcode::{Opcode, RawBhsOpcode},
};

/// Size of every Basic Header Segment.
pub const HEADER_LEN: usize = 48;
/// The reserved task tag (`0xffffffff`), never handed out as an ITT.
pub const RESERVED_TAG: u32 = 0xffff_ffff;
/// Largest data segment this initiator sends or accepts.
pub const MAX_DATA_SEGMENT_LENGTH: u32 = 256 * 1024;
/// Well-known iSCSI port.
pub const DEFAULT_PORT: u16 = 3260;
/// The only protocol version understood on the wire.
pub const PROTOCOL_VERSION: u8 = 0;

/// Bytes needed to pad `n` up to a 4-byte boundary.
#[inline]
pub const fn pad_len(n: usize) -> usize {
    (4 - (n % 4)) % 4
}

#[inline]
pub fn decode_data_length(raw: &[u8; 3]) -> usize {
    u32::from_be_bytes([0, raw[0], raw[1], raw[2]]) as usize
}

#[inline]
pub fn encode_data_length(len: u32) -> [u8; 3] {
    let be = len.to_be_bytes();
    [be[1], be[2], be[3]]
}

/// Common functionality for any zero-copy BHS view.
///
/// Implementors are `#[repr(C)]` structs of exactly [`HEADER_LEN`] bytes
/// whose first octet is the opcode.
pub trait BasicHeaderSegment: ZFromBytes + IntoBytes + KnownLayout + Immutable {
    const OPCODE: Opcode;

    fn raw_opcode(&self) -> RawBhsOpcode;

    fn total_ahs_length(&self) -> u8;

    fn data_segment_length(&self) -> [u8; 3];

    /// Number of extra AHS bytes (always a multiple of 4).
    fn ahs_length_bytes(&self) -> usize {
        self.total_ahs_length() as usize * 4
    }

    /// Number of payload bytes in the DataSegment, without padding.
    fn data_length_bytes(&self) -> usize {
        decode_data_length(&self.data_segment_length())
    }

    /// Borrow a typed view over the first 48 bytes, checking the opcode.
    fn from_bhs_bytes(buf: &[u8]) -> Result<&Self>
    where Self: Sized {
        let head = buf
            .get(..HEADER_LEN)
            .ok_or_else(|| IscsiError::parse("buffer shorter than a BHS"))?;
        let hdr = Self::ref_from_bytes(head)
            .map_err(|_| IscsiError::parse("BHS layout mismatch"))?;
        match hdr.raw_opcode().opcode_known() {
            Some(op) if op == Self::OPCODE => Ok(hdr),
            _ => Err(IscsiError::parse(format!(
                "expected {:?}, got opcode 0x{:02x}",
                Self::OPCODE,
                hdr.raw_opcode().opcode_raw()
            ))),
        }
    }
}

/// Layout shared by every target→initiator BHS.
///
/// Fields that differ per opcode are kept as raw octets; the typed views in
/// the per-PDU modules give them names.
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ResponseHeader {
    pub opcode: RawBhsOpcode,                 // 0
    pub flags: u8,                            // 1
    pub byte2: u8,                            // 2
    pub byte3: u8,                            // 3
    pub total_ahs_length: u8,                 // 4
    pub data_segment_length: [u8; 3],         // 5..8
    pub lun: U64<BigEndian>,                  // 8..16
    pub initiator_task_tag: U32<BigEndian>,   // 16..20
    pub target_transfer_tag: U32<BigEndian>,  // 20..24
    pub stat_sn: U32<BigEndian>,              // 24..28
    pub exp_cmd_sn: U32<BigEndian>,           // 28..32
    pub max_cmd_sn: U32<BigEndian>,           // 32..36
    pub opcode_specific: [u8; 12],            // 36..48
}

impl ResponseHeader {
    /// Copies the generic view out of a BHS buffer without checking the
    /// opcode.
    pub fn read(buf: &[u8]) -> Result<Self> {
        let head = buf
            .get(..HEADER_LEN)
            .ok_or_else(|| IscsiError::parse("buffer shorter than a BHS"))?;
        Self::read_from_bytes(head).map_err(|_| IscsiError::parse("BHS layout mismatch"))
    }

    #[inline]
    pub fn opcode(&self) -> Option<Opcode> {
        self.opcode.opcode_known()
    }

    #[inline]
    pub fn itt(&self) -> u32 {
        self.initiator_task_tag.get()
    }

    #[inline]
    pub fn ttt(&self) -> u32 {
        self.target_transfer_tag.get()
    }

    #[inline]
    pub fn data_length_bytes(&self) -> usize {
        decode_data_length(&self.data_segment_length)
    }

    #[inline]
    pub fn ahs_length_bytes(&self) -> usize {
        self.total_ahs_length as usize * 4
    }

    /// Length of AHS + DataSegment on the wire, padding included.
    pub fn body_length_bytes(&self) -> usize {
        let ahs = self.ahs_length_bytes();
        let data = self.data_length_bytes();
        ahs + pad_len(ahs) + data + pad_len(data)
    }

    #[inline]
    pub fn set_data_length_bytes(&mut self, len: u32) {
        self.data_segment_length = encode_data_length(len);
    }
}
