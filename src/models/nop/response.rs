// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::models::{
    common::{BasicHeaderSegment, RESERVED_TAG},
    opcode::{Opcode, RawBhsOpcode},
};

/// BHS for a NOP-In PDU (opcode 0x20).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct NopInResponse {
    pub opcode: RawBhsOpcode,                // 0
    pub flags: u8,                           // 1
    pub reserved1: [u8; 2],                  // 2..4
    pub total_ahs_length: u8,                // 4
    pub data_segment_length: [u8; 3],        // 5..8
    pub lun: U64<BigEndian>,                 // 8..16
    pub initiator_task_tag: U32<BigEndian>,  // 16..20
    pub target_transfer_tag: U32<BigEndian>, // 20..24
    pub stat_sn: U32<BigEndian>,             // 24..28
    pub exp_cmd_sn: U32<BigEndian>,          // 28..32
    pub max_cmd_sn: U32<BigEndian>,          // 32..36
    pub reserved2: [u8; 12],                 // 36..48
}

impl NopInResponse {
    /// Unsolicited and carrying a real TTT: the target wants a NOP-Out back.
    #[inline]
    pub fn is_ping(&self) -> bool {
        self.initiator_task_tag.get() == RESERVED_TAG
            && self.target_transfer_tag.get() != RESERVED_TAG
    }
}

impl BasicHeaderSegment for NopInResponse {
    const OPCODE: Opcode = Opcode::NopIn;

    fn raw_opcode(&self) -> RawBhsOpcode {
        self.opcode
    }

    fn total_ahs_length(&self) -> u8 {
        self.total_ahs_length
    }

    fn data_segment_length(&self) -> [u8; 3] {
        self.data_segment_length
    }
}
