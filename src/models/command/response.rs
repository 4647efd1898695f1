// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32};

use crate::models::{
    command::common::ScsiCommandResponseFlags,
    common::BasicHeaderSegment,
    opcode::{Opcode, RawBhsOpcode},
};

/// BHS of a SCSI Response PDU (opcode 0x21).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ScsiCommandResponse {
    pub opcode: RawBhsOpcode,                        // 0
    pub flags: u8,                                   // 1
    pub response: u8,                                // 2
    pub status: u8,                                  // 3
    pub total_ahs_length: u8,                        // 4
    pub data_segment_length: [u8; 3],                // 5..8
    pub reserved: [u8; 8],                           // 8..16
    pub initiator_task_tag: U32<BigEndian>,          // 16..20
    pub snack_tag: U32<BigEndian>,                   // 20..24
    pub stat_sn: U32<BigEndian>,                     // 24..28
    pub exp_cmd_sn: U32<BigEndian>,                  // 28..32
    pub max_cmd_sn: U32<BigEndian>,                  // 32..36
    pub exp_data_sn: U32<BigEndian>,                 // 36..40
    pub bidirectional_read_residual_count: U32<BigEndian>, // 40..44
    pub residual_count: U32<BigEndian>,              // 44..48
}

impl ScsiCommandResponse {
    #[inline]
    pub fn flags(&self) -> ScsiCommandResponseFlags {
        ScsiCommandResponseFlags::from_bits_retain(self.flags)
    }
}

impl BasicHeaderSegment for ScsiCommandResponse {
    const OPCODE: Opcode = Opcode::ScsiCommandResp;

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
