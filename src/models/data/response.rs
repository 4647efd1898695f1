// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::models::{
    command::common::ScsiCommandResponseFlags,
    common::BasicHeaderSegment,
    opcode::{Opcode, RawBhsOpcode},
};

/// BHS for SCSI Data-In (opcode 0x25)
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ScsiDataIn {
    pub opcode: RawBhsOpcode,                // 0
    pub flags: u8,                           // 1  (F,A,0,0,0,O,U,S)
    pub reserved2: u8,                       // 2
    pub status_or_rsvd: u8,                  // 3  SCSI status when S=1
    pub total_ahs_length: u8,                // 4
    pub data_segment_length: [u8; 3],        // 5..8
    pub lun: U64<BigEndian>,                 // 8..16
    pub initiator_task_tag: U32<BigEndian>,  // 16..20
    pub target_transfer_tag: U32<BigEndian>, // 20..24
    pub stat_sn_or_rsvd: U32<BigEndian>,     // 24..28 StatSN when S=1
    pub exp_cmd_sn: U32<BigEndian>,          // 28..32
    pub max_cmd_sn: U32<BigEndian>,          // 32..36
    pub data_sn: U32<BigEndian>,             // 36..40
    pub buffer_offset: U32<BigEndian>,       // 40..44
    pub residual_count: U32<BigEndian>,      // 44..48
}

impl ScsiDataIn {
    #[inline]
    pub fn flags(&self) -> ScsiCommandResponseFlags {
        ScsiCommandResponseFlags::from_bits_retain(self.flags)
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.flags().contains(ScsiCommandResponseFlags::FINAL)
    }

    /// SCSI status, present only together with the S bit.
    #[inline]
    pub fn scsi_status(&self) -> Option<u8> {
        self.flags()
            .contains(ScsiCommandResponseFlags::S)
            .then_some(self.status_or_rsvd)
    }
}

impl BasicHeaderSegment for ScsiDataIn {
    const OPCODE: Opcode = Opcode::ScsiDataIn;

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
