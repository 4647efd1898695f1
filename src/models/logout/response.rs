// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::models::{
    common::BasicHeaderSegment,
    logout::common::LogoutResponseCode,
    opcode::{Opcode, RawBhsOpcode},
};

/// BHS for a Logout Response PDU (opcode 0x26).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LogoutResponse {
    pub opcode: RawBhsOpcode,               // 0
    pub flags: u8,                          // 1
    pub response: u8,                       // 2
    pub reserved1: u8,                      // 3
    pub total_ahs_length: u8,               // 4
    pub data_segment_length: [u8; 3],       // 5..8
    pub reserved2: [u8; 8],                 // 8..16
    pub initiator_task_tag: U32<BigEndian>, // 16..20
    pub reserved3: [u8; 4],                 // 20..24
    pub stat_sn: U32<BigEndian>,            // 24..28
    pub exp_cmd_sn: U32<BigEndian>,         // 28..32
    pub max_cmd_sn: U32<BigEndian>,         // 32..36
    pub reserved4: [u8; 4],                 // 36..40
    pub time2wait: U16<BigEndian>,          // 40..42
    pub time2retain: U16<BigEndian>,        // 42..44
    pub reserved5: [u8; 4],                 // 44..48
}

impl LogoutResponse {
    #[inline]
    pub fn response_code(&self) -> LogoutResponseCode {
        LogoutResponseCode::from(self.response)
    }

    /// Final bit set, successful, no reserved bits in the first word.
    pub fn is_clean_success(&self) -> bool {
        self.flags == 0x80 && self.response == 0 && self.reserved1 == 0
    }
}

impl BasicHeaderSegment for LogoutResponse {
    const OPCODE: Opcode = Opcode::LogoutResp;

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
