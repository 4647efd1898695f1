// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::models::{
    common::BasicHeaderSegment,
    login::{
        common::RawLoginFlags,
        status::{InitiatorErrorDetail, StatusClass},
    },
    opcode::{Opcode, RawBhsOpcode},
};

/// BHS of a Login Response PDU (opcode 0x23).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LoginResponse {
    pub opcode: RawBhsOpcode,               // 0
    pub flags: RawLoginFlags,               // 1
    pub version_max: u8,                    // 2
    pub version_active: u8,                 // 3
    pub total_ahs_length: u8,               // 4
    pub data_segment_length: [u8; 3],       // 5..8
    pub isid: [u8; 6],                      // 8..14
    pub tsih: U16<BigEndian>,               // 14..16
    pub initiator_task_tag: U32<BigEndian>, // 16..20
    pub reserved1: [u8; 4],                 // 20..24
    pub stat_sn: U32<BigEndian>,            // 24..28
    pub exp_cmd_sn: U32<BigEndian>,         // 28..32
    pub max_cmd_sn: U32<BigEndian>,         // 32..36
    pub status_class: u8,                   // 36
    pub status_detail: u8,                  // 37
    pub reserved2: [u8; 10],                // 38..48
}

impl LoginResponse {
    #[inline]
    pub fn class(&self) -> StatusClass {
        StatusClass::from(self.status_class)
    }

    #[inline]
    pub fn initiator_error(&self) -> InitiatorErrorDetail {
        InitiatorErrorDetail::from(self.status_detail)
    }
}

impl BasicHeaderSegment for LoginResponse {
    const OPCODE: Opcode = Opcode::LoginResp;

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
