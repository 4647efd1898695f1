// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::models::{
    common::{BasicHeaderSegment, PROTOCOL_VERSION},
    login::common::{RawLoginFlags, Stage},
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS of a Login Request PDU (opcode 0x03, always immediate).
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LoginRequest {
    pub opcode: RawBhsOpcode,               // 0
    pub flags: RawLoginFlags,               // 1
    pub version_max: u8,                    // 2
    pub version_min: u8,                    // 3
    pub total_ahs_length: u8,               // 4
    pub data_segment_length: [u8; 3],       // 5..8
    pub isid: [u8; 6],                      // 8..14
    pub tsih: U16<BigEndian>,               // 14..16
    pub initiator_task_tag: U32<BigEndian>, // 16..20
    pub cid: U16<BigEndian>,                // 20..22
    reserved1: [u8; 2],                     // 22..24
    pub cmd_sn: U32<BigEndian>,             // 24..28
    pub exp_stat_sn: U32<BigEndian>,        // 28..32
    reserved2: [u8; 16],                    // 32..48
}

impl BasicHeaderSegment for LoginRequest {
    const OPCODE: Opcode = Opcode::LoginReq;

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

/// Builder for the Login Request BHS.
#[derive(Debug, Default)]
pub struct LoginRequestBuilder {
    pub header: LoginRequest,
}

impl LoginRequestBuilder {
    pub fn new(isid: [u8; 6], tsih: u16) -> Self {
        LoginRequestBuilder {
            header: LoginRequest {
                opcode: BhsOpcode {
                    immediate: true,
                    opcode: Opcode::LoginReq,
                }
                .into(),
                version_max: PROTOCOL_VERSION,
                version_min: PROTOCOL_VERSION,
                isid,
                tsih: U16::new(tsih),
                ..Default::default()
            },
        }
    }

    /// Current stage.
    pub fn csg(mut self, stage: Stage) -> Self {
        self.header.flags.set_csg(stage);
        self
    }

    /// Request a transition to `stage` (sets T and NSG together).
    pub fn transit_to(mut self, stage: Stage) -> Self {
        self.header.flags.set_transit();
        self.header.flags.set_nsg(stage);
        self
    }

    pub fn initiator_task_tag(mut self, tag: u32) -> Self {
        self.header.initiator_task_tag.set(tag);
        self
    }

    pub fn connection_id(mut self, cid: u16) -> Self {
        self.header.cid.set(cid);
        self
    }

    pub fn cmd_sn(mut self, sn: u32) -> Self {
        self.header.cmd_sn.set(sn);
        self
    }

    pub fn exp_stat_sn(mut self, sn: u32) -> Self {
        self.header.exp_stat_sn.set(sn);
        self
    }
}
