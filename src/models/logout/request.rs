// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::models::{
    common::BasicHeaderSegment,
    logout::common::LogoutReason,
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS for a Logout Request PDU (opcode 0x06).
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LogoutRequest {
    pub opcode: RawBhsOpcode,               // 0
    pub reason: u8,                         // 1 (F | reason code)
    reserved1: [u8; 2],                     // 2..4
    pub total_ahs_length: u8,               // 4
    pub data_segment_length: [u8; 3],       // 5..8
    reserved2: [u8; 8],                     // 8..16
    pub initiator_task_tag: U32<BigEndian>, // 16..20
    pub cid: U16<BigEndian>,                // 20..22
    reserved3: [u8; 2],                     // 22..24
    pub cmd_sn: U32<BigEndian>,             // 24..28
    pub exp_stat_sn: U32<BigEndian>,        // 28..32
    reserved4: [u8; 16],                    // 32..48
}

impl BasicHeaderSegment for LogoutRequest {
    const OPCODE: Opcode = Opcode::LogoutReq;

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

#[derive(Debug)]
pub struct LogoutRequestBuilder {
    pub header: LogoutRequest,
}

impl LogoutRequestBuilder {
    pub fn new(reason: LogoutReason, itt: u32) -> Self {
        let mut header = LogoutRequest {
            opcode: BhsOpcode {
                immediate: false,
                opcode: Opcode::LogoutReq,
            }
            .into(),
            reason: 0x80 | reason as u8,
            ..Default::default()
        };
        header.initiator_task_tag.set(itt);
        LogoutRequestBuilder { header }
    }

    /// Only meaningful when a single connection is being closed.
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
