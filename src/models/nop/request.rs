// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::models::{
    common::{BasicHeaderSegment, RESERVED_TAG},
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS for a NOP-Out PDU (opcode 0x00).
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct NopOutRequest {
    pub opcode: RawBhsOpcode,                // 0
    pub flags: u8,                           // 1 (always F)
    reserved1: [u8; 2],                      // 2..4
    pub total_ahs_length: u8,                // 4
    pub data_segment_length: [u8; 3],        // 5..8
    pub lun: U64<BigEndian>,                 // 8..16
    pub initiator_task_tag: U32<BigEndian>,  // 16..20
    pub target_transfer_tag: U32<BigEndian>, // 20..24
    pub cmd_sn: U32<BigEndian>,              // 24..28
    pub exp_stat_sn: U32<BigEndian>,         // 28..32
    reserved2: [u8; 16],                     // 32..48
}

impl BasicHeaderSegment for NopOutRequest {
    const OPCODE: Opcode = Opcode::NopOut;

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

/// Builder for NOP-Out.
///
/// Only the answer to a target ping is ever built here: immediate, final,
/// ITT reserved, TTT echoed back.
#[derive(Debug)]
pub struct NopOutRequestBuilder {
    pub header: NopOutRequest,
}

impl NopOutRequestBuilder {
    pub fn reply_to_ping(lun: u64, target_transfer_tag: u32) -> Self {
        let mut header = NopOutRequest {
            opcode: BhsOpcode {
                immediate: true,
                opcode: Opcode::NopOut,
            }
            .into(),
            flags: 0x80,
            ..Default::default()
        };
        header.lun.set(lun);
        header.initiator_task_tag.set(RESERVED_TAG);
        header.target_transfer_tag.set(target_transfer_tag);
        NopOutRequestBuilder { header }
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
