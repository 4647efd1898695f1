// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::{
    error::{IscsiError, Result},
    models::{
        command::common::{ScsiCommandRequestFlags, TaskAttribute, TransferDirection},
        common::{BasicHeaderSegment, encode_data_length},
        opcode::{BhsOpcode, Opcode, RawBhsOpcode},
    },
};

/// Largest CDB that fits in the BHS without an extended-CDB AHS.
pub const MAX_CDB_LEN: usize = 16;

/// BHS of a SCSI Command PDU (opcode 0x01).
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ScsiCommandRequest {
    pub opcode: RawBhsOpcode,                          // 0
    pub flags: u8,                                     // 1
    reserved1: [u8; 2],                                // 2..4
    pub total_ahs_length: u8,                          // 4
    pub data_segment_length: [u8; 3],                  // 5..8
    pub lun: U64<BigEndian>,                           // 8..16
    pub initiator_task_tag: U32<BigEndian>,            // 16..20
    pub expected_data_transfer_length: U32<BigEndian>, // 20..24
    pub cmd_sn: U32<BigEndian>,                        // 24..28
    pub exp_stat_sn: U32<BigEndian>,                   // 28..32
    pub scsi_descriptor_block: [u8; MAX_CDB_LEN],      // 32..48
}

impl BasicHeaderSegment for ScsiCommandRequest {
    const OPCODE: Opcode = Opcode::ScsiCommandReq;

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

/// Builder for the SCSI Command BHS.
#[derive(Debug)]
pub struct ScsiCommandRequestBuilder {
    pub header: ScsiCommandRequest,
}

impl Default for ScsiCommandRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScsiCommandRequestBuilder {
    /// Final, SIMPLE task attribute, no data direction.
    pub fn new() -> Self {
        let flags = ScsiCommandRequestFlags::FINAL.bits() | TaskAttribute::Simple as u8;
        ScsiCommandRequestBuilder {
            header: ScsiCommandRequest {
                opcode: BhsOpcode {
                    immediate: false,
                    opcode: Opcode::ScsiCommandReq,
                }
                .into(),
                flags,
                ..Default::default()
            },
        }
    }

    pub fn direction(mut self, dir: TransferDirection) -> Self {
        self.header.flags |= dir.request_flags().bits();
        self
    }

    pub fn lun(mut self, lun: u64) -> Self {
        self.header.lun.set(lun);
        self
    }

    pub fn initiator_task_tag(mut self, tag: u32) -> Self {
        self.header.initiator_task_tag.set(tag);
        self
    }

    pub fn expected_data_transfer_length(mut self, len: u32) -> Self {
        self.header.expected_data_transfer_length.set(len);
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

    /// Copies the CDB into bytes 32..48; longer CDBs are rejected.
    pub fn scsi_descriptor_block(mut self, cdb: &[u8]) -> Result<Self> {
        if cdb.len() > MAX_CDB_LEN {
            return Err(IscsiError::BufferOverflow);
        }
        self.header.scsi_descriptor_block = [0u8; MAX_CDB_LEN];
        self.header.scsi_descriptor_block[..cdb.len()].copy_from_slice(cdb);
        Ok(self)
    }
}
