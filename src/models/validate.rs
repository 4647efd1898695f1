// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Structural checks on inbound PDUs that do not depend on session state.

use crate::{
    error::{IscsiError, Result},
    models::{
        command::common::ScsiCommandResponseFlags as RespFlags,
        common::{RESERVED_TAG, ResponseHeader},
        login::common::LoginFlags,
        opcode::Opcode,
        serial::serial_less,
    },
};

const FINAL: u8 = 0x80;
const CONTINUE: u8 = 0x40;

/// Rejects target PDUs whose header contradicts itself.
///
/// Opcodes this initiator never expects (task management responses, R2T,
/// Reject, unknown) are rejected as well.
pub fn validate_pdu(hdr: &ResponseHeader) -> Result<()> {
    let flags = hdr.flags;
    let is_final = flags & FINAL != 0;
    let no_segments = hdr.total_ahs_length == 0 && hdr.data_length_bytes() == 0;
    let opcode = hdr.opcode();

    let ok = match opcode {
        Some(Opcode::NopIn) => {
            is_final
                && !(hdr.itt() == RESERVED_TAG && !no_segments)
                && !(hdr.itt() != RESERVED_TAG && hdr.ttt() != RESERVED_TAG)
        },
        Some(Opcode::ScsiCommandResp) => {
            let f = RespFlags::from_bits_retain(flags);
            let good_status = hdr.byte2 == 0 && hdr.byte3 == 0;
            is_final
                && !f.contains(RespFlags::O_SMALL | RespFlags::U_SMALL)
                && !f.contains(RespFlags::O_BIG | RespFlags::U_BIG)
                && !(good_status
                    && f.intersects(RespFlags::O_SMALL | RespFlags::U_SMALL | RespFlags::O_BIG))
        },
        Some(Opcode::LoginResp) => {
            !LoginFlags::from_bits_retain(flags)
                .contains(LoginFlags::TRANSIT | LoginFlags::CONTINUE)
        },
        Some(Opcode::TextResp) => {
            let cont = flags & CONTINUE != 0;
            !(cont && is_final)
                && !(is_final && hdr.ttt() != RESERVED_TAG)
                && !(!is_final && hdr.ttt() == RESERVED_TAG)
        },
        Some(Opcode::ScsiDataIn) => {
            let f = RespFlags::from_bits_retain(flags);
            !(f.contains(RespFlags::S) && f.contains(RespFlags::O_BIG | RespFlags::U_BIG))
        },
        Some(Opcode::LogoutResp) => is_final && no_segments,
        Some(Opcode::AsyncMessage) => is_final && hdr.itt() == RESERVED_TAG,
        _ => false,
    };

    if !ok {
        return Err(IscsiError::parse(format!(
            "invalid {:?} header (opcode 0x{:02x}, flags 0x{:02x})",
            opcode,
            hdr.opcode.opcode_raw(),
            flags
        )));
    }

    // A target must not send MaxCmdSN < ExpCmdSN - 1.
    if serial_less(hdr.max_cmd_sn.get(), hdr.exp_cmd_sn.get().wrapping_sub(1)) {
        return Err(IscsiError::parse(format!(
            "MaxCmdSN {} below ExpCmdSN {} - 1",
            hdr.max_cmd_sn.get(),
            hdr.exp_cmd_sn.get()
        )));
    }

    Ok(())
}
