//! This module defines the iSCSI PDU layouts and the codecs around them.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// SCSI Command and SCSI Response PDUs.
pub mod command;
/// Shared BHS constants, traits and the generic response view.
pub mod common;
/// Data-In PDUs and sense data.
pub mod data;
/// Login PDUs.
pub mod login;
/// Logout PDUs.
pub mod logout;
/// NOP-Out and NOP-In PDUs.
pub mod nop;
/// The iSCSI opcode enumeration.
pub mod opcode;
/// Outbound PDU builder and inbound reassembly.
pub mod pdu;
/// Serial-number arithmetic.
pub mod serial;
/// Text key=value codec.
pub mod text;
/// Structural validation of inbound PDUs.
pub mod validate;
