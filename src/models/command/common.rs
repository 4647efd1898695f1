// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

bitflags::bitflags! {
    /// Byte 1 of a SCSI Command PDU; the low three bits hold the task
    /// attribute.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ScsiCommandRequestFlags: u8 {
        const FINAL = 0x80;
        const READ = 0x40;
        const WRITE = 0x20;
        const ATTR_MASK = 0x07;
    }
}

/// SCSI Task Attributes; this initiator only issues `Simple`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskAttribute {
    Untagged = 0,
    Simple = 1,
    Ordered = 2,
    HeadOfQueue = 3,
    Aca = 4,
}

bitflags::bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    /// Flags octet of a SCSI Response / Data-In PDU.
    pub struct ScsiCommandResponseFlags: u8 {
        const FINAL     = 0b1000_0000;
        /// Bidir Read Residual Overflow (o)
        const O_SMALL = 0b0001_0000;
        /// Bidir Read Residual Underflow (u)
        const U_SMALL = 0b0000_1000;
        /// Residual Overflow (O)
        const O_BIG = 0b0000_0100;
        /// Residual Underflow (U)
        const U_BIG = 0b0000_0010;
        /// Status present (Data-In only)
        const S = 0b0000_0001;
    }
}

/// Direction of the data phase of a SCSI command, seen from the initiator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    #[default]
    None,
    /// Write: initiator to target.
    ToTarget,
    /// Read: target to initiator.
    FromTarget,
}

impl TransferDirection {
    pub fn request_flags(self) -> ScsiCommandRequestFlags {
        match self {
            TransferDirection::None => ScsiCommandRequestFlags::empty(),
            TransferDirection::ToTarget => ScsiCommandRequestFlags::WRITE,
            TransferDirection::FromTarget => ScsiCommandRequestFlags::READ,
        }
    }
}
