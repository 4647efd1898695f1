// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// iSCSI Logout Reason Code (low 7 bits of byte 1). A single-connection
/// session only ever closes the whole session.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum LogoutReason {
    #[default]
    CloseSession = 0x00,
}

/// Logout Response code (byte 2)
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LogoutResponseCode {
    Success,
    CidNotFound,
    RecoveryNotSupported,
    CleanupFailed,
    Other(u8),
}

impl From<u8> for LogoutResponseCode {
    fn from(v: u8) -> Self {
        match v {
            0x00 => LogoutResponseCode::Success,
            0x01 => LogoutResponseCode::CidNotFound,
            0x02 => LogoutResponseCode::RecoveryNotSupported,
            0x03 => LogoutResponseCode::CleanupFailed,
            other => LogoutResponseCode::Other(other),
        }
    }
}
