// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use crate::error::{IscsiError, Result};

/// Fixed-format sense must reach at least the ASCQ byte.
pub const FIXED_MIN_LEN: usize = 14;
/// Descriptor-format sense header length.
pub const DESCRIPTOR_MIN_LEN: usize = 8;

/// Summary of a sense buffer (SPC-4 § 4.5), fixed or descriptor format.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct SenseData {
    pub response_code: u8, // low 7 bits of byte0
    pub sense_key: u8,
    pub asc: u8,  // Additional Sense Code
    pub ascq: u8, // Additional Sense Code Qualifier
    /// Information field, fixed format with VALID set only.
    pub information: Option<u32>,
}

impl SenseData {
    /// Parses the sense bytes carried by a SCSI Response (the two-byte
    /// SenseLength prefix already stripped).
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let code = buf
            .first()
            .map(|b| b & 0x7F)
            .ok_or_else(|| IscsiError::MalformedValue("empty sense buffer".into()))?;

        match code {
            0x70 | 0x71 => {
                if buf.len() < FIXED_MIN_LEN {
                    return Err(IscsiError::MalformedValue(format!(
                        "fixed sense too short: {} < {FIXED_MIN_LEN}",
                        buf.len()
                    )));
                }
                let valid = buf[0] & 0x80 != 0;
                Ok(Self {
                    response_code: code,
                    sense_key: buf[2] & 0x0F,
                    asc: buf[12],
                    ascq: buf[13],
                    information: valid
                        .then(|| u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]])),
                })
            },
            0x72 | 0x73 => {
                if buf.len() < DESCRIPTOR_MIN_LEN {
                    return Err(IscsiError::MalformedValue(format!(
                        "descriptor sense too short: {} < {DESCRIPTOR_MIN_LEN}",
                        buf.len()
                    )));
                }
                Ok(Self {
                    response_code: code,
                    sense_key: buf[1] & 0x0F,
                    asc: buf[2],
                    ascq: buf[3],
                    information: None,
                })
            },
            other => Err(IscsiError::MalformedValue(format!(
                "unknown sense response code {other:#04x}"
            ))),
        }
    }
}

impl fmt::Debug for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenseData")
            .field(
                "response_code",
                &format_args!("{:#04x}", self.response_code),
            )
            .field("sense_key", &format_args!("{:#x}", self.sense_key))
            .field("asc", &format_args!("{:#04x}", self.asc))
            .field("ascq", &format_args!("{:#04x}", self.ascq))
            .field("information", &self.information)
            .field("description", &asc_ascq_to_str(self.asc, self.ascq))
            .finish()
    }
}

/// Return the SPC-4 description for a given ASC/ASCQ pair.
#[inline]
pub fn asc_ascq_to_str(asc: u8, ascq: u8) -> &'static str {
    hot_table(asc, ascq).unwrap_or("UNSPECIFIED / vendor specific")
}

fn hot_table(asc: u8, ascq: u8) -> Option<&'static str> {
    Some(match (asc, ascq) {
        (0x00, 0x00) => "No additional sense information",
        (0x04, 0x01) => "Logical unit is in process of becoming ready",
        (0x04, 0x02) => "Logical unit not ready, initializing command required",
        (0x11, 0x00) => "Unrecovered read error",
        (0x20, 0x00) => "Invalid command operation code",
        (0x21, 0x00) => "Logical block address out of range",
        (0x24, 0x00) => "Invalid field in CDB",
        (0x25, 0x00) => "Logical unit not supported",
        (0x28, 0x00) => "Not ready to ready change, medium may have changed",
        (0x29, 0x00) => "Power on, reset, or bus device reset occurred",
        (0x2A, 0x09) => "Capacity data has changed",
        (0x3A, 0x00) => "Medium not present",
        _ => return None,
    })
}
