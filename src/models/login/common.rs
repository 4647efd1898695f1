// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

bitflags::bitflags! {
    /// Byte 1 of Login Request / Response (RFC 7143 § 11.12.1).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct LoginFlags: u8 {
        const TRANSIT = 0x80;
        const CONTINUE = 0x40;
        const CSG_MASK = 0b0000_1100;
        const NSG_MASK = 0b0000_0011;
    }
}

/// Login stage codes carried in CSG / NSG.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    #[default]
    Security = 0,
    Operational = 1,
    FullFeature = 3,
}

impl TryFrom<u8> for Stage {
    type Error = u8;

    fn try_from(bits: u8) -> Result<Self, u8> {
        match bits {
            0 => Ok(Stage::Security),
            1 => Ok(Stage::Operational),
            3 => Ok(Stage::FullFeature),
            other => Err(other),
        }
    }
}

/// The Login flags octet as it sits in the BHS.
#[repr(transparent)]
#[derive(
    Copy, Clone, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable,
)]
pub struct RawLoginFlags(u8);

impl RawLoginFlags {
    #[inline]
    pub const fn from_raw(v: u8) -> Self {
        Self(v)
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    fn bits(self) -> LoginFlags {
        LoginFlags::from_bits_retain(self.0)
    }

    #[inline]
    pub fn transit(self) -> bool {
        self.bits().contains(LoginFlags::TRANSIT)
    }

    pub fn set_transit(&mut self) {
        self.0 |= LoginFlags::TRANSIT.bits();
    }

    /// Current stage; `None` for the reserved code 2.
    #[inline]
    pub fn csg(self) -> Option<Stage> {
        Stage::try_from((self.0 & LoginFlags::CSG_MASK.bits()) >> 2).ok()
    }

    /// Next stage; only meaningful with the transit bit set.
    #[inline]
    pub fn nsg(self) -> Option<Stage> {
        Stage::try_from(self.0 & LoginFlags::NSG_MASK.bits()).ok()
    }

    pub fn set_csg(&mut self, s: Stage) {
        self.0 = (self.0 & !LoginFlags::CSG_MASK.bits()) | ((s as u8) << 2);
    }

    pub fn set_nsg(&mut self, s: Stage) {
        self.0 = (self.0 & !LoginFlags::NSG_MASK.bits()) | s as u8;
    }
}

impl fmt::Debug for RawLoginFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginFlags")
            .field("transit", &self.transit())
            .field("continue", &self.bits().contains(LoginFlags::CONTINUE))
            .field("csg", &self.csg())
            .field("nsg", &self.nsg())
            .finish()
    }
}
