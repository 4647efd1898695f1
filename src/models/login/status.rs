//! Status codes of the Login Response PDU.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// The status classes as per RFC 7143 § 11.13.5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// target accepted the request
    Success,
    /// initiator must follow TargetAddress
    Redirection,
    /// mistake on initiator side; do not retry
    InitiatorError,
    /// target cannot fulfil the request
    TargetError,
    Unknown(u8),
}

impl From<u8> for StatusClass {
    fn from(b: u8) -> Self {
        match b {
            0 => StatusClass::Success,
            1 => StatusClass::Redirection,
            2 => StatusClass::InitiatorError,
            3 => StatusClass::TargetError,
            other => StatusClass::Unknown(other),
        }
    }
}

impl From<StatusClass> for u8 {
    fn from(class: StatusClass) -> Self {
        match class {
            StatusClass::Success => 0x00,
            StatusClass::Redirection => 0x01,
            StatusClass::InitiatorError => 0x02,
            StatusClass::TargetError => 0x03,
            StatusClass::Unknown(v) => v,
        }
    }
}

/// Status-Detail for Status-Class = 0x02 (Initiator Error)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorErrorDetail {
    InitiatorError = 0x00,
    AuthFailed = 0x01,
    AuthzFailed = 0x02,
    NotFound = 0x03,
    TargetRemoved = 0x04,
    UnsupportedVersion = 0x05,
    TooManyConnections = 0x06,
    MissingParameter = 0x07,
    CantIncludeInSession = 0x08,
    SessionTypeNotSupported = 0x09,
    SessionDoesNotExist = 0x0a,
    InvalidDuringLogin = 0x0b,
    Reserved(u8),
}

impl From<u8> for InitiatorErrorDetail {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => InitiatorErrorDetail::InitiatorError,
            0x01 => InitiatorErrorDetail::AuthFailed,
            0x02 => InitiatorErrorDetail::AuthzFailed,
            0x03 => InitiatorErrorDetail::NotFound,
            0x04 => InitiatorErrorDetail::TargetRemoved,
            0x05 => InitiatorErrorDetail::UnsupportedVersion,
            0x06 => InitiatorErrorDetail::TooManyConnections,
            0x07 => InitiatorErrorDetail::MissingParameter,
            0x08 => InitiatorErrorDetail::CantIncludeInSession,
            0x09 => InitiatorErrorDetail::SessionTypeNotSupported,
            0x0a => InitiatorErrorDetail::SessionDoesNotExist,
            0x0b => InitiatorErrorDetail::InvalidDuringLogin,
            other => InitiatorErrorDetail::Reserved(other),
        }
    }
}

impl InitiatorErrorDetail {
    /// Human readable text used in logs and in the returned error.
    pub const fn describe(self) -> &'static str {
        match self {
            InitiatorErrorDetail::InitiatorError => "Miscellaneous iSCSI initiator error",
            InitiatorErrorDetail::AuthFailed => "Authentication failure",
            InitiatorErrorDetail::AuthzFailed => "Authorization failure",
            InitiatorErrorDetail::NotFound => "Not found",
            InitiatorErrorDetail::TargetRemoved => "Target removed",
            InitiatorErrorDetail::UnsupportedVersion => "Unsupported version",
            InitiatorErrorDetail::TooManyConnections => "Too many connections",
            InitiatorErrorDetail::MissingParameter => "Missing parameter",
            InitiatorErrorDetail::CantIncludeInSession => "Can't include in session",
            InitiatorErrorDetail::SessionTypeNotSupported => "Session type not supported",
            InitiatorErrorDetail::SessionDoesNotExist => "Session does not exist",
            InitiatorErrorDetail::InvalidDuringLogin => {
                "Invalid request type during login"
            },
            InitiatorErrorDetail::Reserved(_) => "Unknown status detail",
        }
    }
}
