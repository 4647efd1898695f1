//! Error kinds surfaced by the session engine.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io;

use thiserror::Error;

pub type Result<T, E = IscsiError> = std::result::Result<T, E>;

/// Everything that can go wrong between a caller and the target.
///
/// Connection failures are normalized: any read/write failure becomes
/// [`IscsiError::BrokenPipe`] and any connect failure becomes
/// [`IscsiError::ConnectionRefused`], so recovery code only matches on kinds.
#[derive(Debug, Error)]
pub enum IscsiError {
    #[error("connection broken")]
    BrokenPipe,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("operation timed out")]
    Timeout,

    #[error("malformed PDU: {0}")]
    ProtocolParse(String),

    /// Target asked us to log in somewhere else.
    #[error("login redirected to {0}")]
    Redirect(String),
    /// Transport dropped while waiting for a login response.
    #[error("login interrupted by disconnect, retry")]
    RetryAfterDisconnect,
    #[error("login rejected by target: {0}")]
    LoginInitiatorError(&'static str),
    #[error("login failed with a target error (detail 0x{0:02x})")]
    LoginTargetError(u8),

    #[error("buffer overflow")]
    BufferOverflow,
    #[error("key {0} not found")]
    KeyNotFound(String),
    #[error("malformed value: {0}")]
    MalformedValue(String),
    #[error("invalid target address: {0}")]
    InvalidAddress(String),

    /// Command finished with sense data after the retry budget ran out.
    #[error("check condition (status 0x{status:02x}, {} sense bytes)", sense.len())]
    CheckCondition { status: u8, sense: Vec<u8> },

    #[error("session is shut down")]
    SessionClosed,
    #[error("invalid session state for {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Io(io::Error),
}

impl IscsiError {
    /// Maps a socket error from an established connection.
    pub fn from_stream_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut => IscsiError::BrokenPipe,
            _ => IscsiError::Io(e),
        }
    }

    /// Maps a failure of `connect()`. A connect timeout stays a timeout.
    pub fn from_connect_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable => IscsiError::ConnectionRefused,
            io::ErrorKind::TimedOut => IscsiError::Timeout,
            _ => IscsiError::Io(e),
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, IscsiError::BrokenPipe | IscsiError::ConnectionRefused)
    }

    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        IscsiError::ProtocolParse(msg.into())
    }
}

impl From<io::Error> for IscsiError {
    fn from(e: io::Error) -> Self {
        IscsiError::from_stream_io(e)
    }
}
