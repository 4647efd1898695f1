//! This module holds the session engine: transport, connection bookkeeping,
//! the command pipeline and the public `Session` handle.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Caller-facing SCSI requests and the engine's per-command state.
pub mod command;
/// In-flight commands keyed by task tag.
pub mod command_table;
/// Small helpers shared by the client modules.
pub mod common;
/// Sequence numbers, addressing and blocking PDU exchange for login/logout.
pub mod connection;
/// The I/O engine that owns the connection while the session is in
/// full-feature phase.
pub mod engine;
/// Public session handle.
pub mod session;
/// Non-blocking TCP transport.
pub mod transport;
