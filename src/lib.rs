//! This crate provides an asynchronous iSCSI initiator session engine:
//! login with optional CHAP, a windowed SCSI command pipeline and
//! transparent reconnect.
// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Handles configuration and logging.
pub mod cfg;
/// Transport, connection and session engine.
pub mod client;
/// Error type shared by the whole crate.
pub mod error;
/// Defines the data structures for iSCSI PDUs.
pub mod models;
/// Contains state machines for the Login and Logout phases.
pub mod state_machine;
/// Provides utility functions used throughout the crate.
pub mod utils;
