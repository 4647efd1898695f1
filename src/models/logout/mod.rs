//! Logout Request / Response PDUs.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Reason and response codes.
pub mod common;
/// Logout Request BHS and builder.
pub mod request;
/// Logout Response BHS.
pub mod response;
