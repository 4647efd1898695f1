//! NOP-Out / NOP-In PDUs.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// NOP-Out BHS and builder.
pub mod request;
/// NOP-In BHS.
pub mod response;
