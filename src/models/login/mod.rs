//! Login Request / Response PDUs.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Login flags and stages.
pub mod common;
/// Login Request BHS and builder.
pub mod request;
/// Login Response BHS.
pub mod response;
/// Login status classes and details.
pub mod status;
