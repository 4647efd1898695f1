//! SCSI Command / SCSI Response PDUs.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Flags, task attributes and transfer direction.
pub mod common;
/// SCSI Command BHS and builder.
pub mod request;
/// SCSI Response BHS.
pub mod response;
