//! Data-In PDUs and the sense data carried by SCSI responses.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// SCSI Data-In BHS.
pub mod response;
/// Sense data decoding.
pub mod sense_data;
