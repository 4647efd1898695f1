//! Text parameter handling shared by Login and Text PDUs.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// `key=value` encoder / decoder.
pub mod codec;
