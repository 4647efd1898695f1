//! This module defines the state machine for the iSCSI Login phase.
//! It includes submodules for the shared context, CHAP authentication, and
//! the unauthenticated steps.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod common;
pub mod login_chap;
pub mod login_plain;
