//! This module contains state machines for the blocking phases of a
//! session: login and logout.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Common structures and traits for state machines.
pub mod common;
/// State machine for the Login phase.
pub mod login;
/// State machine for the Logout command.
pub mod logout_states;
