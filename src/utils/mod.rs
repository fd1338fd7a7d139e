// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Utility modules
//!
//! Console helpers for the stagegate CLI.

pub mod colors;
pub mod spinner;

pub use colors::*;
pub use spinner::*;
