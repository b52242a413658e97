// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Agent orchestration for Sleuth
//!
//! The per-run machinery: loop protection, the typed event stream, the
//! conversation-store seam, and the orchestration loop itself.

pub mod events;
pub mod loop_detector;
pub mod runner;
pub mod session;

pub use events::*;
pub use loop_detector::*;
pub use runner::*;
pub use session::*;
