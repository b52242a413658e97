// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Sleuth
//!
//! Provides the provider abstraction and the resilience layer wrapped
//! around it: error classification, circuit breaking, and budgeted retry.

pub mod circuit_breaker;
pub mod classify;
pub mod message;
pub mod mock_provider;
pub mod provider;
pub mod retry;

pub use classify::*;
pub use message::*;
pub use provider::*;
