// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Sleuth - the supervision core of an AI debugging agent for ephemeral
//! preview environments.
//!
//! This crate contains the resilient tool-calling orchestration engine:
//! everything that keeps the agent's iterate-call-tools cycle safe under
//! provider failures, runaway loops, and context-window pressure. The HTTP
//! layer, conversation persistence, and the concrete tool catalog live in
//! sibling services and reach this crate only through traits.
//!
//! Architecture highlights:
//! - `llm`: provider abstraction, error classification, circuit breakers,
//!   and the budgeted retry policy
//! - `tokens`: token estimation and per-provider context budget accounting
//! - `tools`: the tool capability model and execution contract
//! - `agent`: loop protection, the per-run event stream, and the
//!   orchestration loop that ties it all together

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod tokens;
pub mod tools;

pub use error::{Result, SleuthError};
