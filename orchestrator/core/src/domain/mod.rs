// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Upgrade state machine, execution aggregate, resource inventory and the
//! facade traits the orchestrator drives.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and traits; adapters live in `crate::infrastructure`

pub mod backup;
pub mod cache;
pub mod command;
pub mod events;
pub mod execution;
pub mod inventory;
pub mod repository;
pub mod service;
pub mod workflow;
