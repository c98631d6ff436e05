// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod backup;
pub mod docker;
pub mod event_bus;
pub mod repositories;
pub mod simulated;

pub use simulated::{Journal, JournalEntry, SimulatedStack};
