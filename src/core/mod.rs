//! Core logic: types, parsing, hashing, planning, execution, drift.

pub mod drift;
pub mod eventlog;
pub mod executor;
pub mod hasher;
pub mod parser;
pub mod planner;
pub mod state;
pub mod types;
