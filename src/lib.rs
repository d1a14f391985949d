//! Stratus: declarative provisioning for AWS resources whose operations
//! finish long after the API call returns.
//!
//! Generic polling and retry live in [`waiter`]; each resource type in
//! [`resources`] supplies its status classifier and AWS calls.

pub mod api;
pub mod cli;
pub mod core;
pub mod error;
pub mod logging;
pub mod resources;
pub mod waiter;
