//! CLI command modules.

pub mod control;
pub mod http;
pub mod queues;
