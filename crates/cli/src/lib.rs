//! Command line client for JSON-RPC nodes.

pub mod cli;
pub mod commands;
pub mod logging;
