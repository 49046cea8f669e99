//! Shared building blocks: configuration, errors, external commands.

pub mod command;
pub mod config;
pub mod errors;
