//! CLI support code shared by the subcommands.

pub mod render;
