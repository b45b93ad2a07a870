//! CLI module for surface-bridge - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for replaying and decoding
//! surface traffic.

pub mod commands;

pub use commands::Cli;
