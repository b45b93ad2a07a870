//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - replay: feed recorded inbound messages through a session
//! - decode: decode a single envelope and show what it dispatches to
//! - methods: list the checkout methods
//! - config: print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Surface Bridge - inspect and replay checkout surface traffic
#[derive(Parser, Debug)]
#[command(name = "surface-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// How replayed requests get answered.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RespondMode {
    /// Leave requests pending; they are cancelled when the session ends
    #[default]
    None,
    /// Cancel every request as it arrives
    Cancel,
    /// Answer every request with an empty payload
    Empty,
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay newline-delimited inbound messages through a checkout session
    Replay {
        /// File with one JSON message per line (stdin if omitted)
        file: Option<PathBuf>,

        /// How to answer requests
        #[arg(short, long, value_enum, default_value_t = RespondMode::None)]
        respond: RespondMode,
    },

    /// Decode one inbound message
    Decode {
        /// Raw JSON envelope
        json: String,
    },

    /// List the registered checkout methods
    Methods,

    /// Print the effective configuration
    Config,
}
