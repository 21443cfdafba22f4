//! Command-line interface for inference-bridge.
//!
//! The CLI drives models through the same handle registry the C ABI uses,
//! which makes it a convenient harness for checking a model before shipping
//! it to a host runtime.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Exercise the inference bridge from the command line.
#[derive(Parser, Debug)]
#[command(name = "inference-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to an optional YAML config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a model and print its slots.
    Info {
        /// Path to the serialized model.
        #[arg(short, long)]
        model: PathBuf,
    },

    /// Run one forward pass.
    Run {
        /// Path to the serialized model.
        #[arg(short, long)]
        model: PathBuf,

        /// JSON file of the form `{"inputs": [[f32, ...], ...]}`, one array
        /// per input slot.
        #[arg(short, long)]
        input: PathBuf,

        /// Output format (json, pretty).
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Repeatedly create and destroy a session.
    Check {
        /// Path to the serialized model.
        #[arg(short, long)]
        model: PathBuf,

        /// Number of create/destroy cycles.
        #[arg(short = 'n', long, default_value_t = 10)]
        iterations: usize,
    },
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
