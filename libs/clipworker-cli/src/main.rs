// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! clipworker CLI
//!
//! Runs pattern scripts in an isolated worker and inspects their outputs.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "clipworker")]
#[command(author, version, about = "Run scripts in isolated clip workers", long_about = None)]
struct Cli {
    /// Directory containing clipworker.yaml (default: $CLIPWORKER_HOME)
    #[arg(long, global = true, value_name = "DIR")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script and list its outputs
    Run {
        /// Script file to execute
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch one frame of an output
    Frame {
        /// Script file to execute first
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Output name
        #[arg(long)]
        clip: String,

        /// Frame index
        #[arg(long)]
        frame: u32,

        /// Print size and format instead of fetching pixels
        #[arg(long, conflicts_with = "out")]
        meta: bool,

        /// Write the frame here (.png encodes an image, anything else gets raw planes)
        #[arg(long, value_name = "FILE", required_unless_present = "meta")]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { script, json } => commands::run::run(config, &script, json),
        Commands::Frame {
            script,
            clip,
            frame,
            meta,
            out,
        } => commands::frame::frame(config, &script, &clip, frame, meta, out.as_deref()),
    }
}
