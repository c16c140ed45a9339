// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Arne — an AI coding agent with a branchable, durable session log.
#[derive(Parser, Debug)]
#[command(name = "arne", version, about)]
pub struct Cli {
    /// One-shot prompt; without it an interactive line loop starts.
    #[arg(short = 'p', long)]
    pub prompt: Option<String>,

    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Resume an existing session journal instead of creating one.
    #[arg(long)]
    pub session: Option<PathBuf>,

    /// Keep the session in memory only (no journal file).
    #[arg(long)]
    pub ephemeral: bool,

    /// Log to stderr (DEBUG with -v, TRACE with -vv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List persisted sessions, newest first.
    Sessions {
        /// Show at most this many.
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// List sessions from every working directory, not just this one.
        #[arg(long)]
        all: bool,
    },
    /// Print the effective merged configuration and exit.
    ShowConfig,
    /// List the models in the static catalog.
    ListModels,
}
