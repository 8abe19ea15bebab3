// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "snow", version, about = "Terminal-hosted AI coding assistant engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Named provider profile from config.json (defaults to snowcfg).
    #[arg(long, global = true)]
    pub profile: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the SSE server.
    Serve {
        /// Bind address.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 5200)]
        port: u16,
    },
    /// List sessions of the current project.
    Sessions {
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
        /// Substring filter over titles and last user message.
        #[arg(long)]
        q: Option<String>,
    },
    /// Show accumulated per-model token usage.
    Usage,
}
