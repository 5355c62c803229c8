use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "channelcast")]
#[command(author, version, about = "Scheduled playlist playout to UDP multicast")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Play media files or a playlist onto the multicast channel
    Play {
        /// Media files to play back to back
        files: Vec<String>,

        /// TOML or JSON playlist with scheduled start times
        #[arg(short, long, conflicts_with = "files")]
        playlist: Option<PathBuf>,

        /// Print playout events to stdout as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Print the duration the scheduler would use for a media file
    Probe {
        /// File or URI to probe
        #[arg(required = true)]
        file: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
