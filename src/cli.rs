use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "derivforge")]
#[command(author, version, about = "Media-derivative cache: thumbnails, proxies, and HLS packages")]
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

/// Identifies an origin file.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Share identifier
    pub share: String,

    /// Path of the file inside the share
    pub path: String,

    /// Origin byte size (read from the local origin root when omitted)
    #[arg(long)]
    pub size: Option<u64>,

    /// Origin modification token (read from the local origin root when omitted)
    #[arg(long)]
    pub modified: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Produce a thumbnail (or a strip of them with --times/--count)
    Thumb {
        #[command(flatten)]
        source: SourceArgs,

        /// auto, avif, webp, or jpg
        #[arg(long, default_value = "auto")]
        format: String,

        /// Accept header used for format negotiation
        #[arg(long)]
        accept: Option<String>,

        /// Requested width in pixels
        #[arg(short, long)]
        width: Option<u32>,

        /// Seek offset in seconds (videos only)
        #[arg(short, long)]
        time: Option<String>,

        /// Comma-separated offsets for a multi-frame strip
        #[arg(long, conflicts_with = "time")]
        times: Option<String>,

        /// Number of frames for a multi-frame strip
        #[arg(long, conflicts_with = "time")]
        count: Option<usize>,
    },

    /// Produce the fast streaming proxy
    Proxy {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Produce the HD streaming proxy
    Hd {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Produce the HLS package
    Hls {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Pre-warm video derivatives in the background
    Prepare {
        #[command(flatten)]
        source: SourceArgs,

        /// Targets: fast, hd, hls (or adaptive); defaults to hd
        #[arg(short = 'T', long = "target")]
        targets: Vec<String>,
    },

    /// Report which video derivatives are ready
    Sources {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Execute a task envelope read from stdin (external queue worker)
    RunTask,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config or defaults if not specified)
        #[arg(value_name = "CONFIG")]
        file: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
