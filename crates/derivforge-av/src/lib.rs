//! # derivforge-av
//!
//! External media tool plumbing for derivative generation.
//!
//! This crate provides:
//! - A blocking [`ToolCommand`] runner with a hard timeout
//! - ffmpeg argument builders for thumbnails, proxies, and HLS renditions
//! - ffprobe stream probing (frame rate, duration, dimensions)
//! - HLS master playlist generation
//! - [`Workspace`] staging for atomic publication of outputs
//! - Tool discovery via `which`
//!
//! ## Example
//!
//! ```no_run
//! use derivforge_av::{actions, MediaInput, ToolCommand, Workspace};
//! use derivforge_common::ImageFormat;
//! use std::path::{Path, PathBuf};
//!
//! let input = MediaInput::new("/media/clip.mp4");
//! let workspace = Workspace::file(Path::new("/cache/thumbs/abc.jpg"))?;
//! let args = actions::thumbnail_args(
//!     &input,
//!     ImageFormat::Jpeg,
//!     480,
//!     Some(1.0),
//!     &actions::ThumbnailSettings::default(),
//!     workspace.path(),
//! );
//! ToolCommand::new(PathBuf::from("ffmpeg")).args(args).execute()?;
//! workspace.finalize()?;
//! # Ok::<(), derivforge_av::Error>(())
//! ```

pub mod actions;
pub mod command;
mod error;
pub mod input;
pub mod playlist;
pub mod probe;
pub mod tools;
pub mod workspace;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use input::MediaInput;
pub use probe::{probe_stream, StreamInfo};
pub use tools::{check_tool, check_tools, ToolInfo, ToolPaths};
pub use workspace::Workspace;
