//! Derivforge-Common: Shared types, errors, and utilities.
//!
//! This crate provides the vocabulary used across derivforge:
//!
//! - **Source descriptors**: immutable references to origin assets
//! - **Derivative classes**: thumbnail, fast proxy, HD proxy, HLS package
//! - **Image formats**: thumbnail output formats and their MIME types
//! - **Path Utilities**: extension checks and relative path sanitizing
//! - **Error Handling**: the error taxonomy surfaced to callers
//!
//! # Examples
//!
//! ```
//! use derivforge_common::{DerivativeClass, SourceDescriptor};
//! use derivforge_common::paths::is_video_file;
//! use std::path::Path;
//!
//! let source = SourceDescriptor::new("aB3_x", "clips/video.mp4", 1024, "1700000000")?;
//! assert!(source.is_video());
//! assert_eq!(DerivativeClass::HdProxy.to_string(), "hd-proxy");
//! assert!(is_video_file(Path::new("movie.mkv")));
//! # Ok::<(), derivforge_common::Error>(())
//! ```

pub mod error;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
