//! Input locations handed to ffmpeg/ffprobe.

use serde::{Deserialize, Serialize};

/// Where a tool reads its source from: a URL (or local path) plus request
/// headers for authenticated origins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInput {
    /// URL or filesystem path passed to `-i`.
    pub location: String,
    /// Extra HTTP headers, sent with `-headers`.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl MediaInput {
    /// Input without headers.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            headers: Vec::new(),
        }
    }

    /// Add a request header. Empty values are ignored when rendered.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The `-headers` value: `Name: value\r\n` per header, or `None`.
    pub fn header_block(&self) -> Option<String> {
        let block: String = self
            .headers
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{k}: {v}\r\n"))
            .collect();
        (!block.is_empty()).then_some(block)
    }

    /// Arguments that open this input: optional `-headers`, then `-i`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(block) = self.header_block() {
            args.push("-headers".to_string());
            args.push(block);
        }
        args.push("-i".to_string());
        args.push(self.location.clone());
        args
    }
}
