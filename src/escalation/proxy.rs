use std::path::{Path, PathBuf};

use derivforge_av::actions::{
    fast_proxy_args, hd_copy_video_args, hd_remux_args, hd_transcode_args,
};
use derivforge_av::MediaInput;

use super::{AttemptContext, EscalationLadder, Strategy};
use crate::encoder::Invocation;
use crate::profile::{EncodingProfile, ProxyProfile};

/// Proxy encode variants, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Scaled H.264 re-encode for quick playback.
    Fast,
    /// Container change only.
    Remux,
    /// Keep the video stream, re-encode audio.
    CopyVideo,
    /// Full re-encode.
    Transcode,
}

impl ProxyMode {
    pub fn label(&self) -> &'static str {
        match self {
            ProxyMode::Fast => "fast",
            ProxyMode::Remux => "remux",
            ProxyMode::CopyVideo => "copy-video",
            ProxyMode::Transcode => "transcode",
        }
    }
}

pub struct ProxyEncode {
    mode: ProxyMode,
    input: MediaInput,
    profile: ProxyProfile,
    destination: PathBuf,
}

impl ProxyEncode {
    pub fn new(
        mode: ProxyMode,
        input: &MediaInput,
        profile: &ProxyProfile,
        destination: &Path,
    ) -> Self {
        Self {
            mode,
            input: input.clone(),
            profile: profile.clone(),
            destination: destination.to_path_buf(),
        }
    }

    fn args(&self, output: &Path) -> Vec<String> {
        let settings = &self.profile.settings;
        match self.mode {
            ProxyMode::Fast => fast_proxy_args(&self.input, settings, output),
            ProxyMode::Remux => hd_remux_args(&self.input, output),
            ProxyMode::CopyVideo => {
                hd_copy_video_args(&self.input, &settings.audio_bitrate, output)
            }
            ProxyMode::Transcode => hd_transcode_args(&self.input, settings, output),
        }
    }
}

impl Strategy for ProxyEncode {
    fn label(&self) -> String {
        self.mode.label().to_string()
    }

    fn destination(&self) -> &Path {
        &self.destination
    }

    fn attempt(&self, ctx: &AttemptContext<'_>) -> derivforge_av::Result<()> {
        ctx.encoder.run(&Invocation::new(
            self.label(),
            self.args(ctx.output),
            ctx.output,
            ctx.timeout,
        ))
    }
}

pub fn fast_proxy_ladder(
    profile: &ProxyProfile,
    input: &MediaInput,
    destination: &Path,
) -> EscalationLadder {
    EscalationLadder::new(profile.class(), profile.timeout())
        .push(ProxyEncode::new(ProxyMode::Fast, input, profile, destination))
}

/// Remux, then copy video with new audio, then a full transcode.
pub fn hd_proxy_ladder(
    profile: &ProxyProfile,
    input: &MediaInput,
    destination: &Path,
) -> EscalationLadder {
    [ProxyMode::Remux, ProxyMode::CopyVideo, ProxyMode::Transcode]
        .into_iter()
        .fold(
            EscalationLadder::new(profile.class(), profile.timeout()),
            |ladder, mode| ladder.push(ProxyEncode::new(mode, input, profile, destination)),
        )
}
