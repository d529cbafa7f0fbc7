use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use derivforge_av::actions::{hls_rendition_args, keyframe_interval};
use derivforge_av::playlist::write_master;
use derivforge_av::MediaInput;

use super::{AttemptContext, EscalationLadder, Staging, Strategy};
use crate::encoder::{Invocation, Prober};
use crate::profile::{EncodingProfile, HlsProfile};

/// Encode every rendition of the ladder into one staged package.
///
/// Renditions are encoded in ascending height; the first failure abandons
/// the package. The master playlist is written only after every variant
/// playlist exists.
pub struct HlsPackage {
    input: MediaInput,
    profile: HlsProfile,
    prober: Arc<dyn Prober>,
    destination: PathBuf,
}

impl HlsPackage {
    pub fn new(
        input: &MediaInput,
        profile: &HlsProfile,
        prober: Arc<dyn Prober>,
        destination: &Path,
    ) -> Self {
        Self {
            input: input.clone(),
            profile: profile.clone(),
            prober,
            destination: destination.to_path_buf(),
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        match self.prober.probe(&self.input) {
            Ok(info) => info.frame_rate,
            Err(e) => {
                tracing::debug!("frame rate probe failed for {}: {e}", self.input.location);
                None
            }
        }
    }
}

impl Strategy for HlsPackage {
    fn label(&self) -> String {
        "hls".to_string()
    }

    fn destination(&self) -> &Path {
        &self.destination
    }

    fn staging(&self) -> Staging {
        Staging::Dir
    }

    fn attempt(&self, ctx: &AttemptContext<'_>) -> derivforge_av::Result<()> {
        let gop = keyframe_interval(self.frame_rate(), self.profile.segment_seconds);

        for rendition in &self.profile.ladder {
            let out_dir = ctx.output.join(rendition.dir_name());
            fs::create_dir_all(&out_dir)?;

            let args = hls_rendition_args(
                &self.input,
                rendition,
                &self.profile.preset,
                self.profile.crf,
                self.profile.segment_seconds,
                gop,
                &out_dir,
            );
            let playlist = out_dir.join("stream.m3u8");
            ctx.encoder.run(&Invocation::new(
                format!("hls:{}", rendition.name()),
                args,
                &playlist,
                ctx.timeout,
            ))?;

            if !playlist.is_file() {
                return Err(derivforge_av::Error::EmptyOutput { path: playlist });
            }
        }

        write_master(ctx.output, &self.profile.ladder)
    }
}

pub fn hls_ladder(
    profile: &HlsProfile,
    input: &MediaInput,
    prober: Arc<dyn Prober>,
    destination: &Path,
) -> EscalationLadder {
    EscalationLadder::new(profile.class(), profile.timeout())
        .push(HlsPackage::new(input, profile, prober, destination))
}
