use std::path::{Path, PathBuf};

use derivforge_av::actions::{format_seek, thumbnail_args, ThumbnailSettings};
use derivforge_av::MediaInput;
use derivforge_common::{DerivativeClass, ImageFormat};

use super::{AttemptContext, EscalationLadder, Strategy};
use crate::encoder::Invocation;
use crate::profile::{EncodingProfile, ThumbnailProfile};

/// Extract one frame in one format.
pub struct FrameGrab {
    input: MediaInput,
    format: ImageFormat,
    width: u32,
    seek: Option<f64>,
    settings: ThumbnailSettings,
    destination: PathBuf,
    /// A cheaper format tried after the requested one failed.
    fallback: bool,
    /// Second try of the same format from the start of the stream.
    restart: bool,
}

impl Strategy for FrameGrab {
    fn label(&self) -> String {
        match (self.restart, self.seek) {
            (true, _) => format!("{}@start", self.format.extension()),
            (false, Some(seek)) => format!("{}@{}", self.format.extension(), format_seek(seek)),
            (false, None) => self.format.extension().to_string(),
        }
    }

    fn destination(&self) -> &Path {
        &self.destination
    }

    fn reuse_existing(&self) -> bool {
        self.fallback && !self.restart
    }

    fn applies_after(&self, previous: Option<&derivforge_av::Error>) -> bool {
        if !self.restart {
            return true;
        }
        // Seeking past the end yields nothing; a timeout would only repeat.
        previous.is_some_and(|e| !e.is_timeout())
    }

    fn attempt(&self, ctx: &AttemptContext<'_>) -> derivforge_av::Result<()> {
        let args = thumbnail_args(
            &self.input,
            self.format,
            self.width,
            self.seek,
            &self.settings,
            ctx.output,
        );
        ctx.encoder
            .run(&Invocation::new(self.label(), args, ctx.output, ctx.timeout))
    }
}

/// Ladder for one thumbnail.
///
/// `formats` starts with the negotiated format followed by its fallbacks;
/// `destination` maps each format to its cache path. Video sources with a
/// positive seek get a from-the-start retry per format.
pub fn thumbnail_ladder(
    profile: &ThumbnailProfile,
    input: &MediaInput,
    formats: &[ImageFormat],
    width: u32,
    seek: Option<f64>,
    destination: impl Fn(ImageFormat) -> PathBuf,
) -> EscalationLadder {
    let mut ladder = EscalationLadder::new(DerivativeClass::Thumbnail, profile.timeout());
    let retry_from_start = seek.is_some_and(|s| s > 0.0);

    for (i, format) in formats.iter().copied().enumerate() {
        let grab = |seek: Option<f64>, restart: bool| FrameGrab {
            input: input.clone(),
            format,
            width,
            seek,
            settings: profile.settings.clone(),
            destination: destination(format),
            fallback: i > 0,
            restart,
        };
        ladder = ladder.push(grab(seek, false));
        if retry_from_start {
            ladder = ladder.push(grab(Some(0.0), true));
        }
    }

    ladder
}
