//! HLS rendition ladder parsing.

use derivforge_av::actions::{Rendition, DEFAULT_AUDIO_KBPS};

/// The ladder used when configuration yields no usable entry.
pub fn default_ladder() -> Vec<Rendition> {
    vec![
        Rendition::new(360, 800, 96),
        Rendition::new(720, 1600, 128),
        Rendition::new(1080, 3000, 160),
    ]
}

/// Parse `height:video-kbps[:audio-kbps]` entries separated by commas.
///
/// Malformed or non-positive entries are skipped, the first entry for a
/// height wins, and the result is sorted by height. An empty result falls
/// back to [`default_ladder`].
pub fn parse_renditions(spec: &str) -> Vec<Rendition> {
    let mut renditions: Vec<Rendition> = Vec::new();

    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = item
            .split(':')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 2 {
            continue;
        }
        let parsed = (
            parts[0].parse::<i64>(),
            parts[1].parse::<i64>(),
            parts.get(2).map_or(Ok(i64::from(DEFAULT_AUDIO_KBPS)), |a| a.parse::<i64>()),
        );
        let (Ok(height), Ok(video), Ok(audio)) = parsed else {
            continue;
        };
        let (Ok(height), Ok(video), Ok(audio)) = (
            u32::try_from(height),
            u32::try_from(video),
            u32::try_from(audio),
        ) else {
            continue;
        };
        if height == 0 || video == 0 || audio == 0 {
            continue;
        }
        if renditions.iter().any(|r| r.height == height) {
            continue;
        }
        renditions.push(Rendition::new(height, video, audio));
    }

    if renditions.is_empty() {
        return default_ladder();
    }
    renditions.sort_by_key(|r| r.height);
    renditions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_spec() {
        let ladder = parse_renditions("360:800:96,720:1600:128,1080:3000:160");
        assert_eq!(ladder, default_ladder());
    }

    #[test]
    fn test_audio_defaults_and_sorting() {
        let ladder = parse_renditions(" 720:1500 , 480:900:64 ");
        assert_eq!(
            ladder,
            vec![Rendition::new(480, 900, 64), Rendition::new(720, 1500, 96)]
        );
    }

    #[test]
    fn test_invalid_and_duplicate_entries_skipped() {
        let ladder = parse_renditions("abc,360,0:800,240:-5,480:700,480:9999,1080:x:1");
        assert_eq!(ladder, vec![Rendition::new(480, 700, 96)]);
    }

    #[test]
    fn test_empty_falls_back() {
        assert_eq!(parse_renditions(""), default_ladder());
        assert_eq!(parse_renditions("garbage"), default_ladder());
    }
}
