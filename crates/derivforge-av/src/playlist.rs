//! HLS master playlist generation.

use crate::actions::Rendition;
use std::fs;
use std::path::Path;

/// File name of the master playlist inside a package directory.
pub const MASTER_PLAYLIST: &str = "master.m3u8";

/// Render a master playlist listing renditions in ascending bandwidth.
pub fn generate_master(renditions: &[Rendition]) -> String {
    let mut ordered: Vec<&Rendition> = renditions.iter().collect();
    ordered.sort_by_key(|r| (r.bandwidth(), r.height));

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for rendition in ordered {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},NAME=\"{}\"\n",
            rendition.bandwidth(),
            rendition.name()
        ));
        playlist.push_str(&format!("{}/stream.m3u8\n", rendition.dir_name()));
    }
    playlist
}

/// Write the master playlist into `package_dir`.
pub fn write_master(package_dir: &Path, renditions: &[Rendition]) -> crate::Result<()> {
    fs::write(package_dir.join(MASTER_PLAYLIST), generate_master(renditions))?;
    Ok(())
}

/// Extract the variant playlist URIs from a master playlist.
pub fn variant_uris(master: &str) -> Vec<&str> {
    master
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect()
}
